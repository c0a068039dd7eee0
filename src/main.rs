//! shared_link_sync CLI - Mirror Dropbox shared links into local folders.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use shared_link_sync::auth::{AUTHORIZE_SCOPES, REFRESH_SCOPES};
use shared_link_sync::config::{default_documents_root, AppConfig, AuthConfig, HttpConfig};
use shared_link_sync::models::FullAccount;
use shared_link_sync::prompt::{prompt_shared_links, Prompter, SystemBrowser, TerminalPrompter};
use shared_link_sync::{
    Authorizer, FileSettingsStore, IncludeGrantedScopes, SettingsStore, SharedLinkClient, SyncDriver,
};

/// Mirror Dropbox shared-link folders into your documents directory.
#[derive(Parser, Debug)]
#[command(name = "shared_link_sync")]
#[command(author, version, about, long_about = None)]
#[command(
    after_help = "Flags are case-insensitive and may be prefixed with '-', '--' or '/': \
    -v, -np, -ra, -rsl, -? (e.g. /RSL)."
)]
struct Cli {
    /// Enable detailed logging.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Exit without waiting for Enter.
    #[arg(long = "no-prompt")]
    no_prompt: bool,

    /// Clear all persisted settings before running.
    #[arg(long)]
    reset_all: bool,

    /// Clear the stored shared links before running.
    #[arg(long)]
    reset_shared_links: bool,

    /// Directory the shared links are mirrored into (defaults to your documents folder).
    #[arg(long, env = "SHARED_LINK_SYNC_DOCUMENTS")]
    documents_dir: Option<PathBuf>,

    /// Path to the settings file.
    #[arg(long, env = "SHARED_LINK_SYNC_SETTINGS")]
    settings: Option<PathBuf>,

    /// Seconds to wait for each step of the browser authorization.
    #[arg(long, default_value_t = 300)]
    auth_timeout: u64,

    /// Page served to the browser to forward the authorization redirect.
    #[arg(long, default_value = "index.html")]
    bridge_page: PathBuf,
}

/// Short and long flag spellings mapped to their canonical long form.
const FLAG_ALIASES: &[(&str, &str)] = &[
    ("v", "--verbose"),
    ("verbose", "--verbose"),
    ("np", "--no-prompt"),
    ("no-prompt", "--no-prompt"),
    ("ra", "--reset-all"),
    ("reset-all", "--reset-all"),
    ("rsl", "--reset-shared-links"),
    ("reset-shared-links", "--reset-shared-links"),
    ("?", "--help"),
    ("h", "--help"),
    ("help", "--help"),
];

/// Long options whose next argument is a value.
const VALUE_OPTIONS: &[&str] = &["--documents-dir", "--settings", "--auth-timeout", "--bridge-page"];

/// Rewrite case-insensitive `-x`, `--x` and `/x` flags into the form clap
/// expects. Option values and anything unrecognised pass through untouched.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let mut normalized: Vec<OsString> = args.next().into_iter().collect();
    let mut expecting_value = false;

    for arg in args {
        if expecting_value {
            expecting_value = false;
            normalized.push(arg);
            continue;
        }
        if arg.to_str().is_some_and(|s| VALUE_OPTIONS.contains(&s)) {
            expecting_value = true;
            normalized.push(arg);
            continue;
        }

        let canonical = arg.to_str().and_then(|s| {
            let name = s
                .strip_prefix("--")
                .or_else(|| s.strip_prefix('-'))
                .or_else(|| s.strip_prefix('/'))?;
            let name = name.to_ascii_lowercase();
            FLAG_ALIASES
                .iter()
                .find(|(alias, _)| *alias == name)
                .map(|(_, canonical)| *canonical)
        });

        match canonical {
            Some(flag) => normalized.push(OsString::from(flag)),
            None => normalized.push(arg),
        }
    }

    normalized
}

fn parse_args<I>(args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = OsString>,
{
    Cli::try_parse_from(normalize_args(args))
}

/// Exit status for a parse failure: help and version succeed, the rest fail.
fn parse_error_status(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let status = parse_error_status(&e);
            let _ = e.print();
            if status != 0 {
                eprintln!();
                let _ = Cli::command().print_help();
            }
            return ExitCode::from(status);
        }
    };

    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,shared_link_sync={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<AppConfig> {
    let documents_root = match &cli.documents_dir {
        Some(dir) => dir.clone(),
        None => default_documents_root()?,
    };
    let settings_path = match &cli.settings {
        Some(path) => path.clone(),
        None => FileSettingsStore::default_path()?,
    };

    Ok(AppConfig {
        auth: AuthConfig {
            step_timeout: Duration::from_secs(cli.auth_timeout),
            bridge_page: cli.bridge_page.clone(),
            ..AuthConfig::default()
        },
        http: HttpConfig::default(),
        documents_root,
        settings_path,
    })
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = build_config(&cli)?;
    let store = FileSettingsStore::new(&config.settings_path);

    let mut settings = store
        .load()
        .with_context(|| format!("Failed to load settings from {}", config.settings_path.display()))?;

    if cli.reset_all {
        settings.reset_all();
        store.save(&settings).context("Failed to save settings")?;
        println!("All settings cleared.");
    } else if cli.reset_shared_links {
        settings.reset_shared_links();
        store.save(&settings).context("Failed to save settings")?;
        println!("Shared links cleared.");
    }

    let http = config.http.build_client()?;
    let prompter = TerminalPrompter;
    let authorizer = Authorizer::new(
        config.auth.clone(),
        http.clone(),
        Box::new(TerminalPrompter),
        Box::new(SystemBrowser),
    );

    let uid = match authorizer
        .acquire_token(&mut settings, &store, AUTHORIZE_SCOPES, IncludeGrantedScopes::None)
        .await
    {
        Ok(uid) => uid,
        Err(e) => {
            error!(category = ?e.category(), "{}", e);
            eprintln!("Error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    info!("Authorized as uid {}", uid);

    if let Err(e) = authorizer
        .refresh_if_needed(&mut settings, &store, REFRESH_SCOPES)
        .await
    {
        error!(category = ?e.category(), "{}", e);
        eprintln!("Error: {}", e);
        return Ok(ExitCode::FAILURE);
    }

    let client = SharedLinkClient::new(settings.access_token.clone(), http);

    if cli.verbose {
        match client.current_account().await {
            Ok(account) => log_account(&account),
            Err(e) => warn!("Could not fetch current account: {}", e),
        }
    }

    if settings.shared_links.is_empty() {
        settings.shared_links = prompt_shared_links(&prompter)?;
        store.save(&settings).context("Failed to save settings")?;
    }

    if settings.shared_links.is_empty() {
        println!("No shared links configured.");
    } else {
        let driver = SyncDriver::new(client, &config.documents_root);
        let report = driver.sync_all(&settings.shared_links).await;

        for link in &report.links {
            println!("{}", link);
        }
        for link in &report.failed_links {
            println!("Failed: {}", link);
        }
        println!("All downloads complete!");
    }

    if !cli.no_prompt {
        wait_for_exit(&prompter);
    }

    Ok(ExitCode::SUCCESS)
}

/// Hold the console open until Enter. Without a terminal there is nothing
/// to wait for, so a prompt failure is logged and ignored.
fn wait_for_exit(prompter: &dyn Prompter) {
    if let Err(e) = prompter.input("Press Enter to exit", true) {
        debug!("Skipping exit prompt: {}", e);
    }
}

fn log_account(account: &FullAccount) {
    info!("Current account:");
    info!("  Account id    : {}", account.account_id);
    info!("  Email         : {}", account.email);
    info!("  Name          : {}", account.name.display_name);
    if let Some(country) = &account.country {
        info!("  Country       : {}", country);
    }
    if let Some(locale) = &account.locale {
        info!("  Locale        : {}", locale);
    }
    info!("  Is paired     : {}", if account.is_paired { "Yes" } else { "No" });
    match &account.team {
        Some(team) => info!("  Team          : {} ({})", team.name, team.id),
        None => info!("  Team          : None"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        std::iter::once("shared_link_sync")
            .chain(list.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_normalize_args_aliases() {
        let normalized = normalize_args(args(&["-V", "/NP", "--Reset-All", "-rsl", "/?"]));
        assert_eq!(
            normalized,
            args(&["--verbose", "--no-prompt", "--reset-all", "--reset-shared-links", "--help"])
        );
    }

    #[test]
    fn test_normalize_args_leaves_values_alone() {
        let normalized = normalize_args(args(&["--documents-dir", "/home/me/Docs"]));
        assert_eq!(normalized, args(&["--documents-dir", "/home/me/Docs"]));
    }

    #[test]
    fn test_normalize_args_keeps_option_values() {
        let normalized = normalize_args(args(&["--documents-dir", "/v", "--settings", "-NP", "/v"]));
        assert_eq!(
            normalized,
            args(&["--documents-dir", "/v", "--settings", "-NP", "--verbose"])
        );

        let cli = parse_args(args(&["--bridge-page", "/rsl", "--documents-dir", "/v"])).unwrap();
        assert_eq!(cli.bridge_page, PathBuf::from("/rsl"));
        assert_eq!(cli.documents_dir, Some(PathBuf::from("/v")));
        assert!(!cli.verbose);
        assert!(!cli.reset_shared_links);
    }

    struct NoTerminal;

    impl Prompter for NoTerminal {
        fn input(&self, _label: &str, _allow_empty: bool) -> shared_link_sync::Result<String> {
            Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "not a terminal").into())
        }

        fn secret(&self, label: &str) -> shared_link_sync::Result<String> {
            self.input(label, false)
        }
    }

    #[test]
    fn test_wait_for_exit_without_terminal_does_not_fail() {
        wait_for_exit(&NoTerminal);
    }

    #[test]
    fn test_parse_flags() {
        let cli = parse_args(args(&["/v", "-NP", "/rsl"])).unwrap();
        assert!(cli.verbose);
        assert!(cli.no_prompt);
        assert!(cli.reset_shared_links);
        assert!(!cli.reset_all);
        assert_eq!(cli.auth_timeout, 300);
    }

    #[test]
    fn test_unknown_flag_fails_with_status_one() {
        let err = parse_args(args(&["-bogus"])).unwrap_err();
        assert_eq!(parse_error_status(&err), 1);

        let err = parse_args(args(&["/x"])).unwrap_err();
        assert_eq!(parse_error_status(&err), 1);
    }

    #[test]
    fn test_help_variants_succeed() {
        for flag in ["-?", "/?", "-h", "/H", "--help"] {
            let err = parse_args(args(&[flag])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DisplayHelp, "flag {}", flag);
            assert_eq!(parse_error_status(&err), 0);
        }
    }

    #[test]
    fn test_help_mentions_flags() {
        let help = Cli::command().render_help().to_string();
        assert!(help.contains("--reset-shared-links"));
        assert!(help.contains("--no-prompt"));
        assert!(help.contains("/RSL"));
    }
}
