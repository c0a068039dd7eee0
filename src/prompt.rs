//! Terminal prompts and browser launching.

use dialoguer::{Input, Password};
use tracing::warn;

use crate::error::Result;
use crate::links::validate_shared_link;

/// Source of interactive answers.
pub trait Prompter {
    /// Ask for a line of text. With `allow_empty`, an empty answer is returned
    /// as-is instead of re-asking.
    fn input(&self, label: &str, allow_empty: bool) -> Result<String>;

    /// Ask for a secret without echoing it.
    fn secret(&self, label: &str) -> Result<String>;
}

/// Opens URLs for the user.
pub trait BrowserLauncher {
    fn open(&self, url: &str) -> Result<()>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn input(&self, label: &str, allow_empty: bool) -> Result<String> {
        let answer = Input::<String>::new()
            .with_prompt(label)
            .allow_empty(allow_empty)
            .interact_text()?;
        Ok(answer.trim().to_string())
    }

    fn secret(&self, label: &str) -> Result<String> {
        let answer = Password::new().with_prompt(label).interact()?;
        Ok(answer.trim().to_string())
    }
}

/// Launches the system's default browser.
#[derive(Debug, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        println!("\nOpen this URL in your browser to authorize:\n");
        println!("{}\n", url);

        if let Err(e) = open::that(url) {
            warn!("Could not open browser automatically: {}", e);
            println!("(Could not open browser automatically, please copy the URL above)");
        }
        Ok(())
    }
}

/// Ask for shared links until a blank line is entered.
///
/// Links that do not look like shared folder links are rejected and asked
/// for again.
pub fn prompt_shared_links(prompter: &dyn Prompter) -> Result<Vec<String>> {
    let mut links = Vec::new();
    let mut label = "Shared link";

    loop {
        let line = prompter.input(label, true)?;
        if line.is_empty() {
            break;
        }

        match validate_shared_link(&line) {
            Ok(link) => {
                links.push(link);
                label = "Shared link (leave blank to finish)";
            }
            Err(e) => eprintln!("  {}", e),
        }
    }

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct Scripted(RefCell<VecDeque<&'static str>>);

    impl Prompter for Scripted {
        fn input(&self, _label: &str, _allow_empty: bool) -> Result<String> {
            Ok(self.0.borrow_mut().pop_front().unwrap_or("").to_string())
        }

        fn secret(&self, label: &str) -> Result<String> {
            self.input(label, false)
        }
    }

    #[test]
    fn test_prompt_shared_links_stops_on_blank() {
        let prompter = Scripted(RefCell::new(VecDeque::from([
            "https://www.dropbox.com/sh/abc/AAA?dl=0",
            "not a link",
            "https://www.dropbox.com/scl/fo/def/h?rlkey=k",
            "",
            "https://www.dropbox.com/sh/ignored/BBB",
        ])));

        let links = prompt_shared_links(&prompter).unwrap();
        assert_eq!(
            links,
            vec![
                "https://www.dropbox.com/sh/abc/AAA?dl=0".to_string(),
                "https://www.dropbox.com/scl/fo/def/h?rlkey=k".to_string(),
            ]
        );
    }

    #[test]
    fn test_prompt_shared_links_empty() {
        let prompter = Scripted(RefCell::new(VecDeque::new()));
        assert!(prompt_shared_links(&prompter).unwrap().is_empty());
    }
}
