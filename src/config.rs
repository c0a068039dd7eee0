//! Runtime configuration: listener address, timeouts and local paths.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

use crate::error::{Result, SyncError};

/// Loopback port registered with the provider as the redirect target.
pub const LOOPBACK_PORT: u16 = 52475;

/// How long the redirect listener waits in each state.
pub const DEFAULT_AUTH_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum time without receiving bytes on a provider connection.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time for a single provider request, including downloads.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Bridge page looked up in the working directory.
pub const BRIDGE_PAGE_FILE: &str = "index.html";

const USER_AGENT: &str = concat!("shared_link_sync/", env!("CARGO_PKG_VERSION"));

/// Transport settings for provider calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub read_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl HttpConfig {
    pub fn build_client(&self) -> Result<Client> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .read_timeout(self.read_timeout)
            .timeout(self.request_timeout)
            .build()?;
        Ok(client)
    }
}

/// Settings for one authorization attempt.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub listen_addr: SocketAddr,
    pub step_timeout: Duration,
    pub bridge_page: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, LOOPBACK_PORT)),
            step_timeout: DEFAULT_AUTH_STEP_TIMEOUT,
            bridge_page: PathBuf::from(BRIDGE_PAGE_FILE),
        }
    }
}

/// Everything a run needs besides the persisted settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub http: HttpConfig,
    pub documents_root: PathBuf,
    pub settings_path: PathBuf,
}

/// The user's documents directory, falling back to `~/Documents`.
pub fn default_documents_root() -> Result<PathBuf> {
    dirs::document_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Documents")))
        .ok_or(SyncError::MissingDocumentsDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_auth_config_uses_loopback() {
        let config = AuthConfig::default();
        assert!(config.listen_addr.ip().is_loopback());
        assert_eq!(config.listen_addr.port(), 52475);
        assert_eq!(config.bridge_page, PathBuf::from("index.html"));
    }

    #[test]
    fn test_build_client() {
        assert!(HttpConfig::default().build_client().is_ok());
    }
}
