//! shared_link_sync - Mirror Dropbox shared-link folders into local directories.
//!
//! This library provides functionality to:
//! - Authorize against Dropbox with the OAuth2 code flow, capturing the
//!   redirect on a loopback listener
//! - Persist credentials and the list of shared links between runs
//! - Download every file of a shared folder whose remote modification time
//!   differs from the local copy
//!
//! # Example
//!
//! ```no_run
//! use shared_link_sync::{HttpConfig, SharedLinkClient, SyncDriver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let http = HttpConfig::default().build_client()?;
//!     let client = SharedLinkClient::new("access-token".to_string(), http);
//!     let driver = SyncDriver::new(client, "/home/me/Documents");
//!
//!     let links = vec!["https://www.dropbox.com/sh/abc123/AADxyz?dl=0".to_string()];
//!     let report = driver.sync_all(&links).await;
//!     for link in &report.links {
//!         println!("{}", link);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod links;
pub mod listener;
pub mod models;
pub mod prompt;
pub mod settings;
pub mod sync;

// Re-exports for convenience
pub use auth::{Authorizer, IncludeGrantedScopes, OAuthEndpoints, TokenGrant};
pub use client::{RemoteSource, SharedLinkClient};
pub use config::{AppConfig, AuthConfig, HttpConfig};
pub use error::{ErrorCategory, Result, SyncError};
pub use listener::RedirectListener;
pub use settings::{FileSettingsStore, Settings, SettingsStore};
pub use sync::{EntryOutcome, LinkReport, SyncDriver, SyncReport};
