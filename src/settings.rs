//! Persisted credentials and shared-link list.
//!
//! Settings are stored as TOML at
//!   ~/.config/shared_link_sync/settings.toml
//! unless another path is configured.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::auth::TokenGrant;
use crate::error::{Result, SyncError};

/// Access tokens expiring within this window are treated as expired.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Everything that survives between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub refresh_token: String,
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub shared_links: Vec<String>,
}

impl Settings {
    /// The stored user id, if a usable access token is stored alongside it.
    pub fn cached_uid(&self) -> Option<&str> {
        if !self.access_token.is_empty() && !self.uid.is_empty() {
            Some(&self.uid)
        } else {
            None
        }
    }

    pub fn has_api_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Whether the access token should be refreshed before use.
    ///
    /// Requires a stored refresh token. A token with no recorded expiry is
    /// refreshed, since its age is unknown.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.refresh_token.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at <= now + Duration::seconds(EXPIRY_BUFFER_SECS),
            None => true,
        }
    }

    /// Record a freshly issued token.
    pub fn apply_grant(&mut self, grant: &TokenGrant) {
        self.access_token = grant.access_token.clone();
        if let Some(refresh_token) = &grant.refresh_token {
            self.refresh_token = refresh_token.clone();
        }
        if !grant.uid.is_empty() {
            self.uid = grant.uid.clone();
        }
        self.expires_at = grant.expires_at;
        if !grant.scopes.is_empty() {
            self.scopes = grant.scopes.clone();
        }
    }

    /// Clear every field.
    pub fn reset_all(&mut self) {
        *self = Settings::default();
    }

    /// Clear the shared-link list only.
    pub fn reset_shared_links(&mut self) {
        self.shared_links.clear();
    }

    /// Enforce that the access token and user id are stored together.
    ///
    /// Returns true if the settings were changed.
    fn normalize(&mut self) -> bool {
        if self.access_token.is_empty() != self.uid.is_empty() {
            warn!("Stored access token and user id are inconsistent; discarding both");
            self.access_token.clear();
            self.uid.clear();
            self.expires_at = None;
            return true;
        }
        false
    }
}

/// Persistence for [`Settings`].
pub trait SettingsStore {
    fn load(&self) -> Result<Settings>;
    fn save(&self, settings: &Settings) -> Result<()>;
}

/// TOML file backed settings store.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the platform config directory.
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| {
            SyncError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            ))
        })?;
        Ok(base.join("shared_link_sync").join("settings.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            debug!("No settings file at {}", self.path.display());
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(&self.path)?;
        let mut settings: Settings = toml::from_str(&contents)?;
        settings.normalize();

        debug!("Loaded settings from {}", self.path.display());
        Ok(settings)
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let contents = toml::to_string_pretty(settings)?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)?;

        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn authorized() -> Settings {
        Settings {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            access_token: "sl.token".to_string(),
            refresh_token: "refresh".to_string(),
            uid: "12345".to_string(),
            expires_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap()),
            scopes: vec!["sharing.read".to_string()],
            shared_links: vec!["https://www.dropbox.com/sh/abc/def?dl=0".to_string()],
        }
    }

    #[test]
    fn test_cached_uid_requires_token_and_uid() {
        let settings = authorized();
        assert_eq!(settings.cached_uid(), Some("12345"));

        let mut no_token = authorized();
        no_token.access_token.clear();
        assert_eq!(no_token.cached_uid(), None);

        assert_eq!(Settings::default().cached_uid(), None);
    }

    #[test]
    fn test_reset_shared_links_keeps_tokens() {
        let mut settings = authorized();
        settings.reset_shared_links();

        assert!(settings.shared_links.is_empty());
        assert_eq!(settings.access_token, "sl.token");
        assert_eq!(settings.refresh_token, "refresh");
        assert_eq!(settings.uid, "12345");
        assert_eq!(settings.api_key, "key");
    }

    #[test]
    fn test_reset_all_clears_everything() {
        let mut settings = authorized();
        settings.reset_all();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_needs_refresh() {
        let settings = authorized();
        let before = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let within_buffer = Utc.with_ymd_and_hms(2024, 1, 1, 3, 59, 30).unwrap();
        assert!(!settings.needs_refresh(before));
        assert!(settings.needs_refresh(within_buffer));

        let mut unknown_expiry = authorized();
        unknown_expiry.expires_at = None;
        assert!(unknown_expiry.needs_refresh(before));

        let mut no_refresh_token = authorized();
        no_refresh_token.refresh_token.clear();
        assert!(!no_refresh_token.needs_refresh(within_buffer));
    }

    #[test]
    fn test_apply_grant_keeps_refresh_token_when_absent() {
        let mut settings = authorized();
        settings.apply_grant(&TokenGrant {
            access_token: "sl.new".to_string(),
            refresh_token: None,
            uid: String::new(),
            expires_at: None,
            scopes: Vec::new(),
        });

        assert_eq!(settings.access_token, "sl.new");
        assert_eq!(settings.refresh_token, "refresh");
        assert_eq!(settings.uid, "12345");
        assert_eq!(settings.scopes, vec!["sharing.read".to_string()]);
    }

    #[test]
    fn test_file_store_persists_original_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("nested").join("settings.toml"));

        store.save(&authorized()).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("ApiKey"));
        assert!(raw.contains("AccessToken"));
        assert!(raw.contains("SharedLinks"));

        assert_eq!(store.load().unwrap(), authorized());
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.toml"));
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn test_load_discards_token_without_uid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "ApiKey = \"key\"\nAccessToken = \"orphan\"\n").unwrap();

        let settings = FileSettingsStore::new(&path).load().unwrap();
        assert_eq!(settings.api_key, "key");
        assert!(settings.access_token.is_empty());
        assert!(settings.uid.is_empty());
    }
}
