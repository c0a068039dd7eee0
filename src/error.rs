//! Error types for the shared_link_sync crate.

use thiserror::Error;

/// Errors that can occur while authorizing or mirroring shared links.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authorization failed: {0}")]
    AuthorizationError(String),

    #[error("Authorization denied by provider: {error}{}", suffix(.description, " (", ")"))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Authorization state mismatch: the redirect did not echo the expected state")]
    StateMismatch,

    #[error("Timed out waiting for {0}")]
    ListenerTimeout(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to move downloaded file into place: {0}")]
    PersistError(#[from] tempfile::PersistError),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}{}", suffix(.request_uri, " [", "]"))]
    ApiError {
        status: u16,
        message: String,
        request_uri: Option<String>,
    },

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Invalid shared link: {0}")]
    InvalidSharedLink(String),

    #[error("Refusing to use remote name as a local path: {0:?}")]
    UnsafeName(String),

    #[error("Failed to parse settings: {0}")]
    SettingsParseError(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    SettingsSerializeError(#[from] toml::ser::Error),

    #[error("Could not determine the documents directory")]
    MissingDocumentsDir,

    #[error("Prompt failed: {0}")]
    PromptError(#[from] dialoguer::Error),
}

fn suffix(value: &Option<String>, open: &str, close: &str) -> String {
    value
        .as_deref()
        .map(|v| format!("{}{}{}", open, v, close))
        .unwrap_or_default()
}

/// Broad grouping of [`SyncError`] variants, attached to error logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Authorization,
    Transport,
    LocalIo,
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::SettingsParseError(_)
            | SyncError::SettingsSerializeError(_)
            | SyncError::MissingDocumentsDir
            | SyncError::InvalidSharedLink(_) => ErrorCategory::Configuration,
            SyncError::AuthorizationError(_)
            | SyncError::AuthorizationDenied { .. }
            | SyncError::StateMismatch
            | SyncError::ListenerTimeout(_)
            | SyncError::TokenRefreshError(_) => ErrorCategory::Authorization,
            SyncError::HttpError(_)
            | SyncError::ApiError { .. }
            | SyncError::JsonError(_)
            | SyncError::UrlError(_) => ErrorCategory::Transport,
            SyncError::IoError(_)
            | SyncError::PersistError(_)
            | SyncError::UnsafeName(_)
            | SyncError::PromptError(_) => ErrorCategory::LocalIo,
        }
    }
}

/// Result type alias for SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_includes_request_uri() {
        let err = SyncError::ApiError {
            status: 409,
            message: "shared_link_not_found/".to_string(),
            request_uri: Some("https://api.dropboxapi.com/2/sharing/get_shared_link_metadata".to_string()),
        };

        let display = err.to_string();
        assert!(display.contains("409"));
        assert!(display.contains("shared_link_not_found"));
        assert!(display.contains("get_shared_link_metadata"));
        assert_eq!(err.category(), ErrorCategory::Transport);
    }

    #[test]
    fn test_denied_display() {
        let err = SyncError::AuthorizationDenied {
            error: "access_denied".to_string(),
            description: Some("The user chose not to give your app access".to_string()),
        };
        assert!(err.to_string().contains("access_denied (The user chose"));
        assert_eq!(err.category(), ErrorCategory::Authorization);
    }
}
