//! Data models for Dropbox API responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata returned by `sharing/get_shared_link_metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedLinkMetadata {
    #[serde(rename = ".tag")]
    pub tag: String,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
}

impl SharedLinkMetadata {
    pub fn is_folder(&self) -> bool {
        self.tag == "folder"
    }
}

/// A single entry in a folder listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum Entry {
    File(FileEntry),
    Folder(FolderEntry),
    #[serde(other)]
    Other,
}

impl Entry {
    pub fn name(&self) -> Option<&str> {
        match self {
            Entry::File(file) => Some(&file.name),
            Entry::Folder(folder) => Some(&folder.name),
            Entry::Other => None,
        }
    }
}

/// File metadata within a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub server_modified: DateTime<Utc>,
    #[serde(default)]
    pub client_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
}

/// Folder metadata within a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path_display: Option<String>,
}

impl std::fmt::Display for FileEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{}\t{}",
            self.server_modified.format("%Y-%m-%dT%H:%M:%SZ"),
            format_size(self.size),
            self.name
        )
    }
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Response from `files/list_folder` and `files/list_folder/continue`.
#[derive(Debug, Deserialize)]
pub struct ListFolderResponse {
    #[serde(default)]
    pub entries: Vec<Entry>,
    pub cursor: String,
    #[serde(default)]
    pub has_more: bool,
}

/// Display name of an account.
#[derive(Debug, Deserialize)]
pub struct AccountName {
    pub display_name: String,
    #[serde(default)]
    pub familiar_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

/// Team membership of an account.
#[derive(Debug, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

/// Response from `users/get_current_account`.
#[derive(Debug, Deserialize)]
pub struct FullAccount {
    pub account_id: String,
    pub name: AccountName,
    pub email: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub is_paired: bool,
    #[serde(default)]
    pub referral_link: Option<String>,
    #[serde(default)]
    pub team: Option<Team>,
}

/// Dropbox API error response.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error_summary: String,
}

/// OAuth2 token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

/// OAuth2 token endpoint error body.
#[derive(Debug, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(format_size(1073741824), "1.00 GB");
    }

    #[test]
    fn test_entry_deserialize_file() {
        let json = r#"{
            ".tag": "file",
            "name": "a.jpg",
            "id": "id:abc123",
            "client_modified": "2023-12-31T23:00:00Z",
            "server_modified": "2024-01-01T00:00:00Z",
            "rev": "015f",
            "size": 2048
        }"#;

        let entry: Entry = serde_json::from_str(json).unwrap();
        match entry {
            Entry::File(file) => {
                assert_eq!(file.name, "a.jpg");
                assert_eq!(file.size, 2048);
                assert_eq!(
                    file.server_modified,
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                );
            }
            other => panic!("expected a file entry, got {:?}", other),
        }
    }

    #[test]
    fn test_entry_deserialize_unknown_tag() {
        let json = r#"{".tag": "deleted", "name": "gone.txt"}"#;
        let entry: Entry = serde_json::from_str(json).unwrap();
        assert!(matches!(entry, Entry::Other));
        assert_eq!(entry.name(), None);
    }

    #[test]
    fn test_file_entry_display() {
        let file = FileEntry {
            name: "b.jpg".to_string(),
            server_modified: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            client_modified: None,
            size: 1024,
            id: None,
            path_display: None,
            rev: None,
        };

        let display = format!("{}", file);
        assert!(display.contains("2024-02-01T00:00:00Z"));
        assert!(display.contains("1.00 KB"));
        assert!(display.contains("b.jpg"));
    }

    #[test]
    fn test_token_response_with_refresh_token() {
        let json = r#"{
            "access_token": "sl.abc",
            "token_type": "bearer",
            "expires_in": 14400,
            "refresh_token": "rt-xyz",
            "scope": "files.content.read sharing.read",
            "uid": "12345",
            "account_id": "dbid:AAH4f99"
        }"#;

        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "sl.abc");
        assert_eq!(token.expires_in, Some(14400));
        assert_eq!(token.refresh_token.as_deref(), Some("rt-xyz"));
        assert_eq!(token.uid.as_deref(), Some("12345"));
    }
}
