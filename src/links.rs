//! Validation of shared-link URLs and of remote names used as local paths.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{Result, SyncError};

/// Legacy folder links: `https://www.dropbox.com/sh/<id>/<key>?dl=0`.
static LEGACY_FOLDER_LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?dropbox\.com/sh/[a-zA-Z0-9_-]+(?:/[a-zA-Z0-9_-]+)?/?(?:\?.*)?$")
        .expect("Invalid legacy folder link regex")
});

/// Folder links issued since 2023: `https://www.dropbox.com/scl/fo/<id>/<key>?rlkey=...`.
static SCL_FOLDER_LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?dropbox\.com/scl/fo/[a-zA-Z0-9_-]+(?:/[a-zA-Z0-9_-]+)?/?(?:\?.*)?$")
        .expect("Invalid scl folder link regex")
});

/// Validate a shared folder link entered by the user.
///
/// Supports the following URL formats:
/// - `https://www.dropbox.com/sh/<ID>/<KEY>?dl=0`
/// - `https://www.dropbox.com/scl/fo/<ID>/<KEY>?rlkey=<RLKEY>&dl=0`
///
/// Surrounding whitespace is removed; the URL is otherwise returned as given,
/// since the provider identifies the link by its full text.
///
/// # Examples
///
/// ```
/// use shared_link_sync::links::validate_shared_link;
///
/// let link = validate_shared_link("  https://www.dropbox.com/sh/abc123/AADxyz?dl=0 ").unwrap();
/// assert_eq!(link, "https://www.dropbox.com/sh/abc123/AADxyz?dl=0");
///
/// assert!(validate_shared_link("https://example.com/sh/abc123").is_err());
/// ```
pub fn validate_shared_link(input: &str) -> Result<String> {
    let trimmed = input.trim();

    if LEGACY_FOLDER_LINK_REGEX.is_match(trimmed) || SCL_FOLDER_LINK_REGEX.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    Err(SyncError::InvalidSharedLink(input.to_string()))
}

/// Check that a remote name can be used as a single local path component.
///
/// Names containing path separators, NUL, or consisting only of dots would
/// escape or alias the destination directory.
pub fn safe_component(name: &str) -> Result<&str> {
    let unsafe_name = name.is_empty()
        || name.chars().all(|c| c == '.')
        || name.contains(['/', '\\', '\0']);

    if unsafe_name {
        return Err(SyncError::UnsafeName(name.to_string()));
    }

    Ok(name)
}
