//! Dropbox API client for shared-link operations.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::models::{ApiErrorResponse, Entry, FullAccount, ListFolderResponse, SharedLinkMetadata};

/// Base URL for RPC endpoints.
const API_BASE: &str = "https://api.dropboxapi.com";

/// Base URL for content download endpoints.
const CONTENT_BASE: &str = "https://content.dropboxapi.com";

/// The remote side of a sync: everything the sync driver asks the provider.
#[async_trait]
pub trait RemoteSource {
    /// Resolve a shared link to its metadata (notably its name).
    async fn shared_link_metadata(&self, link: &str) -> Result<SharedLinkMetadata>;

    /// List every entry at the root of a shared link.
    async fn list_entries(&self, link: &str) -> Result<Vec<Entry>>;

    /// Stream the file at `path` inside the shared link into `sink`.
    ///
    /// Returns the number of bytes written.
    async fn download(
        &self,
        link: &str,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;
}

/// Client for reading shared links.
pub struct SharedLinkClient {
    access_token: String,
    http: Client,
    api_base: String,
    content_base: String,
}

impl SharedLinkClient {
    /// Create a new SharedLinkClient.
    ///
    /// # Arguments
    /// * `access_token` - OAuth2 bearer token
    /// * `http` - HTTP client carrying the transport timeouts
    pub fn new(access_token: String, http: Client) -> Self {
        Self {
            access_token,
            http,
            api_base: API_BASE.to_string(),
            content_base: CONTENT_BASE.to_string(),
        }
    }

    /// Point the client at different API hosts.
    pub fn with_base_urls(mut self, api_base: impl Into<String>, content_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.content_base = content_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Get information about the authorized account.
    pub async fn current_account(&self) -> Result<FullAccount> {
        let url = format!("{}/2/users/get_current_account", self.api_base);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let response = check_status(response, &url).await?;
        Ok(response.json().await?)
    }

    /// Make an RPC-style call with a JSON body.
    async fn rpc<T: DeserializeOwned>(&self, endpoint: &str, body: &serde_json::Value) -> Result<T> {
        let url = format!("{}/2/{}", self.api_base, endpoint);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;

        let response = check_status(response, &url).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RemoteSource for SharedLinkClient {
    async fn shared_link_metadata(&self, link: &str) -> Result<SharedLinkMetadata> {
        let body = serde_json::json!({ "url": link });
        self.rpc("sharing/get_shared_link_metadata", &body).await
    }

    async fn list_entries(&self, link: &str) -> Result<Vec<Entry>> {
        let body = serde_json::json!({
            "path": "",
            "shared_link": { "url": link }
        });

        let mut page: ListFolderResponse = self.rpc("files/list_folder", &body).await?;
        let mut entries = page.entries;

        while page.has_more {
            let body = serde_json::json!({ "cursor": page.cursor });
            page = self.rpc("files/list_folder/continue", &body).await?;
            entries.extend(page.entries);
        }

        Ok(entries)
    }

    async fn download(
        &self,
        link: &str,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let url = format!("{}/2/sharing/get_shared_link_file", self.content_base);
        let arg = header_safe_json(&serde_json::json!({ "url": link, "path": path }))?;
        debug!("POST {} {}", url, arg);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("Dropbox-API-Arg", arg)
            .send()
            .await?;

        let response = check_status(response, &url).await?;

        // Stream to sink
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        sink.flush().await?;

        Ok(written)
    }
}

/// Turn a non-success response into an API error.
async fn check_status(response: Response, request_uri: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorResponse>(&error_body) {
        Ok(api_error) => api_error.error_summary,
        Err(_) => error_body,
    };

    Err(SyncError::ApiError {
        status: status.as_u16(),
        message,
        request_uri: Some(request_uri.to_string()),
    })
}

/// Serialize JSON for an HTTP header, escaping non-ASCII as `\uXXXX`.
pub fn header_safe_json(value: &serde_json::Value) -> Result<String> {
    let json = serde_json::to_string(value)?;
    let mut escaped = String::with_capacity(json.len());

    for c in json.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }

    Ok(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_safe_json_ascii_untouched() {
        let value = serde_json::json!({ "url": "https://www.dropbox.com/sh/a/b", "path": "/a.jpg" });
        let header = header_safe_json(&value).unwrap();
        assert_eq!(header, serde_json::to_string(&value).unwrap());
    }

    #[test]
    fn test_header_safe_json_escapes_non_ascii() {
        let value = serde_json::json!({ "path": "/café 📷.jpg" });
        let header = header_safe_json(&value).unwrap();
        assert!(header.is_ascii());
        assert!(header.contains("caf\\u00e9"));
        assert!(header.contains("\\ud83d\\udcf7"));

        let decoded: serde_json::Value = serde_json::from_str(&header).unwrap();
        assert_eq!(decoded, value);
    }
}
