//! OAuth2 authorization-code flow with a loopback redirect.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::config::AuthConfig;
use crate::error::{Result, SyncError};
use crate::listener::{load_bridge_page, RedirectListener};
use crate::models::{TokenErrorResponse, TokenResponse};
use crate::prompt::{BrowserLauncher, Prompter};
use crate::settings::{Settings, SettingsStore};

/// Dropbox OAuth2 authorization endpoint.
const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";

/// Dropbox OAuth2 token endpoint.
const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

/// Scopes requested when authorizing.
pub const AUTHORIZE_SCOPES: &[&str] = &[
    "files.metadata.read",
    "files.content.read",
    "account_info.read",
    "sharing.read",
];

/// Scopes requested when refreshing before a sync.
pub const REFRESH_SCOPES: &[&str] = &["files.metadata.read", "files.content.read", "sharing.read"];

/// Whether previously granted scopes are folded into the new token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeGrantedScopes {
    #[default]
    None,
    User,
    Team,
}

impl IncludeGrantedScopes {
    fn as_param(self) -> Option<&'static str> {
        match self {
            IncludeGrantedScopes::None => None,
            IncludeGrantedScopes::User => Some("user"),
            IncludeGrantedScopes::Team => Some("team"),
        }
    }
}

/// OAuth2 endpoint locations.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

/// A token issued by the token endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub uid: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl TokenGrant {
    fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            uid: response.uid.or(response.account_id).unwrap_or_default(),
            expires_at: response.expires_in.and_then(|secs| expiry_after(now, secs)),
            scopes: response
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// `now + secs`, or `None` if the lifetime does not fit a timestamp.
fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let lifetime = i64::try_from(secs).ok().and_then(Duration::try_seconds)?;
    now.checked_add_signed(lifetime)
}

/// Generate the anti-forgery `state` value.
pub fn new_state() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Build the URL the user visits to authorize the app.
pub fn authorize_url(
    endpoint: &str,
    client_id: &str,
    redirect_uri: &Url,
    state: &str,
    scopes: &[&str],
    include_granted_scopes: IncludeGrantedScopes,
) -> Result<Url> {
    let mut url = Url::parse(endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("state", state)
            .append_pair("token_access_type", "offline");
        if !scopes.is_empty() {
            query.append_pair("scope", &scopes.join(" "));
        }
        if let Some(include) = include_granted_scopes.as_param() {
            query.append_pair("include_granted_scopes", include);
        }
    }
    Ok(url)
}

/// Extract the authorization code from a captured redirect.
///
/// Parameters are read from the query and, failing that, the fragment. A
/// provider `error` takes precedence; otherwise `state` must match.
pub fn parse_authorization_response(captured: &Url, expected_state: &str) -> Result<String> {
    let mut params: Vec<(String, String)> = captured
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if let Some(fragment) = captured.fragment() {
        params.extend(
            url::form_urlencoded::parse(fragment.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
    }

    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    if let Some(error) = param("error") {
        return Err(SyncError::AuthorizationDenied {
            error,
            description: param("error_description"),
        });
    }

    if param("state").as_deref() != Some(expected_state) {
        return Err(SyncError::StateMismatch);
    }

    param("code")
        .filter(|code| !code.is_empty())
        .ok_or_else(|| SyncError::AuthorizationError("No code in redirect".to_string()))
}

/// Drives the interactive authorization and token refresh.
pub struct Authorizer {
    config: AuthConfig,
    endpoints: OAuthEndpoints,
    http: Client,
    prompter: Box<dyn Prompter>,
    browser: Box<dyn BrowserLauncher>,
}

impl Authorizer {
    pub fn new(
        config: AuthConfig,
        http: Client,
        prompter: Box<dyn Prompter>,
        browser: Box<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            endpoints: OAuthEndpoints::default(),
            http,
            prompter,
            browser,
        }
    }

    /// Use different OAuth2 endpoints.
    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Return the user id for the stored token, authorizing first if needed.
    ///
    /// A stored token is trusted as-is; expiry is handled by
    /// [`Authorizer::refresh_if_needed`].
    pub async fn acquire_token(
        &self,
        settings: &mut Settings,
        store: &dyn SettingsStore,
        scopes: &[&str],
        include_granted_scopes: IncludeGrantedScopes,
    ) -> Result<String> {
        if let Some(uid) = settings.cached_uid() {
            debug!("Using stored access token for uid {}", uid);
            return Ok(uid.to_string());
        }

        if !settings.has_api_credentials() {
            if settings.api_key.is_empty() {
                settings.api_key = self.prompter.input("API Key", false)?;
            }
            if settings.api_secret.is_empty() {
                settings.api_secret = self.prompter.secret("API Secret Key")?;
            }
            store.save(settings)?;
        }

        info!("Waiting for credentials");

        let bridge_page = load_bridge_page(&self.config.bridge_page)?;
        let listener =
            RedirectListener::bind(self.config.listen_addr, bridge_page, self.config.step_timeout).await?;
        let redirect_uri = listener.redirect_uri()?;

        let state = new_state();
        let url = authorize_url(
            &self.endpoints.authorize_url,
            &settings.api_key,
            &redirect_uri,
            &state,
            scopes,
            include_granted_scopes,
        )?;

        self.browser.open(url.as_str())?;

        let captured = listener.capture().await?;
        drop(listener);

        let code = parse_authorization_response(&captured, &state)?;

        info!("Exchanging code for token");
        let grant = self.exchange_code(settings, &code, &redirect_uri).await?;
        if grant.uid.is_empty() {
            return Err(SyncError::AuthorizationError(
                "Token response did not include a user id".to_string(),
            ));
        }
        info!("Finished exchanging code for token");

        log_grant(&grant);
        settings.apply_grant(&grant);
        store.save(settings)?;

        Ok(grant.uid)
    }

    /// Refresh the access token if it is expired or its expiry is unknown.
    ///
    /// Returns true if a new token was stored.
    pub async fn refresh_if_needed(
        &self,
        settings: &mut Settings,
        store: &dyn SettingsStore,
        scopes: &[&str],
    ) -> Result<bool> {
        if !settings.needs_refresh(Utc::now()) {
            return Ok(false);
        }

        info!("Refreshing access token");
        let scope = scopes.join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", settings.refresh_token.as_str()),
            ("client_id", settings.api_key.as_str()),
            ("client_secret", settings.api_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let grant = self
            .request_token(&params)
            .await
            .map_err(|e| SyncError::TokenRefreshError(e.to_string()))?;

        debug!("Refreshed access token, expires at {:?}", grant.expires_at);
        settings.apply_grant(&grant);
        store.save(settings)?;

        Ok(true)
    }

    async fn exchange_code(&self, settings: &Settings, code: &str, redirect_uri: &Url) -> Result<TokenGrant> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", settings.api_key.as_str()),
            ("client_secret", settings.api_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ];

        self.request_token(&params).await
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(error) => match error.error_description {
                    Some(description) => format!("{}: {}", error.error, description),
                    None => error.error,
                },
                Err(_) => body,
            };
            return Err(SyncError::AuthorizationError(format!(
                "Status {}: {}",
                status, message
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(TokenGrant::from_response(token_response, Utc::now()))
    }
}

fn log_grant(grant: &TokenGrant) {
    info!("Uid: {}", grant.uid);
    if grant.refresh_token.is_some() {
        debug!("Received refresh token");
    }
    if let Some(expires_at) = grant.expires_at {
        info!("ExpiresAt: {}", expires_at);
    }
    if !grant.scopes.is_empty() {
        info!("Scopes: {}", grant.scopes.join(" "));
    }
}
