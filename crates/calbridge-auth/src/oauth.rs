//! OAuth 2.0 authorization-code client for the calendar provider.
//!
//! This module owns the provider-facing half of the flow: building the
//! authorization URL handed to the user, exchanging the callback code for
//! tokens, and refreshing expired access tokens. The loopback redirect that
//! produces the code is handled by the callback listener.
//!
//! The authorization request always asks for offline access and forced
//! consent: access tokens alone cannot satisfy unattended refresh later, so
//! a refresh token must be issued on every new authorization.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{AuthError, AuthResult};

/// Provider authorization endpoint.
pub const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Provider token endpoint.
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Tokens returned by the provider for one exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    /// The access token for API requests.
    pub access_token: String,
    /// Refresh token, when the provider issued or rotated one.
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: Option<i64>,
    /// Scopes the provider reports as granted.
    pub scopes: Vec<String>,
}

/// OAuth client for the calendar provider's token endpoints.
#[derive(Debug)]
pub struct OAuthClient {
    client_config: ClientConfig,
    http_client: reqwest::Client,
    auth_endpoint: String,
    token_endpoint: String,
}

impl OAuthClient {
    /// Creates a new OAuth client with the given application credentials.
    pub fn new(client_config: ClientConfig, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");

        Self {
            client_config,
            http_client,
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    /// Overrides the provider endpoints.
    #[must_use]
    pub fn with_endpoints(
        mut self,
        auth_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.auth_endpoint = auth_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self
    }

    /// Builds the authorization URL for one session.
    ///
    /// The redirect URI must match the one the callback listener is bound to
    /// exactly; the provider rejects mismatches.
    pub fn authorization_url(&self, redirect_uri: &str, scopes: &[String], state: &str) -> String {
        let scope = scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&\
            access_type=offline&include_granted_scopes=true&prompt=consent",
            self.auth_endpoint,
            urlencoding::encode(&self.client_config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(state),
        )
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AuthResult<TokenGrant> {
        let params = [
            ("client_id", self.client_config.client_id.as_str()),
            ("client_secret", self.client_config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let (status, body) = self.post_token_request(&params, "token exchange").await?;

        if !status.is_success() {
            return Err(AuthError::exchange_failed(format!(
                "provider rejected the code ({status}): {body}"
            )));
        }

        let grant = parse_token_response(&body)
            .map_err(|e| AuthError::exchange_failed(format!("invalid token response: {e}")))?;

        info!("authorization code exchanged for tokens");
        Ok(grant)
    }

    /// Refreshes an expired access token.
    ///
    /// The returned grant carries a refresh token only when the provider
    /// rotated it.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant> {
        let params = [
            ("client_id", self.client_config.client_id.as_str()),
            ("client_secret", self.client_config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let (status, body) = self.post_token_request(&params, "token refresh").await?;

        if !status.is_success() {
            return Err(AuthError::refresh_failed(format!(
                "provider rejected the refresh ({status}): {body}"
            )));
        }

        let grant = parse_token_response(&body)
            .map_err(|e| AuthError::refresh_failed(format!("invalid token response: {e}")))?;

        debug!("access token refreshed");
        Ok(grant)
    }

    async fn post_token_request(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> AuthResult<(reqwest::StatusCode, String)> {
        let response = self
            .http_client
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::network(format!("{what} request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::network(format!("failed to read {what} response: {e}")))?;

        Ok((status, body))
    }
}

/// Response from the provider's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

fn parse_token_response(body: &str) -> Result<TokenGrant, serde_json::Error> {
    let response: TokenResponse = serde_json::from_str(body)?;
    Ok(TokenGrant {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_in: response.expires_in,
        scopes: response
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    })
}
