//! Coordinator configuration and provider client credentials.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AuthError, AuthResult};

/// OAuth 2.0 client credentials for the calendar provider.
///
/// These identify the application itself, not a user. They come from the
/// provider's developer console and are loaded from a secrets JSON file.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The OAuth 2.0 client id.
    pub client_id: String,
    /// The OAuth 2.0 client secret.
    pub client_secret: String,
}

/// Structure of the provider's client secrets JSON file.
///
/// Supports the console download format with a `web` or `installed` section,
/// plus the flat format with `client_id`/`client_secret` at the root.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    web: Option<NestedSecrets>,
    installed: Option<NestedSecrets>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedSecrets {
    client_id: String,
    client_secret: String,
}

impl ClientConfig {
    /// Creates client credentials from raw values.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Loads client credentials from a secrets JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingClientConfig`] if the file cannot be read
    /// or does not contain usable credentials.
    pub fn from_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::missing_client_config(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parses client credentials from a secrets JSON string.
    pub fn from_json(json: &str) -> AuthResult<Self> {
        let file: ClientSecretsFile = serde_json::from_str(json)
            .map_err(|e| AuthError::missing_client_config(format!("invalid secrets JSON: {e}")))?;

        if let Some(secrets) = file.web.or(file.installed) {
            return Ok(Self::new(secrets.client_id, secrets.client_secret));
        }

        if let (Some(client_id), Some(client_secret)) = (file.client_id, file.client_secret) {
            return Ok(Self::new(client_id, client_secret));
        }

        Err(AuthError::missing_client_config(
            "secrets file must contain a 'web'/'installed' section or root-level client_id/client_secret",
        ))
    }

    /// Checks that the credentials are plausibly usable.
    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.is_empty() {
            return Err(AuthError::missing_client_config("client_id is empty"));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::missing_client_config("client_secret is empty"));
        }
        Ok(())
    }
}

/// Configuration for the authorization coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Path to the provider client secrets JSON file.
    pub client_secrets_path: PathBuf,

    /// Directory holding per-user credential and profile records.
    pub storage_dir: PathBuf,

    /// OAuth scopes to request.
    pub scopes: Vec<String>,

    /// Loopback port range probed for the callback listener, inclusive.
    pub port_range: (u16, u16),

    /// Interval between completion monitor checks.
    pub poll_interval: Duration,

    /// Overall deadline for one authorization attempt. Also bounds the
    /// lifetime of a pending session.
    pub auth_timeout: Duration,

    /// Timeout for HTTP requests to the provider.
    pub http_timeout: Duration,

    /// Timezone reported for users whose profile carries none.
    pub default_timezone: String,

    /// Provider authorization endpoint.
    pub auth_endpoint: String,

    /// Provider token endpoint.
    pub token_endpoint: String,

    /// Base URL of the calendar API, used for profile snapshots.
    pub calendar_api_base: String,
}

impl CoordinatorConfig {
    /// Default OAuth scope: read/write calendar access. Offline refresh of a
    /// narrower scope set is possible but the event write path needs this one.
    pub const DEFAULT_SCOPE: &'static str = "https://www.googleapis.com/auth/calendar";

    /// Creates a configuration with defaults, reading client secrets from the
    /// given path.
    pub fn new(client_secrets_path: impl Into<PathBuf>) -> Self {
        Self {
            client_secrets_path: client_secrets_path.into(),
            storage_dir: Self::default_storage_dir(),
            scopes: vec![Self::DEFAULT_SCOPE.to_string()],
            port_range: (8080, 8089),
            poll_interval: Duration::from_secs(3),
            auth_timeout: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            default_timezone: "UTC".to_string(),
            auth_endpoint: crate::oauth::AUTH_ENDPOINT.to_string(),
            token_endpoint: crate::oauth::TOKEN_ENDPOINT.to_string(),
            calendar_api_base: crate::profile::CALENDAR_API_BASE.to_string(),
        }
    }

    /// Returns the default per-user record directory.
    pub fn default_storage_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".local").join("share"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calbridge")
            .join("users")
    }

    /// Sets the storage directory.
    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Sets the OAuth scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Sets the loopback port range probed at listener startup.
    #[must_use]
    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    /// Sets the completion monitor poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the overall authorization deadline.
    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the provider HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the fallback timezone.
    #[must_use]
    pub fn with_default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    /// Overrides the provider authorization and token endpoints.
    #[must_use]
    pub fn with_provider_endpoints(
        mut self,
        auth_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.auth_endpoint = auth_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self
    }

    /// Overrides the calendar API base URL.
    #[must_use]
    pub fn with_calendar_api_base(mut self, base: impl Into<String>) -> Self {
        self.calendar_api_base = base.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> AuthResult<()> {
        if self.scopes.is_empty() {
            return Err(AuthError::internal("at least one OAuth scope is required"));
        }
        if self.port_range.0 > self.port_range.1 {
            return Err(AuthError::internal(format!(
                "invalid port range {}-{}",
                self.port_range.0, self.port_range.1
            )));
        }
        if self.poll_interval.is_zero() || self.auth_timeout.is_zero() {
            return Err(AuthError::internal(
                "poll interval and authorization timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_from_json_web() {
        let json = r#"{
            "web": {
                "client_id": "web-id.apps.googleusercontent.com",
                "client_secret": "web-secret",
                "redirect_uris": ["http://localhost:8080/oauth2callback"]
            }
        }"#;

        let config = ClientConfig::from_json(json).unwrap();
        assert_eq!(config.client_id, "web-id.apps.googleusercontent.com");
        assert_eq!(config.client_secret, "web-secret");
    }

    #[test]
    fn secrets_from_json_installed() {
        let json = r#"{
            "installed": {
                "client_id": "desktop-id.apps.googleusercontent.com",
                "client_secret": "desktop-secret"
            }
        }"#;

        let config = ClientConfig::from_json(json).unwrap();
        assert_eq!(config.client_id, "desktop-id.apps.googleusercontent.com");
    }

    #[test]
    fn secrets_from_json_flat() {
        let json = r#"{
            "client_id": "flat-id.apps.googleusercontent.com",
            "client_secret": "flat-secret",
            "refresh_token": "unused-here"
        }"#;

        let config = ClientConfig::from_json(json).unwrap();
        assert_eq!(config.client_secret, "flat-secret");
    }

    #[test]
    fn secrets_missing_sections() {
        let result = ClientConfig::from_json(r#"{ "other": {} }"#);
        assert!(matches!(
            result,
            Err(AuthError::MissingClientConfig { .. })
        ));
    }

    #[test]
    fn secrets_malformed_json() {
        let result = ClientConfig::from_json("not json");
        assert!(matches!(
            result,
            Err(AuthError::MissingClientConfig { .. })
        ));
    }

    #[test]
    fn secrets_file_absent() {
        let result = ClientConfig::from_file("/nonexistent/credentials.json");
        assert!(matches!(
            result,
            Err(AuthError::MissingClientConfig { .. })
        ));
    }

    #[test]
    fn client_config_validation() {
        assert!(ClientConfig::new("id", "secret").validate().is_ok());
        assert!(ClientConfig::new("", "secret").validate().is_err());
        assert!(ClientConfig::new("id", "").validate().is_err());
    }

    #[test]
    fn coordinator_defaults() {
        let config = CoordinatorConfig::new("credentials.json");
        assert_eq!(config.port_range, (8080, 8089));
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.auth_timeout, Duration::from_secs(300));
        assert_eq!(
            config.scopes,
            vec![CoordinatorConfig::DEFAULT_SCOPE.to_string()]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn coordinator_builder_methods() {
        let config = CoordinatorConfig::new("credentials.json")
            .with_storage_dir("/tmp/users")
            .with_port_range(9000, 9009)
            .with_poll_interval(Duration::from_millis(100))
            .with_auth_timeout(Duration::from_secs(10))
            .with_default_timezone("Asia/Almaty");

        assert_eq!(config.storage_dir, PathBuf::from("/tmp/users"));
        assert_eq!(config.port_range, (9000, 9009));
        assert_eq!(config.default_timezone, "Asia/Almaty");
    }

    #[test]
    fn coordinator_rejects_bad_ranges() {
        let config = CoordinatorConfig::new("credentials.json").with_port_range(9010, 9000);
        assert!(config.validate().is_err());

        let config = CoordinatorConfig::new("credentials.json").with_scopes(vec![]);
        assert!(config.validate().is_err());
    }
}
