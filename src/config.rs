//! Provider endpoints, local callback settings and file locations

use std::path::PathBuf;
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::error::{AuthError, Result};

/// Digi-Key authorization endpoint (browser facing)
pub const DEFAULT_AUTH_URL: &str = "https://api.digikey.com/v1/oauth2/authorize";
/// Digi-Key token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://api.digikey.com/v1/oauth2/token";
/// Redirect URI registered for the application
pub const DEFAULT_REDIRECT_URI: &str = "https://localhost:5000/callback";
/// Port the local callback listener binds
pub const DEFAULT_CALLBACK_PORT: u16 = 5000;
/// How long a round-trip waits for the browser redirect
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);
/// Tokens this close to expiry are treated as expired
pub const DEFAULT_EXPIRY_LEEWAY: Duration = Duration::from_secs(60);
/// Token endpoint request timeout
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const APP_DIR: &str = "digikey-oauth";

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_credentials_path() -> PathBuf {
    config_dir().join("credentials.env")
}

fn default_tls_dir() -> PathBuf {
    config_dir().join("tls")
}

/// Credential lifecycle configuration
///
/// ```
/// use digikey_oauth::OAuthConfig;
/// use std::time::Duration;
///
/// let config = OAuthConfig::builder()
///     .credentials_path("/tmp/dk/credentials.env")
///     .callback_timeout(Duration::from_secs(60))
///     .build();
/// assert_eq!(config.callback_port, 5000);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct OAuthConfig {
    /// Authorization endpoint URL
    #[builder(default = DEFAULT_AUTH_URL.to_string(), setter(into))]
    pub auth_url: String,

    /// Token endpoint URL
    #[builder(default = DEFAULT_TOKEN_URL.to_string(), setter(into))]
    pub token_url: String,

    /// Redirect URI sent to the provider; must point at the callback listener
    #[builder(default = DEFAULT_REDIRECT_URI.to_string(), setter(into))]
    pub redirect_uri: String,

    /// Local port for the callback listener (0 picks an ephemeral port)
    #[builder(default = DEFAULT_CALLBACK_PORT)]
    pub callback_port: u16,

    /// Maximum wait for the provider redirect
    #[builder(default = DEFAULT_CALLBACK_TIMEOUT)]
    pub callback_timeout: Duration,

    /// Tokens expiring within this window are refreshed early
    #[builder(default = DEFAULT_EXPIRY_LEEWAY)]
    pub expiry_leeway: Duration,

    /// Token endpoint request timeout
    #[builder(default = DEFAULT_HTTP_TIMEOUT)]
    pub http_timeout: Duration,

    /// Key=value credential file
    #[builder(default = default_credentials_path(), setter(into))]
    pub credentials_path: PathBuf,

    /// Directory holding `key.pem` and `cert.pem` for the listener
    #[builder(default = default_tls_dir(), setter(into))]
    pub tls_dir: PathBuf,

    /// Open the system browser automatically (default: true)
    #[builder(default = true)]
    pub auto_open_browser: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl OAuthConfig {
    /// Build configuration from defaults overridden by `DK_*` environment variables
    ///
    /// Recognized variables: `DK_AUTH_URL`, `DK_TOKEN_URL`, `DK_REDIRECT_URI`,
    /// `DK_CALLBACK_PORT`, `DK_CALLBACK_TIMEOUT_SECS`, `DK_CREDENTIALS_FILE`,
    /// `DK_TLS_DIR`, `DK_NO_BROWSER`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a numeric variable does not parse or the
    /// resulting URLs are malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("DK_AUTH_URL") {
            config.auth_url = v;
        }
        if let Some(v) = lookup("DK_TOKEN_URL") {
            config.token_url = v;
        }
        if let Some(v) = lookup("DK_REDIRECT_URI") {
            config.redirect_uri = v;
        }
        if let Some(v) = lookup("DK_CALLBACK_PORT") {
            config.callback_port = v
                .trim()
                .parse()
                .map_err(|e| AuthError::invalid_config(format!("DK_CALLBACK_PORT={v}: {e}")))?;
        }
        if let Some(v) = lookup("DK_CALLBACK_TIMEOUT_SECS") {
            let secs: u64 = v.trim().parse().map_err(|e| {
                AuthError::invalid_config(format!("DK_CALLBACK_TIMEOUT_SECS={v}: {e}"))
            })?;
            config.callback_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("DK_CREDENTIALS_FILE") {
            config.credentials_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DK_TLS_DIR") {
            config.tls_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DK_NO_BROWSER") {
            config.auto_open_browser = !(v == "1" || v.eq_ignore_ascii_case("true"));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every endpoint parses as an absolute URL
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("auth_url", &self.auth_url),
            ("token_url", &self.token_url),
            ("redirect_uri", &self.redirect_uri),
        ] {
            url::Url::parse(value)
                .map_err(|e| AuthError::invalid_config(format!("{name} '{value}': {e}")))?;
        }
        if self.callback_timeout.is_zero() {
            return Err(AuthError::invalid_config("callback_timeout must be non-zero"));
        }
        Ok(())
    }

    /// Path of the listener's private key
    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.tls_dir.join("key.pem")
    }

    /// Path of the listener's certificate
    #[must_use]
    pub fn cert_path(&self) -> PathBuf {
        self.tls_dir.join("cert.pem")
    }

    /// Build the provider authorization URL for a client and optional `state`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `auth_url` is not a valid URL.
    pub fn authorization_url(&self, client_id: &str, state: Option<&str>) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.auth_url)
            .map_err(|e| AuthError::invalid_config(format!("auth_url: {e}")))?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", client_id);
            params.append_pair("redirect_uri", &self.redirect_uri);
            if let Some(state) = state {
                params.append_pair("state", state);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OAuthConfig::default();
        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(config.callback_port, 5000);
        assert_eq!(config.callback_timeout, Duration::from_secs(120));
        assert!(config.auto_open_browser);
        assert!(config.key_path().ends_with("tls/key.pem"));
        assert!(config.cert_path().ends_with("tls/cert.pem"));
    }

    #[test]
    fn test_env_overrides() {
        let config = OAuthConfig::from_lookup(lookup(&[
            ("DK_CALLBACK_PORT", "8443"),
            ("DK_CALLBACK_TIMEOUT_SECS", "30"),
            ("DK_CREDENTIALS_FILE", "/tmp/dk.env"),
            ("DK_NO_BROWSER", "1"),
            ("DK_REDIRECT_URI", "https://localhost:8443/callback"),
        ]))
        .unwrap();

        assert_eq!(config.callback_port, 8443);
        assert_eq!(config.callback_timeout, Duration::from_secs(30));
        assert_eq!(config.credentials_path, PathBuf::from("/tmp/dk.env"));
        assert!(!config.auto_open_browser);
        assert_eq!(config.redirect_uri, "https://localhost:8443/callback");
    }

    #[test]
    fn test_env_rejects_bad_port() {
        let err = OAuthConfig::from_lookup(lookup(&[("DK_CALLBACK_PORT", "https")])).unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_relative_url() {
        let config = OAuthConfig::builder().token_url("/oauth2/token").build();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("token_url"));
    }

    #[test]
    fn test_authorization_url_params() {
        let config = OAuthConfig::default();
        let url = config.authorization_url("my client", Some("xyz")).unwrap();
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/v1/oauth2/authorize");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "my client");
        assert_eq!(pairs["redirect_uri"], DEFAULT_REDIRECT_URI);
        assert_eq!(pairs["state"], "xyz");
    }

    #[test]
    fn test_authorization_url_without_state() {
        let url = OAuthConfig::default()
            .authorization_url("abc", None)
            .unwrap();
        assert!(!url.query_pairs().any(|(k, _)| k == "state"));
    }
}
