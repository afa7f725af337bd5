//! Token endpoint exchanges
//!
//! Two grants are supported: an authorization code, and a refresh token. Both
//! answer with a complete [`TokenPair`] whose expiries are anchored at the
//! moment the response arrived.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use super::token::{ClientCredentials, TokenPair};
use crate::clock::Clock;
use crate::config::{DEFAULT_HTTP_TIMEOUT, OAuthConfig};
use crate::error::{AuthError, Result};
use crate::utils::{MAX_LOGGED_BODY, truncate_for_display};

/// Obtains token pairs from the provider
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Trade an authorization code for a token pair
    ///
    /// # Errors
    ///
    /// `Provider` on a non-200 answer, `InvalidResponse` when a field is
    /// missing, `Http` on transport failure.
    async fn exchange_code(
        &self,
        code: &str,
        client: &ClientCredentials,
        redirect_uri: &str,
    ) -> Result<TokenPair>;

    /// Trade a refresh token for a new token pair
    ///
    /// The returned refresh token replaces the old one.
    ///
    /// # Errors
    ///
    /// Same as [`exchange_code`](Self::exchange_code).
    async fn exchange_refresh(
        &self,
        client: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenPair>;
}

/// Form-encoded exchanges against the provider's token endpoint
#[derive(Debug, Clone)]
pub struct HttpTokenExchanger {
    http: reqwest::Client,
    token_url: String,
    clock: Arc<dyn Clock>,
}

impl HttpTokenExchanger {
    /// Create an exchanger with a client bounded by the default request timeout
    ///
    /// # Errors
    ///
    /// Returns `Http` if the HTTP client cannot be constructed.
    pub fn new(token_url: impl Into<String>, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, token_url, clock))
    }

    /// Create an exchanger for the configured token endpoint and timeout
    ///
    /// # Errors
    ///
    /// Returns `Http` if the HTTP client cannot be constructed.
    pub fn from_config(config: &OAuthConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self::with_client(http, config.token_url.clone(), clock))
    }

    /// Use a caller-supplied HTTP client
    pub fn with_client(
        http: reqwest::Client,
        token_url: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            clock,
        }
    }

    /// Token endpoint URL
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn request(&self, grant_type: &str, form: &[(&str, &str)]) -> Result<TokenPair> {
        tracing::debug!(grant_type, url = %self.token_url, "Requesting tokens");

        let response = self.http.post(&self.token_url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        let now = self.clock.now();

        if status != reqwest::StatusCode::OK {
            tracing::warn!(
                status = status.as_u16(),
                grant_type,
                body = %truncate_for_display(&body, MAX_LOGGED_BODY),
                "Token endpoint rejected request"
            );
            return Err(AuthError::provider(status.as_u16(), body));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::invalid_response(format!(
                "{e}: {}",
                truncate_for_display(&body, MAX_LOGGED_BODY)
            ))
        })?;

        let pair = parsed.into_pair(now)?;
        tracing::debug!(
            grant_type,
            access_token_expiry = pair.access_token_expiry,
            refresh_token_expiry = pair.refresh_token_expiry,
            "Token exchange succeeded"
        );
        Ok(pair)
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange_code(
        &self,
        code: &str,
        client: &ClientCredentials,
        redirect_uri: &str,
    ) -> Result<TokenPair> {
        self.request(
            "authorization_code",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &client.client_id),
                ("client_secret", &client.client_secret),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    async fn exchange_refresh(
        &self,
        client: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenPair> {
        self.request(
            "refresh_token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &client.client_id),
                ("client_secret", &client.client_secret),
            ],
        )
        .await
    }
}

/// Token endpoint success payload
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default, deserialize_with = "lifetime")]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lifetime")]
    refresh_token_expires_in: Option<u64>,
}

impl TokenResponse {
    fn into_pair(self, now: u64) -> Result<TokenPair> {
        let access_token = non_empty_token(self.access_token, "access_token")?;
        let expires_in = lifetime_secs(self.expires_in, "expires_in")?;
        let refresh_token = non_empty_token(self.refresh_token, "refresh_token")?;
        let refresh_expires_in =
            lifetime_secs(self.refresh_token_expires_in, "refresh_token_expires_in")?;

        Ok(TokenPair::from_lifetimes(
            now,
            access_token,
            expires_in,
            refresh_token,
            refresh_expires_in,
        ))
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| AuthError::invalid_response(format!("missing field `{field}`")))
}

fn non_empty_token(value: Option<String>, field: &str) -> Result<String> {
    let value = required(value, field)?;
    if value.trim().is_empty() {
        return Err(AuthError::invalid_response(format!("empty field `{field}`")));
    }
    Ok(value)
}

/// A zero lifetime yields a token that is already expired when saved
fn lifetime_secs(value: Option<u64>, field: &str) -> Result<u64> {
    match required(value, field)? {
        0 => Err(AuthError::invalid_response(format!("non-positive lifetime `{field}`"))),
        secs => Ok(secs),
    }
}

/// Lifetimes arrive as numbers or as numeric strings
fn lifetime<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lifetime {
        Whole(u64),
        Fractional(f64),
        Text(String),
    }

    match Option::<Lifetime>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Lifetime::Whole(secs)) => Ok(Some(secs)),
        Some(Lifetime::Fractional(secs)) if secs.is_finite() && secs >= 0.0 => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let whole = secs.round() as u64;
            Ok(Some(whole))
        }
        Some(Lifetime::Fractional(secs)) => Err(de::Error::custom(format!(
            "invalid token lifetime {secs}"
        ))),
        Some(Lifetime::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid token lifetime '{text}': {e}"))),
    }
}
