//! Credential lifecycle orchestration
//!
//! [`TokenManager`] is the single entry point consumers use. Each call to
//! [`TokenManager::access_token`] loads the stored record and takes exactly one
//! of three paths:
//!
//! | Stored state | Action |
//! |---|---|
//! | refresh token absent or expired | browser round-trip, code exchange, save |
//! | access token absent or expired | refresh exchange, save |
//! | both valid | return the stored access token, no network I/O |
//!
//! Calls are serialized within the process by an async mutex and across
//! processes by the credential store's file lock, so concurrent callers never
//! refresh twice. Nothing is written unless an exchange succeeded.

use std::fmt;
use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use super::exchange::{HttpTokenExchanger, TokenExchanger};
use super::flow::{AuthorizationFlow, BrowserAuthorization};
use super::store::{CredentialStore, StoreLock};
use super::token::{Assessment, ClientCredentials, CredentialRecord, CredentialState, TokenPair};
use crate::clock::{Clock, SystemClock};
use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};

/// Header carrying the application's client id on catalog API calls
pub const CLIENT_ID_HEADER: &str = "x-digikey-client-id";

/// Builder for [`TokenManager`]
///
/// Every component defaults to the production implementation derived from the
/// configuration.
#[derive(Default)]
pub struct TokenManagerBuilder {
    config: Option<OAuthConfig>,
    store: Option<CredentialStore>,
    exchanger: Option<Arc<dyn TokenExchanger>>,
    authorizer: Option<Arc<dyn AuthorizationFlow>>,
    clock: Option<Arc<dyn Clock>>,
    client: Option<ClientCredentials>,
}

impl TokenManagerBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: OAuthConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a specific credential store instead of `config.credentials_path`
    #[must_use]
    pub fn store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom token exchanger
    #[must_use]
    pub fn exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Use a custom authorization flow
    #[must_use]
    pub fn authorizer(mut self, authorizer: Arc<dyn AuthorizationFlow>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Use a custom clock for expiry computations
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use these client credentials instead of resolving them from the
    /// environment or the credential file
    #[must_use]
    pub fn client_credentials(mut self, client: ClientCredentials) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the manager
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate, or
    /// `Http` if the default HTTP client cannot be constructed.
    pub fn build(self) -> Result<TokenManager> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let store = self
            .store
            .unwrap_or_else(|| CredentialStore::new(config.credentials_path.clone()));
        let exchanger = match self.exchanger {
            Some(exchanger) => exchanger,
            None => Arc::new(HttpTokenExchanger::from_config(&config, Arc::clone(&clock))?),
        };
        let authorizer = self
            .authorizer
            .unwrap_or_else(|| Arc::new(BrowserAuthorization::new(config.clone())));

        Ok(TokenManager {
            config,
            store,
            exchanger,
            authorizer,
            clock,
            client: self.client,
            gate: tokio::sync::Mutex::new(()),
        })
    }
}

impl fmt::Debug for TokenManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManagerBuilder")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Produces valid access tokens on demand
pub struct TokenManager {
    config: OAuthConfig,
    store: CredentialStore,
    exchanger: Arc<dyn TokenExchanger>,
    authorizer: Arc<dyn AuthorizationFlow>,
    clock: Arc<dyn Clock>,
    client: Option<ClientCredentials>,
    gate: tokio::sync::Mutex<()>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a builder
    #[must_use]
    pub fn builder() -> TokenManagerBuilder {
        TokenManagerBuilder::new()
    }

    /// Manager with production components and configuration from `DK_*`
    /// environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for malformed variables.
    pub fn from_env() -> Result<Self> {
        Self::builder().config(OAuthConfig::from_env()?).build()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Credential store in use
    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Return an access token that is valid right now
    ///
    /// Runs a browser round-trip or a refresh first when the stored tokens
    /// require it, and persists the new tokens before returning.
    ///
    /// # Errors
    ///
    /// Any failure of the round-trip, the exchange or the store. The stored
    /// record is left unchanged on failure, so calling again retries from the
    /// same state.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        let _gate = self.gate.lock().await;
        let _file_lock = self.lock_store().await?;

        let record = self.store.load()?;
        let now = self.clock.now();

        match record.assess(now, self.config.expiry_leeway) {
            Assessment::Ready { access_token } => {
                tracing::debug!(state = %CredentialState::Ready, "Using stored access token");
                Ok(access_token.to_string())
            }
            Assessment::Stale { refresh_token } => {
                tracing::info!(
                    state = %CredentialState::Refreshing,
                    "Access token expired, refreshing"
                );
                let client = self.client_credentials()?;
                let pair = self.exchanger.exchange_refresh(&client, refresh_token).await?;
                self.persist(pair)
            }
            Assessment::Unauthorized => {
                tracing::info!(
                    state = %CredentialState::Authorizing,
                    "No valid refresh token, starting browser authorization"
                );
                let client = self.client_credentials()?;
                let grant = self.authorizer.authorize(&client.client_id).await?;
                let pair = self
                    .exchanger
                    .exchange_code(&grant.code, &client, &grant.redirect_uri)
                    .await?;
                self.persist(pair)
            }
        }
    }

    /// Alias of [`ensure_valid_token`](Self::ensure_valid_token)
    ///
    /// # Errors
    ///
    /// See [`ensure_valid_token`](Self::ensure_valid_token).
    pub async fn access_token(&self) -> Result<String> {
        self.ensure_valid_token().await
    }

    /// Headers for a catalog API request: `Authorization: Bearer ...` and
    /// `X-DIGIKEY-Client-Id`
    ///
    /// # Errors
    ///
    /// See [`ensure_valid_token`](Self::ensure_valid_token); also
    /// `InvalidResponse` if the token is not a legal header value.
    pub async fn authorization_headers(&self) -> Result<HeaderMap> {
        let token = self.ensure_valid_token().await?;
        let client = self.client_credentials()?;

        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| AuthError::invalid_response(format!("access token: {e}")))?;
        bearer.set_sensitive(true);
        let client_id = HeaderValue::from_str(&client.client_id)
            .map_err(|e| AuthError::invalid_config(format!("client id: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(HeaderName::from_static(CLIENT_ID_HEADER), client_id);
        Ok(headers)
    }

    /// Resting state of the stored credentials, without any side effect
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the credential file cannot be read.
    pub fn state(&self) -> Result<CredentialState> {
        let record = self.store.load()?;
        Ok(record.state(self.clock.now(), self.config.expiry_leeway))
    }

    /// Stored record as last persisted
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the credential file cannot be read.
    pub fn record(&self) -> Result<CredentialRecord> {
        Ok(self.store.load()?)
    }

    /// Forget stored tokens; the next call runs a browser round-trip
    ///
    /// Client credentials in the file are kept.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the file cannot be rewritten.
    pub async fn logout(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        let _file_lock = self.lock_store().await?;
        self.store.clear()?;
        tracing::info!(path = %self.store.path().display(), "Stored tokens cleared");
        Ok(())
    }

    /// Explicit credentials, else `DK_CLIENT_ID`/`DK_CLIENT_SECRET`, else the
    /// credential file
    fn client_credentials(&self) -> Result<ClientCredentials> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        if let Some(client) = ClientCredentials::from_env() {
            return Ok(client);
        }
        self.store
            .load_client_credentials()?
            .ok_or(AuthError::MissingClientCredentials)
    }

    async fn lock_store(&self) -> Result<StoreLock> {
        let store = self.store.clone();
        let lock = tokio::task::spawn_blocking(move || store.lock())
            .await
            .map_err(|e| AuthError::Io(std::io::Error::other(e)))??;
        Ok(lock)
    }

    fn persist(&self, pair: TokenPair) -> Result<String> {
        let access_token = pair.access_token.clone();
        let record = CredentialRecord::from(pair);
        self.store.save(&record)?;

        tracing::info!(
            state = %CredentialState::Ready,
            access_token_expiry = ?record.access_token_expiry,
            refresh_token_expiry = ?record.refresh_token_expiry,
            "Credentials saved"
        );
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthorizationGrant;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const NOW: u64 = 1_700_000_000;

    #[derive(Debug)]
    struct Unreachable;

    #[async_trait]
    impl TokenExchanger for Unreachable {
        async fn exchange_code(
            &self,
            _code: &str,
            _client: &ClientCredentials,
            _redirect_uri: &str,
        ) -> Result<TokenPair> {
            panic!("no exchange expected")
        }

        async fn exchange_refresh(
            &self,
            _client: &ClientCredentials,
            _refresh_token: &str,
        ) -> Result<TokenPair> {
            panic!("no exchange expected")
        }
    }

    #[async_trait]
    impl AuthorizationFlow for Unreachable {
        async fn authorize(&self, _client_id: &str) -> Result<AuthorizationGrant> {
            panic!("no authorization expected")
        }
    }

    fn manager(dir: &TempDir, client: Option<ClientCredentials>) -> TokenManager {
        let mut builder = TokenManager::builder()
            .store(CredentialStore::new(dir.path().join("credentials.env")))
            .exchanger(Arc::new(Unreachable))
            .authorizer(Arc::new(Unreachable))
            .clock(Arc::new(ManualClock::new(NOW)));
        if let Some(client) = client {
            builder = builder.client_credentials(client);
        }
        builder.build().unwrap()
    }

    fn ready_record() -> CredentialRecord {
        CredentialRecord {
            access_token: Some("AT-ready".to_string()),
            access_token_expiry: Some(NOW + 3600),
            refresh_token: Some("RT-ready".to_string()),
            refresh_token_expiry: Some(NOW + 86_400),
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = TokenManager::builder()
            .config(OAuthConfig::builder().token_url("not a url").build())
            .build()
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig(_)));
    }

    #[test]
    fn test_state_reads_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, None);
        assert_eq!(manager.state().unwrap(), CredentialState::Unauthorized);
        assert!(!manager.store().path().exists());

        manager.store().save(&ready_record()).unwrap();
        assert_eq!(manager.state().unwrap(), CredentialState::Ready);
    }

    #[test]
    fn test_explicit_client_credentials_win() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("credentials.env"),
            "DK_CLIENT_ID=from-file\nDK_CLIENT_SECRET=file-secret\n",
        )
        .unwrap();

        let manager = manager(&temp_dir, Some(ClientCredentials::new("explicit", "s")));
        assert_eq!(manager.client_credentials().unwrap().client_id, "explicit");
    }

    #[tokio::test]
    async fn test_ready_record_needs_no_client_or_network() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, None);
        manager.store().save(&ready_record()).unwrap();

        assert_eq!(manager.access_token().await.unwrap(), "AT-ready");
        assert_eq!(manager.ensure_valid_token().await.unwrap(), "AT-ready");
    }

    #[tokio::test]
    async fn test_authorization_headers() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, Some(ClientCredentials::new("my-client", "s")));
        manager.store().save(&ready_record()).unwrap();

        let headers = manager.authorization_headers().await.unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer AT-ready");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert_eq!(headers["X-DIGIKEY-Client-Id"], "my-client");
    }

    #[tokio::test]
    async fn test_logout_clears_tokens_and_keeps_client() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.env");
        std::fs::write(&path, "DK_CLIENT_ID=id\nDK_CLIENT_SECRET=secret\n").unwrap();
        let manager = manager(&temp_dir, None);
        manager.store().save(&ready_record()).unwrap();

        manager.logout().await.unwrap();

        assert_eq!(manager.state().unwrap(), CredentialState::Unauthorized);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("DK_CLIENT_ID=id"));
        assert!(!content.contains("AT-ready"));
    }
}
