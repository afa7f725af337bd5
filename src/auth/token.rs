//! Credential record and expiry bookkeeping

use std::fmt;
use std::time::Duration;

/// OAuth client id and secret issued by the provider
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Application client id
    pub client_id: String,
    /// Application client secret
    pub client_secret: String,
}

impl ClientCredentials {
    /// Create client credentials
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Read `DK_CLIENT_ID` and `DK_CLIENT_SECRET` from the process environment
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let id = std::env::var("DK_CLIENT_ID").ok().filter(|v| !v.is_empty())?;
        let secret = std::env::var("DK_CLIENT_SECRET")
            .ok()
            .filter(|v| !v.is_empty())?;
        Some(Self::new(id, secret))
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Tokens returned by a successful exchange
///
/// Expiries are absolute Unix timestamps computed when the response arrived.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Bearer token for catalog API calls
    pub access_token: String,
    /// Access token expiry (Unix seconds)
    pub access_token_expiry: u64,
    /// Token used to obtain the next pair
    pub refresh_token: String,
    /// Refresh token expiry (Unix seconds)
    pub refresh_token_expiry: u64,
}

impl TokenPair {
    /// Build a pair from provider-reported lifetimes, anchored at `now`
    #[must_use]
    pub fn from_lifetimes(
        now: u64,
        access_token: String,
        expires_in: u64,
        refresh_token: String,
        refresh_token_expires_in: u64,
    ) -> Self {
        Self {
            access_token,
            access_token_expiry: now.saturating_add(expires_in),
            refresh_token,
            refresh_token_expiry: now.saturating_add(refresh_token_expires_in),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &crate::utils::redact(&self.access_token))
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token", &crate::utils::redact(&self.refresh_token))
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .finish()
    }
}

/// Readiness of the stored credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// No usable refresh token; a browser round-trip is required
    Unauthorized,
    /// Browser round-trip in progress
    Authorizing,
    /// Refresh token valid, access token missing or expired
    Authorized,
    /// Refresh exchange in progress
    Refreshing,
    /// Access token valid
    Ready,
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthorized => "unauthorized",
            Self::Authorizing => "authorizing",
            Self::Authorized => "authorized (access token stale)",
            Self::Refreshing => "refreshing",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Persisted token state
///
/// Every field is optional; a token whose expiry is missing counts as expired.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Access token
    pub access_token: Option<String>,
    /// Access token expiry (Unix seconds)
    pub access_token_expiry: Option<u64>,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Refresh token expiry (Unix seconds)
    pub refresh_token_expiry: Option<u64>,
}

/// What [`CredentialRecord::assess`] found, borrowing the usable token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Assessment<'a> {
    Unauthorized,
    Stale { refresh_token: &'a str },
    Ready { access_token: &'a str },
}

impl CredentialRecord {
    /// Record with no tokens
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn assess(&self, now: u64, leeway: Duration) -> Assessment<'_> {
        let Some(refresh_token) =
            usable(&self.refresh_token, self.refresh_token_expiry, now, leeway)
        else {
            return Assessment::Unauthorized;
        };

        match usable(&self.access_token, self.access_token_expiry, now, leeway) {
            Some(access_token) => Assessment::Ready { access_token },
            None => Assessment::Stale { refresh_token },
        }
    }

    /// Resting state of this record at `now`
    ///
    /// Refresh token validity is checked before access token validity: a
    /// valid access token next to an expired refresh token is still
    /// `Unauthorized`.
    #[must_use]
    pub fn state(&self, now: u64, leeway: Duration) -> CredentialState {
        match self.assess(now, leeway) {
            Assessment::Unauthorized => CredentialState::Unauthorized,
            Assessment::Stale { .. } => CredentialState::Authorized,
            Assessment::Ready { .. } => CredentialState::Ready,
        }
    }

    /// Seconds until the access token expires, if it is still valid
    #[must_use]
    pub fn access_token_remaining(&self, now: u64) -> Option<Duration> {
        self.access_token.as_ref()?;
        let expiry = self.access_token_expiry?;
        (expiry > now).then(|| Duration::from_secs(expiry - now))
    }
}

impl From<TokenPair> for CredentialRecord {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: Some(pair.access_token),
            access_token_expiry: Some(pair.access_token_expiry),
            refresh_token: Some(pair.refresh_token),
            refresh_token_expiry: Some(pair.refresh_token_expiry),
        }
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field(
                "access_token",
                &self.access_token.as_deref().map(crate::utils::redact),
            )
            .field("access_token_expiry", &self.access_token_expiry)
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(crate::utils::redact),
            )
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .finish()
    }
}

/// A token is usable when present, non-empty and not within `leeway` of expiry.
fn usable<'a>(
    token: &'a Option<String>,
    expiry: Option<u64>,
    now: u64,
    leeway: Duration,
) -> Option<&'a str> {
    let token = token.as_deref().filter(|t| !t.is_empty())?;
    let expiry = expiry?;
    (now.saturating_add(leeway.as_secs()) < expiry).then_some(token)
}
