//! OAuth2 authorization-code lifecycle for the Digi-Key API
//!
//! # Overview
//!
//! The catalog API requires a bearer token obtained through the authorization
//! code grant. This module obtains, persists, validates and refreshes that
//! token:
//!
//! 1. Make sure a self-signed TLS key and certificate exist ([`CertificateProvisioner`])
//! 2. Bind a local HTTPS listener for the provider redirect ([`CallbackListener`])
//! 3. Send the browser to the listener, which redirects on to the provider
//! 4. Exchange the returned code for a token pair ([`TokenExchanger`])
//! 5. Persist the pair ([`CredentialStore`]) and refresh it when the access
//!    token expires ([`TokenManager`])
//!
//! # Example
//!
//! ```no_run
//! use digikey_oauth::auth::TokenManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TokenManager::from_env()?;
//!
//!     // Runs a browser round-trip or a refresh only when needed
//!     let token = manager.access_token().await?;
//!     println!("Token: {}...", &token[..8.min(token.len())]);
//!     Ok(())
//! }
//! ```
//!
//! # Storage
//!
//! Tokens live in a key=value file next to the client id and secret
//! (`DK_CLIENT_ID`, `DK_CLIENT_SECRET`). Writes replace the file atomically and
//! keep every line that is not a token key.

mod callback;
mod cert;
mod exchange;
mod flow;
mod manager;
mod store;
mod token;

pub use callback::{CallbackListener, CallbackSession, ListenerState};
pub use cert::{CertificateProvisioner, TlsMaterial};
pub use exchange::{HttpTokenExchanger, TokenExchanger};
pub use flow::{
    AuthorizationFlow, AuthorizationGrant, BrowserAuthorization, BrowserLauncher, SystemBrowser,
};
pub use manager::{CLIENT_ID_HEADER, TokenManager, TokenManagerBuilder};
pub use store::{
    ACCESS_TOKEN_EXPIRY_KEY, ACCESS_TOKEN_KEY, CLIENT_ID_KEY, CLIENT_SECRET_KEY,
    CredentialStore, REFRESH_TOKEN_EXPIRY_KEY, REFRESH_TOKEN_KEY, StoreError, StoreLock,
};
pub use token::{ClientCredentials, CredentialRecord, CredentialState, TokenPair};
