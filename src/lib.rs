//! # Digi-Key OAuth for Rust
//!
//! Obtains, persists, validates and refreshes the OAuth2 access token needed
//! to call the Digi-Key catalog API. Async/await, strong typing, tokio-based.
//!
//! ## Quick Start
//!
//! Basic usage with [`TokenManager`]:
//!
//! ```no_run
//! use digikey_oauth::TokenManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads DK_* variables; client id and secret may also live in the
//!     // credential file
//!     let manager = TokenManager::from_env()?;
//!
//!     let token = manager.access_token().await?;
//!     let http = reqwest::Client::new();
//!     let response = http
//!         .get("https://api.digikey.com/products/v4/search/P5555-ND/productdetails")
//!         .headers(manager.authorization_headers().await?)
//!         .send()
//!         .await?;
//!     println!("{} ({} byte token)", response.status(), token.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle
//!
//! Every call to [`TokenManager::access_token`] looks at the stored
//! [`CredentialRecord`](auth::CredentialRecord) first:
//!
//! - **Unauthorized**: no usable refresh token. A local HTTPS listener is
//!   started on `https://localhost:5000`, the browser is sent through the
//!   provider's sign-in page, and the returned code is exchanged for tokens.
//! - **Authorized**: the refresh token is valid but the access token expired.
//!   One refresh exchange replaces both tokens.
//! - **Ready**: the stored access token is returned without network I/O.
//!
//! New tokens are saved before the call returns. A failure leaves the stored
//! record untouched.
//!
//! ## Configuration
//!
//! [`OAuthConfig`] carries endpoints, the callback port and timeout, the
//! expiry leeway and file locations. Build it explicitly or read it from the
//! environment:
//!
//! ```no_run
//! # use digikey_oauth::{OAuthConfig, TokenManager};
//! # use std::time::Duration;
//! # fn example() -> digikey_oauth::Result<()> {
//! let config = OAuthConfig::builder()
//!     .credentials_path("/srv/inventory/.env")
//!     .callback_timeout(Duration::from_secs(300))
//!     .auto_open_browser(false)
//!     .build();
//!
//! let manager = TokenManager::builder().config(config).build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing consumers
//!
//! [`TokenExchanger`](auth::TokenExchanger), [`AuthorizationFlow`](auth::AuthorizationFlow)
//! and [`Clock`](clock::Clock) are traits, so a [`TokenManager`] can be built
//! around fakes without a browser or network access.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod utils;

// Re-export commonly used types
pub use auth::{
    ClientCredentials, CredentialRecord, CredentialState, CredentialStore, TokenManager,
    TokenManagerBuilder,
};
pub use clock::{Clock, SystemClock};
pub use config::OAuthConfig;
pub use error::{AuthError, Result};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
