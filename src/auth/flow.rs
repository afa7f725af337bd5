//! Browser round-trip producing an authorization code
//!
//! [`BrowserAuthorization`] makes sure TLS material exists, binds the callback
//! listener, sends the user's browser to the listener's root URL (which
//! redirects on to the provider) and waits for the code to come back.

use std::fmt::Debug;
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use super::callback::{CallbackListener, ListenerState};
use super::cert::CertificateProvisioner;
use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};

/// Authorization code together with the redirect URI it was issued for
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    /// Single-use authorization code
    pub code: String,
    /// Redirect URI the code is bound to; the exchange must repeat it
    pub redirect_uri: String,
}

impl std::fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("code", &crate::utils::redact(&self.code))
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Obtains an authorization code for a client
#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    /// Run one round-trip for `client_id`
    ///
    /// # Errors
    ///
    /// `CallbackTimeout`, `AuthorizationDenied`, `StateMismatch`, or any
    /// provisioning and listener failure.
    async fn authorize(&self, client_id: &str) -> Result<AuthorizationGrant>;
}

/// Opens a URL for the user
pub trait BrowserLauncher: Send + Sync + Debug {
    /// Open `url`
    ///
    /// # Errors
    ///
    /// Returns `Browser` if no browser could be launched.
    fn open(&self, url: &str) -> Result<()>;
}

/// The platform's default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        let mut command = launcher(url)
            .ok_or_else(|| AuthError::Browser("no browser launcher for this platform".into()))?;
        command
            .spawn()
            .map_err(|e| AuthError::Browser(e.to_string()))?;
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn launcher(url: &str) -> Option<Command> {
    let mut command = Command::new("open");
    command.arg(url);
    Some(command)
}

#[cfg(target_os = "linux")]
fn launcher(url: &str) -> Option<Command> {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    Some(command)
}

#[cfg(target_os = "windows")]
fn launcher(url: &str) -> Option<Command> {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", url]);
    Some(command)
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn launcher(_url: &str) -> Option<Command> {
    None
}

/// Interactive round-trip through the user's browser
#[derive(Debug)]
pub struct BrowserAuthorization {
    config: OAuthConfig,
    provisioner: CertificateProvisioner,
    listener: CallbackListener,
    browser: Option<Arc<dyn BrowserLauncher>>,
}

impl BrowserAuthorization {
    /// Round-trip using `config`; the system browser is opened when
    /// `auto_open_browser` is set, otherwise the URL is only printed
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        let browser = config
            .auto_open_browser
            .then(|| Arc::new(SystemBrowser) as Arc<dyn BrowserLauncher>);
        Self {
            provisioner: CertificateProvisioner::from_config(&config),
            listener: CallbackListener::new(config.callback_port),
            config,
            browser,
        }
    }

    /// Replace the browser launcher
    #[must_use]
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Lifecycle state of the underlying callback listener
    #[must_use]
    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    fn hand_off(&self, entry_url: &str) {
        println!("\n🔐 Digi-Key authorization");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("Sign in with your Digi-Key account in the browser window.");
        println!("The local certificate is self-signed; accept the warning to continue.");
        println!();
        println!("If no window opens, visit:");
        println!("  {entry_url}");
        println!();

        if let Some(browser) = &self.browser {
            if let Err(e) = browser.open(entry_url) {
                tracing::warn!("Could not open browser: {e}");
                println!("(Could not open browser automatically - please open the URL manually)");
            }
        }
    }
}

#[async_trait]
impl AuthorizationFlow for BrowserAuthorization {
    async fn authorize(&self, client_id: &str) -> Result<AuthorizationGrant> {
        let provisioner = self.provisioner.clone();
        let tls = tokio::task::spawn_blocking(move || provisioner.ensure())
            .await
            .map_err(|e| AuthError::tls(&self.provisioner.material().key_path, e))??;

        let state = generate_state();
        let authorize_url = self.config.authorization_url(client_id, Some(&state))?;

        let session = self
            .listener
            .start(&tls, authorize_url.as_str(), Some(state))
            .await?;

        self.hand_off(&session.root_url());

        let code = session.wait_for_code(self.config.callback_timeout).await?;
        println!("✓ Authorization code received");

        Ok(AuthorizationGrant {
            code,
            redirect_uri: self.config.redirect_uri.clone(),
        })
    }
}

/// 256 random bits, base64url encoded
fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records the URL instead of launching anything
    #[derive(Debug, Default)]
    struct RecordingBrowser {
        opened: Mutex<Vec<String>>,
    }

    impl BrowserLauncher for RecordingBrowser {
        fn open(&self, url: &str) -> Result<()> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn config(dir: &TempDir) -> OAuthConfig {
        OAuthConfig::builder()
            .callback_port(0)
            .callback_timeout(Duration::from_millis(300))
            .tls_dir(dir.path().join("tls"))
            .credentials_path(dir.path().join("credentials.env"))
            .auto_open_browser(false)
            .build()
    }

    #[test]
    fn test_state_is_random_and_url_safe() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_grant_debug_redacts_code() {
        let grant = AuthorizationGrant {
            code: "averysecretcode".to_string(),
            redirect_uri: "https://localhost:5000/callback".to_string(),
        };
        assert!(!format!("{grant:?}").contains("averysecretcode"));
    }

    #[test]
    fn test_browser_disabled_by_config() {
        let temp_dir = TempDir::new().unwrap();
        let flow = BrowserAuthorization::new(config(&temp_dir));
        assert!(flow.browser.is_none());
        assert_eq!(flow.listener_state(), ListenerState::Idle);
    }

    #[tokio::test]
    async fn test_timeout_provisions_tls_and_opens_entry_url() {
        let temp_dir = TempDir::new().unwrap();
        let browser = Arc::new(RecordingBrowser::default());
        let flow = BrowserAuthorization::new(config(&temp_dir)).with_browser(browser.clone());

        let err = flow.authorize("client-id").await.unwrap_err();

        assert!(matches!(err, AuthError::CallbackTimeout { .. }));
        assert!(temp_dir.path().join("tls/key.pem").is_file());
        assert!(temp_dir.path().join("tls/cert.pem").is_file());

        let opened = browser.opened.lock().unwrap();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].starts_with("https://localhost:"));
        assert_eq!(flow.listener_state(), ListenerState::TimedOut);
    }
}
