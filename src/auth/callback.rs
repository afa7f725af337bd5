//! Local HTTPS endpoint receiving the provider redirect
//!
//! A [`CallbackListener`] serves one authorization round-trip at a time:
//!
//! - `GET /` marks the browser as connected and redirects it to the provider's
//!   authorization page.
//! - `GET /callback?code=...&state=...` hands the outcome to the waiting
//!   caller through a one-shot channel.
//!
//! The server runs on its own tokio task. The caller waits on the channel with
//! a deadline, so a missing redirect ends in [`AuthError::CallbackTimeout`]
//! rather than an unbounded wait.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use serde::Deserialize;
use tokio::sync::oneshot;

use super::cert::TlsMaterial;
use crate::error::{AuthError, Result};

/// Grace period for in-flight responses when the listener shuts down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

const PAGE_SUCCESS: &str = "<!DOCTYPE html>
<html>
<head><title>Digi-Key authorization</title></head>
<body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\">
<h2>Authorization complete</h2>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>";

const PAGE_DENIED: &str = "<!DOCTYPE html>
<html>
<head><title>Digi-Key authorization</title></head>
<body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\">
<h2>No code received</h2>
<p>Authorization was declined or cancelled. Try again from the terminal.</p>
</body>
</html>";

/// Lifecycle of a [`CallbackListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not started
    Idle,
    /// Bound and waiting for the redirect
    Listening,
    /// Authorization code captured; the server has shut down
    CodeReceived,
    /// Redirect arrived without a usable code; the server has shut down
    Denied,
    /// Deadline passed without a redirect; the server has shut down
    TimedOut,
    /// Server shut down without an outcome, or failed to start
    Stopped,
}

/// What the `/callback` route observed
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallbackOutcome {
    Code(String),
    Denied(Option<String>),
    StateMismatch { expected: String, received: String },
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// State shared between the waiting caller and the route handlers for a
/// single round-trip
#[derive(Debug)]
struct AuthorizationSession {
    authorize_url: String,
    expected_state: Option<String>,
    outcome: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
    browser_ready: AtomicBool,
}

impl AuthorizationSession {
    fn classify(&self, params: CallbackParams) -> CallbackOutcome {
        let Some(code) = params.code.filter(|c| !c.is_empty()) else {
            return CallbackOutcome::Denied(params.error_description.or(params.error));
        };

        if let Some(expected) = &self.expected_state {
            if params.state.as_deref() != Some(expected.as_str()) {
                return CallbackOutcome::StateMismatch {
                    expected: expected.clone(),
                    received: params.state.unwrap_or_else(|| "<none>".to_string()),
                };
            }
        }

        CallbackOutcome::Code(code)
    }

    /// Deliver the outcome; only the first delivery wins
    fn complete(&self, outcome: CallbackOutcome) -> bool {
        let sender = self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// One-session HTTPS listener for the provider redirect
///
/// Binds the IPv4 loopback address `127.0.0.1` only. The registered redirect
/// URI names `localhost`; a browser that resolves it to `::1` first gets a
/// refused connection and falls back to `127.0.0.1`.
///
/// After a session ends, [`state`](Self::state) reports how it ended
/// (`CodeReceived`, `Denied` or `TimedOut`) until the next [`start`](Self::start).
#[derive(Debug)]
pub struct CallbackListener {
    port: u16,
    state: Arc<Mutex<ListenerState>>,
}

impl CallbackListener {
    /// Create a listener for `port` on the loopback interface (0 = ephemeral)
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            state: Arc::new(Mutex::new(ListenerState::Idle)),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the HTTPS endpoint and start serving on a background task
    ///
    /// `authorize_url` is where `/` redirects the browser. When
    /// `expected_state` is set, a callback carrying a different `state` is
    /// rejected.
    ///
    /// # Errors
    ///
    /// - `ListenerBusy` if this listener is already waiting for a callback
    /// - `TlsProvisioning` if the key or certificate cannot be loaded
    /// - `Listener` if the port cannot be bound
    pub async fn start(
        &self,
        tls: &TlsMaterial,
        authorize_url: impl Into<String>,
        expected_state: Option<String>,
    ) -> Result<CallbackSession> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == ListenerState::Listening {
                return Err(AuthError::ListenerBusy);
            }
            *state = ListenerState::Listening;
        }

        let started = self.bind(tls, authorize_url.into(), expected_state).await;
        if started.is_err() {
            self.set_state(ListenerState::Stopped);
        }
        started
    }

    /// Start, then wait up to `timeout` for the authorization code
    ///
    /// For callers that direct the browser themselves.
    ///
    /// # Errors
    ///
    /// Any error from [`start`](Self::start) or
    /// [`CallbackSession::wait_for_code`].
    pub async fn run_once(
        &self,
        tls: &TlsMaterial,
        authorize_url: impl Into<String>,
        expected_state: Option<String>,
        timeout: Duration,
    ) -> Result<String> {
        self.start(tls, authorize_url, expected_state)
            .await?
            .wait_for_code(timeout)
            .await
    }

    async fn bind(
        &self,
        tls: &TlsMaterial,
        authorize_url: String,
        expected_state: Option<String>,
    ) -> Result<CallbackSession> {
        // Only the ring provider is compiled in; installing twice is harmless
        let _ = rustls::crypto::ring::default_provider().install_default();

        let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| AuthError::tls(&tls.cert_path, e))?;

        let (tx, rx) = oneshot::channel();
        let session = Arc::new(AuthorizationSession {
            authorize_url,
            expected_state,
            outcome: Mutex::new(Some(tx)),
            browser_ready: AtomicBool::new(false),
        });

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let handle = Handle::new();
        let server = axum_server::bind_rustls(addr, tls_config)
            .handle(handle.clone())
            .serve(router(Arc::clone(&session)).into_make_service());
        let task = tokio::spawn(server);

        let Some(local_addr) = handle.listening().await else {
            let reason = match task.await {
                Ok(Err(e)) => e.to_string(),
                Ok(Ok(())) => "server exited before listening".to_string(),
                Err(e) => e.to_string(),
            };
            return Err(AuthError::listener(format!("could not bind {addr}: {reason}")));
        };

        tracing::info!(port = local_addr.port(), "OAuth callback listener started");

        Ok(CallbackSession {
            local_addr,
            receiver: Some(rx),
            handle,
            session,
            state: Arc::clone(&self.state),
        })
    }

    fn set_state(&self, next: ListenerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// A bound listener waiting for one redirect
///
/// Dropping the session shuts the server down.
#[derive(Debug)]
pub struct CallbackSession {
    local_addr: SocketAddr,
    receiver: Option<oneshot::Receiver<CallbackOutcome>>,
    handle: Handle,
    session: Arc<AuthorizationSession>,
    state: Arc<Mutex<ListenerState>>,
}

impl CallbackSession {
    /// Address actually bound
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL that starts the round-trip when opened in a browser
    #[must_use]
    pub fn root_url(&self) -> String {
        format!("https://localhost:{}/", self.local_addr.port())
    }

    /// Whether a browser has hit `/` yet
    #[must_use]
    pub fn browser_connected(&self) -> bool {
        self.session.browser_ready.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the redirect and return the authorization code
    ///
    /// # Errors
    ///
    /// - `CallbackTimeout` if nothing arrives in time
    /// - `AuthorizationDenied` if the redirect carries no code
    /// - `StateMismatch` if the redirect belongs to another session
    pub async fn wait_for_code(mut self, timeout: Duration) -> Result<String> {
        let Some(receiver) = self.receiver.take() else {
            return Err(AuthError::listener("callback already consumed"));
        };

        let result = await_outcome(receiver, timeout).await;
        let next = match &result {
            Ok(_) => ListenerState::CodeReceived,
            Err(AuthError::CallbackTimeout { .. }) => ListenerState::TimedOut,
            Err(_) => ListenerState::Denied,
        };
        tracing::debug!(state = ?next, "OAuth callback finished");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;

        result
    }
}

impl Drop for CallbackSession {
    fn drop(&mut self) {
        self.handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        // keep a recorded outcome, only an unfinished session becomes Stopped
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ListenerState::Listening {
            *state = ListenerState::Stopped;
        }
        drop(state);
        tracing::debug!(port = self.local_addr.port(), "OAuth callback listener stopped");
    }
}

async fn await_outcome(
    receiver: oneshot::Receiver<CallbackOutcome>,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, receiver).await {
        Err(_) => {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Timed out waiting for OAuth callback"
            );
            Err(AuthError::callback_timeout(timeout))
        }
        Ok(Err(_)) => Err(AuthError::listener(
            "callback listener stopped before a redirect arrived",
        )),
        Ok(Ok(CallbackOutcome::Code(code))) => Ok(code),
        Ok(Ok(CallbackOutcome::Denied(reason))) => Err(AuthError::denied(reason)),
        Ok(Ok(CallbackOutcome::StateMismatch { expected, received })) => {
            Err(AuthError::StateMismatch { expected, received })
        }
    }
}

fn router(session: Arc<AuthorizationSession>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/callback", get(callback))
        .with_state(session)
}

async fn index(State(session): State<Arc<AuthorizationSession>>) -> Redirect {
    session.browser_ready.store(true, Ordering::SeqCst);
    tracing::info!("Browser connected, redirecting to authorization page");
    Redirect::to(&session.authorize_url)
}

async fn callback(
    State(session): State<Arc<AuthorizationSession>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let outcome = session.classify(params);
    let (status, page) = match &outcome {
        CallbackOutcome::Code(_) => {
            tracing::info!("Authorization code received");
            (StatusCode::OK, PAGE_SUCCESS)
        }
        CallbackOutcome::Denied(reason) => {
            tracing::warn!(reason = ?reason, "Callback without authorization code");
            (StatusCode::BAD_REQUEST, PAGE_DENIED)
        }
        CallbackOutcome::StateMismatch { .. } => {
            tracing::warn!("Callback state does not match this session");
            (StatusCode::BAD_REQUEST, PAGE_DENIED)
        }
    };

    if !session.complete(outcome) {
        return (
            StatusCode::CONFLICT,
            Html("Authorization already completed. You can close this tab."),
        )
            .into_response();
    }

    (status, Html(page)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CertificateProvisioner;
    use tempfile::TempDir;

    const AUTHORIZE_URL: &str = "https://provider.example/authorize?response_type=code";

    fn session(expected_state: Option<&str>) -> AuthorizationSession {
        AuthorizationSession {
            authorize_url: AUTHORIZE_URL.to_string(),
            expected_state: expected_state.map(str::to_string),
            outcome: Mutex::new(None),
            browser_ready: AtomicBool::new(false),
        }
    }

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    fn tls_material(dir: &TempDir) -> TlsMaterial {
        CertificateProvisioner::new(dir.path().join("cert.pem"), dir.path().join("key.pem"))
            .ensure()
            .unwrap()
    }

    fn https_client() -> reqwest::Client {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    fn callback_url(session: &CallbackSession, query: &str) -> String {
        format!(
            "https://127.0.0.1:{}/callback?{query}",
            session.local_addr().port()
        )
    }

    #[test]
    fn test_classify_code_with_matching_state() {
        let session = session(Some("st8"));
        assert_eq!(
            session.classify(params(Some("ABC123"), Some("st8"))),
            CallbackOutcome::Code("ABC123".to_string())
        );
    }

    #[test]
    fn test_classify_missing_code_is_denied() {
        let session = session(Some("st8"));
        let outcome = session.classify(CallbackParams {
            error: Some("access_denied".to_string()),
            state: Some("st8".to_string()),
            ..Default::default()
        });
        assert_eq!(
            outcome,
            CallbackOutcome::Denied(Some("access_denied".to_string()))
        );

        assert_eq!(
            session.classify(params(Some(""), Some("st8"))),
            CallbackOutcome::Denied(None)
        );
    }

    #[test]
    fn test_classify_state_mismatch() {
        let session = session(Some("st8"));
        assert_eq!(
            session.classify(params(Some("ABC123"), None)),
            CallbackOutcome::StateMismatch {
                expected: "st8".to_string(),
                received: "<none>".to_string()
            }
        );
    }

    #[test]
    fn test_classify_without_expected_state_accepts_any() {
        let session = session(None);
        assert_eq!(
            session.classify(params(Some("ABC123"), Some("whatever"))),
            CallbackOutcome::Code("ABC123".to_string())
        );
    }

    #[test]
    fn test_only_first_outcome_is_delivered() {
        let (tx, mut rx) = oneshot::channel();
        let session = session(None);
        *session.outcome.lock().unwrap() = Some(tx);

        assert!(session.complete(CallbackOutcome::Code("first".to_string())));
        assert!(!session.complete(CallbackOutcome::Code("second".to_string())));
        assert_eq!(rx.try_recv().unwrap(), CallbackOutcome::Code("first".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_on_virtual_clock() {
        let (_tx, rx) = oneshot::channel();
        let started = tokio::time::Instant::now();

        let err = await_outcome(rx, Duration::from_secs(120)).await.unwrap_err();

        assert!(matches!(err, AuthError::CallbackTimeout { timeout_secs: 120 }));
        assert!(err.is_retryable());
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_before_deadline_wins() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(119)).await;
            let _ = tx.send(CallbackOutcome::Code("ABC123".to_string()));
        });

        let code = await_outcome(rx, Duration::from_secs(120)).await.unwrap();
        assert_eq!(code, "ABC123");
    }

    #[tokio::test]
    async fn test_closed_channel_is_not_a_timeout() {
        let (tx, rx) = oneshot::channel::<CallbackOutcome>();
        drop(tx);
        let err = await_outcome(rx, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, AuthError::Listener(_)));
    }

    #[tokio::test]
    async fn test_https_round_trip_captures_code() {
        let temp_dir = TempDir::new().unwrap();
        let tls = tls_material(&temp_dir);
        let listener = CallbackListener::new(0);
        assert_eq!(listener.state(), ListenerState::Idle);

        let session = listener
            .start(&tls, AUTHORIZE_URL, Some("st8".to_string()))
            .await
            .unwrap();
        assert_eq!(listener.state(), ListenerState::Listening);
        assert!(!session.browser_connected());

        let client = https_client();
        let root = format!("https://127.0.0.1:{}/", session.local_addr().port());
        let response = client.get(&root).send().await.unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers()[reqwest::header::LOCATION],
            AUTHORIZE_URL
        );
        assert!(session.browser_connected());

        let response = client
            .get(callback_url(&session, "code=ABC123&state=st8"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let code = session.wait_for_code(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, "ABC123");
        assert_eq!(listener.state(), ListenerState::CodeReceived);
    }

    #[tokio::test]
    async fn test_https_denial_is_distinct_from_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let tls = tls_material(&temp_dir);
        let listener = CallbackListener::new(0);
        let session = listener.start(&tls, AUTHORIZE_URL, None).await.unwrap();

        let response = https_client()
            .get(callback_url(&session, "error=access_denied"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let err = session
            .wait_for_code(Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            AuthError::AuthorizationDenied { reason } => {
                assert_eq!(reason.as_deref(), Some("access_denied"));
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert_eq!(listener.state(), ListenerState::Denied);
    }

    #[tokio::test]
    async fn test_second_start_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let tls = tls_material(&temp_dir);
        let listener = CallbackListener::new(0);

        let session = listener.start(&tls, AUTHORIZE_URL, None).await.unwrap();
        let err = listener.start(&tls, AUTHORIZE_URL, None).await.unwrap_err();
        assert!(matches!(err, AuthError::ListenerBusy));

        drop(session);
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_run_once_times_out_without_redirect() {
        let temp_dir = TempDir::new().unwrap();
        let tls = tls_material(&temp_dir);
        let listener = CallbackListener::new(0);

        let err = listener
            .run_once(&tls, AUTHORIZE_URL, None, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::CallbackTimeout { .. }));
        assert_eq!(listener.state(), ListenerState::TimedOut);

        // a finished session does not block the next one
        let session = listener.start(&tls, AUTHORIZE_URL, None).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Listening);
        drop(session);
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_binds_ipv4_loopback_only() {
        let temp_dir = TempDir::new().unwrap();
        let tls = tls_material(&temp_dir);
        let listener = CallbackListener::new(0);
        let session = listener.start(&tls, AUTHORIZE_URL, None).await.unwrap();

        let addr = session.local_addr();
        assert_eq!(addr.ip(), std::net::IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(
            session.root_url(),
            format!("https://localhost:{}/", addr.port())
        );
    }

    #[tokio::test]
    async fn test_missing_tls_material_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let tls = TlsMaterial {
            cert_path: temp_dir.path().join("missing-cert.pem"),
            key_path: temp_dir.path().join("missing-key.pem"),
        };
        let listener = CallbackListener::new(0);

        let err = listener.start(&tls, AUTHORIZE_URL, None).await.unwrap_err();
        assert!(matches!(err, AuthError::TlsProvisioning { .. }));
        assert_eq!(listener.state(), ListenerState::Stopped);
    }
}
