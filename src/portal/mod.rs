//! Captive portal HTTP server
//!
//! A minimal listener on one fixed port. Unauthenticated clients get the
//! login page; accepted logins are recorded in the credential store and
//! reported through an [`AuthCallback`].

pub mod pages;
pub mod routes;

pub use pages::{AssetDir, EmbeddedAssets, PageAssets};

use axum::Router;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::models::LoginAttempt;
use crate::store::CredentialStore;

/// Invoked once per accepted login, from the connection-handling task.
///
/// Implementations must not block.
pub trait AuthCallback: Send + Sync {
    fn on_auth_success(&self);
}

impl<F> AuthCallback for F
where
    F: Fn() + Send + Sync,
{
    fn on_auth_success(&self) {
        self()
    }
}

/// Shared, read-only state for request handlers
pub(crate) struct PortalState {
    reference_secret: String,
    assets: Arc<dyn PageAssets>,
    store: Arc<dyn CredentialStore>,
    on_success: Arc<dyn AuthCallback>,
}

impl PortalState {
    async fn record(&self, attempt: LoginAttempt) {
        match self.store.record(&attempt).await {
            Ok(id) => tracing::debug!("Recorded login attempt #{} ({:?})", id, attempt.outcome),
            Err(e) => tracing::error!("Failed to record login attempt: {}", e),
        }
    }

    fn notify_success(&self) {
        if catch_unwind(AssertUnwindSafe(|| self.on_success.on_auth_success())).is_err() {
            tracing::error!("Authentication callback panicked");
        }
    }
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct CaptivePortalServer {
    addr: SocketAddr,
    settings: PortalConfig,
    state: Arc<PortalState>,
    running: Option<RunningServer>,
}

impl CaptivePortalServer {
    pub fn new(
        settings: PortalConfig,
        assets: Arc<dyn PageAssets>,
        store: Arc<dyn CredentialStore>,
        on_success: Arc<dyn AuthCallback>,
    ) -> Self {
        let state = Arc::new(PortalState {
            reference_secret: settings.reference_secret.clone(),
            assets,
            store,
            on_success,
        });

        Self {
            addr: SocketAddr::new(settings.bind, settings.port),
            settings,
            state,
            running: None,
        }
    }

    /// Bind and start serving. Starting a running server is a no-op that
    /// returns the address it already listens on.
    ///
    /// `request_timeout` bounds each request from the moment its head has been
    /// parsed; a timed-out request gets 408. Reading the head itself is not
    /// bounded, so an idle connection stays open until the client or `stop()`
    /// closes it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<SocketAddr, PortalError> {
        if let Some(running) = self.running.as_ref().filter(|r| !r.task.is_finished()) {
            tracing::debug!("Portal already running on {}", running.local_addr);
            return Ok(running.local_addr);
        }

        let addr = self.addr;
        let bind_err = move |source| PortalError::Bind { addr, source };
        let listener = std::net::TcpListener::bind(self.addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        let listener = tokio::net::TcpListener::from_std(listener).map_err(bind_err)?;

        let app = Router::new()
            .fallback(routes::dispatch)
            .layer(TimeoutLayer::new(self.settings.request_timeout()))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!("Portal server on {} exited: {}", local_addr, e);
            }
        });

        tracing::info!("Captive portal listening on {}", local_addr);
        self.running = Some(RunningServer {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    /// Stop accepting connections. Stopping a stopped server is a no-op.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            // The task may already be gone; nothing to signal then
            let _ = running.shutdown.send(());
            tracing::info!("Captive portal on {} stopped", running.local_addr);
        }
    }

    pub fn is_listening(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

impl Drop for CaptivePortalServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteCredentialStore;
    use std::net::IpAddr;

    async fn server() -> CaptivePortalServer {
        let settings = PortalConfig {
            bind: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            ..PortalConfig::default()
        };
        let store = SqliteCredentialStore::in_memory().await.unwrap();
        CaptivePortalServer::new(settings, Arc::new(EmbeddedAssets), Arc::new(store), Arc::new(|| {}))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut portal = server().await;
        assert!(!portal.is_listening());

        let first = portal.start().unwrap();
        let second = portal.start().unwrap();
        assert_eq!(first, second);
        assert!(portal.is_listening());
        assert_eq!(portal.local_addr(), Some(first));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut portal = server().await;
        portal.stop();
        portal.start().unwrap();
        portal.stop();
        portal.stop();
        assert!(!portal.is_listening());
        assert_eq!(portal.local_addr(), None);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let settings = PortalConfig {
            bind: IpAddr::from([127, 0, 0, 1]),
            port: taken.local_addr().unwrap().port(),
            ..PortalConfig::default()
        };
        let store = SqliteCredentialStore::in_memory().await.unwrap();
        let mut portal =
            CaptivePortalServer::new(settings, Arc::new(EmbeddedAssets), Arc::new(store), Arc::new(|| {}));

        assert!(matches!(portal.start(), Err(PortalError::Bind { .. })));
        assert!(!portal.is_listening());
    }
}
