//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the breaker, activity tracker and freezer hooks from config
//! - Assemble the proxy router
//! - Serve until shutdown, applying capacity updates from config reloads
//! - Run the admin API alongside when enabled

use std::sync::Arc;
use std::time::Duration;

use axum::http::uri::InvalidUri;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::activity::{ConcurrencyState, ConcurrencyStateLayer, StateHook};
use crate::admin::{setup_admin_router, AdminState};
use crate::admission::{AdmissionState, Breaker};
use crate::config::{AdmissionConfig, SidecarConfig};
use crate::freezer::{FreezerClient, FreezerError};
use crate::http::proxy::{proxy_router, ForwardState, ProxyParts};
use crate::lifecycle::shutdown;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid backend address: {0}")]
    Backend(#[from] InvalidUri),
    #[error("freezer: {0}")]
    Freezer(#[from] FreezerError),
}

/// HTTP server for the sidecar.
pub struct HttpServer {
    router: Router,
    config: SidecarConfig,
    breaker: Option<Arc<Breaker>>,
    activity: Arc<ConcurrencyState>,
}

impl HttpServer {
    /// Create a server whose hooks call the configured freezer, if any.
    pub fn new(config: SidecarConfig) -> Result<Self, ServerError> {
        let (on_active, on_idle) = match FreezerClient::from_config(&config.freezer)? {
            Some(freezer) => {
                let (resume, pause) = Arc::new(freezer).hooks();
                (Some(resume), Some(pause))
            }
            None => (None, None),
        };
        Self::with_hooks(config, on_active, on_idle)
    }

    /// Create a server with explicit idle/active hooks.
    pub fn with_hooks(
        config: SidecarConfig,
        on_active: Option<StateHook>,
        on_idle: Option<StateHook>,
    ) -> Result<Self, ServerError> {
        let breaker = config
            .admission
            .breaker_params()
            .map(|params| Arc::new(Breaker::new(params)));
        let activity = Arc::new(ConcurrencyState::new(on_active, on_idle));

        let forward = ForwardState::new(
            &config.backend,
            Duration::from_secs(config.timeouts.connect_secs),
        )?;

        let router = proxy_router(ProxyParts {
            forward,
            admission: AdmissionState::new(breaker.clone(), config.admission.queue_timeout()),
            activity: ConcurrencyStateLayer::from_state(activity.clone()),
            tracing_enabled: config.observability.trace_requests,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        });

        tracing::info!(
            backend = %config.backend.address,
            breaker = ?breaker,
            freezer_hooks = activity.has_hooks(),
            "HTTP server configured"
        );

        Ok(Self {
            router,
            config,
            breaker,
            activity,
        })
    }

    pub fn breaker(&self) -> Option<&Arc<Breaker>> {
        self.breaker.as_ref()
    }

    pub fn activity(&self) -> &Arc<ConcurrencyState> {
        &self.activity
    }

    /// State for an admin API bound to this server's breaker and tracker.
    pub fn admin_state(&self) -> AdminState {
        AdminState::new(
            self.breaker.clone(),
            self.activity.clone(),
            &self.config.admin.api_key,
        )
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<SidecarConfig>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let admin = setup_admin_router(self.admin_state());
            let admin_shutdown = shutdown_rx.resubscribe();
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API starting");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(shutdown::wait(admin_shutdown))
                    .await
                {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let updates = tokio::spawn(apply_config_updates(
            self.breaker.clone(),
            self.config.admission.clone(),
            config_updates,
        ));

        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown_rx))
            .await;
        updates.abort();
        result?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Tracks reloaded admission settings against those fixed at startup.
struct ReloadTracker {
    startup: AdmissionConfig,
    last_requested: (usize, Option<usize>),
}

impl ReloadTracker {
    fn new(startup: AdmissionConfig) -> Self {
        let last_requested = (startup.container_concurrency, startup.queue_depth);
        Self {
            startup,
            last_requested,
        }
    }

    /// True when `next` newly asks for a ceiling or queue depth other than
    /// the startup values. Repeats of the same request report false.
    fn fixed_change_requested(&mut self, next: &AdmissionConfig) -> bool {
        let requested = (next.container_concurrency, next.queue_depth);
        let fixed = (self.startup.container_concurrency, self.startup.queue_depth);
        let changed = requested != fixed && requested != self.last_requested;
        self.last_requested = requested;
        changed
    }

    /// Capacity to apply for `next`, defaulting to the startup ceiling.
    fn capacity(&self, next: &AdmissionConfig) -> usize {
        next.initial_capacity.unwrap_or(self.startup.container_concurrency)
    }
}

/// Apply live-reloadable admission settings from reloaded configs.
async fn apply_config_updates(
    breaker: Option<Arc<Breaker>>,
    startup: AdmissionConfig,
    mut updates: mpsc::UnboundedReceiver<SidecarConfig>,
) {
    let mut tracker = ReloadTracker::new(startup);

    while let Some(config) = updates.recv().await {
        let next = config.admission;
        if tracker.fixed_change_requested(&next) {
            tracing::warn!(
                container_concurrency = next.container_concurrency,
                queue_depth = ?next.queue_depth,
                "Concurrency ceiling and queue depth are fixed at startup, ignoring change"
            );
        }

        let Some(breaker) = &breaker else {
            tracing::debug!("No breaker configured, nothing to update");
            continue;
        };

        breaker.update_concurrency(tracker.capacity(&next));
        tracing::info!(capacity = breaker.capacity(), "Applied capacity from reloaded config");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_concurrency(container_concurrency: usize) -> SidecarConfig {
        let mut config = SidecarConfig::default();
        config.admission.container_concurrency = container_concurrency;
        config
    }

    async fn wait_for_capacity(breaker: &Breaker, want: usize) {
        for _ in 0..1000 {
            if breaker.capacity() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("capacity never reached {}", want);
    }

    #[tokio::test]
    async fn test_reload_updates_capacity() {
        let config = config_with_concurrency(4);
        let server = HttpServer::with_hooks(config.clone(), None, None).unwrap();
        let breaker = server.breaker().unwrap().clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(apply_config_updates(
            Some(breaker.clone()),
            config.admission.clone(),
            rx,
        ));

        let mut lowered = config.clone();
        lowered.admission.initial_capacity = Some(1);
        tx.send(lowered).unwrap();
        wait_for_capacity(&breaker, 1).await;

        // A new ceiling is ignored; the capacity is clamped to the startup one.
        let mut raised = config_with_concurrency(64);
        raised.admission.initial_capacity = Some(64);
        tx.send(raised).unwrap();
        wait_for_capacity(&breaker, 4).await;

        let mut lowered = config.clone();
        lowered.admission.initial_capacity = Some(2);
        tx.send(lowered).unwrap();
        wait_for_capacity(&breaker, 2).await;

        // Without an explicit capacity, the startup ceiling applies again.
        tx.send(config.clone()).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(breaker.max_concurrency(), 4);
        assert_eq!(breaker.capacity(), 4);
    }

    #[test]
    fn test_fixed_setting_change_reported_once() {
        let startup = config_with_concurrency(4).admission;
        let mut tracker = ReloadTracker::new(startup.clone());

        assert!(!tracker.fixed_change_requested(&startup));

        let mut raised = startup.clone();
        raised.container_concurrency = 8;
        assert!(tracker.fixed_change_requested(&raised));
        assert!(!tracker.fixed_change_requested(&raised));

        let mut deeper = raised.clone();
        deeper.queue_depth = Some(100);
        assert!(tracker.fixed_change_requested(&deeper));

        // Returning to the startup values is not a change.
        assert!(!tracker.fixed_change_requested(&startup));
        assert!(tracker.fixed_change_requested(&raised));
    }

    #[test]
    fn test_reload_capacity_defaults_to_startup_ceiling() {
        let startup = config_with_concurrency(4).admission;
        let tracker = ReloadTracker::new(startup.clone());

        let mut next = config_with_concurrency(16).admission;
        assert_eq!(tracker.capacity(&next), 4);
        next.initial_capacity = Some(3);
        assert_eq!(tracker.capacity(&next), 3);
    }

    #[test]
    fn test_unbounded_config_has_no_breaker() {
        let server = HttpServer::with_hooks(config_with_concurrency(0), None, None).unwrap();
        assert!(server.breaker().is_none());
        assert!(!server.activity().has_hooks());
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let mut config = SidecarConfig::default();
        config.backend.address = "not an address".into();
        assert!(matches!(
            HttpServer::with_hooks(config, None, None),
            Err(ServerError::Backend(_))
        ));
    }
}
