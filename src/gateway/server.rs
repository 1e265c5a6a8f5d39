//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use super::auth::ResolvedAuthConfig;
use super::proxy::CsarProxy;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::events::{EventWorker, ReplicationEventHandler};
use crate::failsafe::RetryPolicy;
use crate::notification::{
    Dispatcher, LogNotifier, Notifier, ProjectCatalog, StaticProjectCatalog, WebhookNotifier,
};
use crate::replication::{AdapterRegistry, ReplicationTrigger};
use crate::{Error, Result};

/// Default webhook delivery timeout
const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// CSAR gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Project existence and visibility lookup
    projects: Arc<dyn ProjectCatalog>,
    /// Notification delivery
    notifier: Arc<dyn Notifier>,
    /// Consumer of replication events
    replication: Arc<dyn ReplicationEventHandler>,
}

impl Gateway {
    /// Create a gateway with the collaborators described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if a webhook client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let projects: Arc<dyn ProjectCatalog> =
            Arc::new(StaticProjectCatalog::new(config.projects.clone()));

        let notifier: Arc<dyn Notifier> = if config.notification.webhooks.is_empty() {
            Arc::new(LogNotifier)
        } else {
            let timeout = config.notification.timeout.unwrap_or(DEFAULT_WEBHOOK_TIMEOUT);
            Arc::new(WebhookNotifier::new(&config.notification.webhooks, timeout)?)
        };

        let source = config
            .replication
            .source
            .clone()
            .unwrap_or_else(|| ReplicationTrigger::backend_source(&config.backend));
        let replication: Arc<dyn ReplicationEventHandler> = Arc::new(
            ReplicationTrigger::new(
                Arc::new(AdapterRegistry::with_defaults()),
                source,
                config.replication.targets.clone(),
            )
            .with_retry_policy(RetryPolicy::new(&config.events.retry)),
        );

        Ok(Self {
            config,
            projects,
            notifier,
            replication,
        })
    }

    /// Replace the project catalog
    #[must_use]
    pub fn with_project_catalog(mut self, projects: Arc<dyn ProjectCatalog>) -> Self {
        self.projects = projects;
        self
    }

    /// Replace the notifier
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the replication event handler
    #[must_use]
    pub fn with_replication_handler(mut self, handler: Arc<dyn ReplicationEventHandler>) -> Self {
        self.replication = handler;
        self
    }

    /// Build the router and start the replication event worker.
    ///
    /// Must be called inside a Tokio runtime. The caller owns the worker and
    /// should shut it down after the router stops serving.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the backend URL is malformed.
    pub fn router(&self) -> Result<(Router, EventWorker)> {
        let worker = EventWorker::spawn(
            Arc::clone(&self.replication),
            self.config.events.queue_size,
            RetryPolicy::new(&self.config.events.retry),
        );

        let dispatcher = Dispatcher::new(
            self.config.notification.external_url.clone(),
            Arc::clone(&self.projects),
            Arc::clone(&self.notifier),
        );
        let proxy = CsarProxy::new(&self.config.backend, dispatcher, Some(worker.queue()))?;

        let state = Arc::new(AppState {
            proxy,
            projects: Arc::clone(&self.projects),
            upload: self.config.upload.clone(),
            auth_config: Arc::new(ResolvedAuthConfig::from_config(&self.config.auth)),
            max_body_size: self.config.server.max_body_size,
        });

        Ok((create_router(state), worker))
    }

    /// Run the gateway until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, the listener cannot be
    /// bound, or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (app, worker) = self.router()?;
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("CSAR GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(backend = %self.config.backend.url, "Forwarding to csar storage server");

        if self.config.auth.enabled {
            info!(
                api_keys = self.config.auth.api_keys.len(),
                "AUTHENTICATION enabled"
            );
        } else {
            warn!("AUTHENTICATION disabled - operator recorded as anonymous");
        }
        if self.config.notification.external_url.is_none() {
            warn!("notification.external_url not set - lifecycle notifications will not be built");
        }
        info!(
            webhooks = self.config.notification.webhooks.len(),
            replication_targets = self.config.replication.targets.len(),
            "Event delivery configured"
        );
        info!("============================================================");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()));

        info!("Draining replication events...");
        worker.shutdown(self.config.server.shutdown_timeout).await;

        served
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
