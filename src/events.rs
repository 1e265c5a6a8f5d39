//! Replication event queue
//!
//! A successful upload produces a [`ReplicationEvent`] that is handed to a
//! bounded queue and processed by a single background worker with its own
//! retry policy. Submitting never blocks the request path; a full queue drops
//! the event with a warning. On shutdown the worker drains what is queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csar_core::ArtifactIdentity;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::failsafe::{RetryPolicy, with_retry};
use crate::gateway::EventContext;

/// Artifact uploaded; candidates for event-based replication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationEvent {
    /// Event id, for log correlation
    pub id: Uuid,
    /// Uploaded artifact
    pub identity: ArtifactIdentity,
    /// Version tag supplied with the upload
    pub version: Option<String>,
    /// Project visibility at upload time
    pub public: bool,
    /// Uploader
    pub operator: String,
    /// Upload time
    pub occurred_at: DateTime<Utc>,
}

impl From<&EventContext> for ReplicationEvent {
    fn from(ctx: &EventContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: ctx.identity.clone(),
            version: ctx.version.clone(),
            public: ctx.public,
            operator: ctx.operator.clone(),
            occurred_at: ctx.occurred_at,
        }
    }
}

/// Consumer of replication events
#[async_trait]
pub trait ReplicationEventHandler: Send + Sync {
    /// Handle one event
    ///
    /// # Errors
    ///
    /// Returns an error if handling failed; the worker may retry.
    async fn handle(&self, event: &ReplicationEvent) -> Result<()>;
}

/// Sending side of the event queue
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<ReplicationEvent>,
}

impl EventQueue {
    /// Enqueue an event without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, event: ReplicationEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event_id = %event.id, artifact = %event.identity, "Replication event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(event_id = %event.id, artifact = %event.identity, "Replication event worker stopped, dropping event");
                false
            }
        }
    }
}

/// Background worker draining the event queue
pub struct EventWorker {
    queue: EventQueue,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl EventWorker {
    /// Spawn the worker on the current runtime
    #[must_use]
    pub fn spawn(
        handler: Arc<dyn ReplicationEventHandler>,
        capacity: usize,
        retry: RetryPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run(handler, rx, retry, shutdown.clone()));
        Self {
            queue: EventQueue { tx },
            shutdown,
            handle,
        }
    }

    /// Queue handle for producers
    #[must_use]
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Stop accepting events, process what is queued, and wait up to `timeout`
    pub async fn shutdown(self, timeout: Duration) {
        self.shutdown.cancel();
        drop(self.queue);
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => info!("Replication event worker drained"),
            Ok(Err(e)) => error!(error = %e, "Replication event worker panicked"),
            Err(_) => warn!(timeout = ?timeout, "Replication event worker did not drain in time"),
        }
    }
}

async fn run(
    handler: Arc<dyn ReplicationEventHandler>,
    mut rx: mpsc::Receiver<ReplicationEvent>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => process(handler.as_ref(), &event, &retry).await,
                None => return,
            },
            () = shutdown.cancelled() => break,
        }
    }

    rx.close();
    while let Some(event) = rx.recv().await {
        process(handler.as_ref(), &event, &retry).await;
    }
}

async fn process(handler: &dyn ReplicationEventHandler, event: &ReplicationEvent, retry: &RetryPolicy) {
    debug!(event_id = %event.id, artifact = %event.identity, "Handling replication event");
    if let Err(e) = with_retry(retry, "replication_event", || handler.handle(event)).await {
        error!(event_id = %event.id, artifact = %event.identity, error = %e, "Failed to handle replication event");
    }
}
