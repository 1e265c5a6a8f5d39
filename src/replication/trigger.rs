//! Upload-triggered replication
//!
//! Handles [`ReplicationEvent`]s by running one [`Transfer`] per configured
//! target, copying the uploaded artifact from the source registry. Each
//! target is retried on its own; a target that succeeded is never run again
//! for the same event.

use std::sync::Arc;

use async_trait::async_trait;
use csar_core::{ArtifactIdentity, RegistryCredential, RegistryDescriptor, Resource};
use tracing::{debug, error, info};

use super::transfer::{StopFn, Transfer, TransferOutcome};
use super::{AdapterRegistry, BACKEND_REGISTRY_TYPE};
use crate::Result;
use crate::config::{BackendConfig, ReplicationTargetConfig};
use crate::events::{ReplicationEvent, ReplicationEventHandler};
use crate::failsafe::{RetryPolicy, with_retry};

/// Replicates uploaded artifacts to the configured targets
pub struct ReplicationTrigger {
    registry: Arc<AdapterRegistry>,
    source: RegistryDescriptor,
    targets: Vec<ReplicationTargetConfig>,
    should_stop: StopFn,
    retry: RetryPolicy,
}

impl ReplicationTrigger {
    /// Create a trigger replicating from `source`
    #[must_use]
    pub fn new(
        registry: Arc<AdapterRegistry>,
        source: RegistryDescriptor,
        targets: Vec<ReplicationTargetConfig>,
    ) -> Self {
        Self {
            registry,
            source,
            targets,
            should_stop: Arc::new(|| false),
            retry: RetryPolicy::disabled(),
        }
    }

    /// Set the retry policy applied to each target
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the cancellation predicate checked before each copy
    #[must_use]
    pub fn with_stop(mut self, should_stop: StopFn) -> Self {
        self.should_stop = should_stop;
        self
    }

    /// The storage backend, addressed on its own `/{namespace}/artifacts`
    /// surface with the internal credential
    #[must_use]
    pub fn backend_source(backend: &BackendConfig) -> RegistryDescriptor {
        RegistryDescriptor {
            registry_type: BACKEND_REGISTRY_TYPE.to_string(),
            url: backend.url.clone(),
            insecure: backend.insecure,
            credential: Some(RegistryCredential {
                access_key: backend.username.clone(),
                access_secret: backend.secret.resolve(),
            }),
        }
    }

    /// Number of targets
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Replicate one artifact to one target
    ///
    /// # Errors
    ///
    /// Returns the transfer's error.
    pub async fn replicate(
        &self,
        identity: &ArtifactIdentity,
        target: &ReplicationTargetConfig,
    ) -> Result<TransferOutcome> {
        let dst_identity = match &target.namespace {
            Some(ns) => identity.with_namespace(ns.clone())?,
            None => identity.clone(),
        };

        let src = Resource::new(self.source.clone(), identity);
        let mut dst = Resource::new(target.registry.clone(), &dst_identity);
        dst.override_existing = target.override_existing;

        let mut transfer = Transfer::new(Arc::clone(&self.registry), Arc::clone(&self.should_stop));
        transfer.initialize(&src, &dst)?;
        transfer.execute().await
    }
}

#[async_trait]
impl ReplicationEventHandler for ReplicationTrigger {
    /// Never fails: target failures are logged once their retries run out.
    async fn handle(&self, event: &ReplicationEvent) -> Result<()> {
        if self.targets.is_empty() {
            debug!(artifact = %event.identity, "No replication targets configured");
            return Ok(());
        }

        for target in &self.targets {
            let result = with_retry(&self.retry, "replication_target", || {
                self.replicate(&event.identity, target)
            })
            .await;
            match result {
                Ok(outcome) => info!(
                    event_id = %event.id,
                    artifact = %event.identity,
                    target = %target.registry.url,
                    outcome = %outcome,
                    "Replication finished"
                ),
                Err(e) => error!(
                    event_id = %event.id,
                    artifact = %event.identity,
                    target = %target.registry.url,
                    error = %e,
                    "Replication failed"
                ),
            }
        }
        Ok(())
    }
}
