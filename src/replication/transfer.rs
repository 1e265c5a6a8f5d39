//! Replication transfer engine
//!
//! One [`Transfer`] moves (or deletes) one artifact between two registries:
//!
//! ```text
//! Uninitialized --initialize--> Initialized --execute--> Copying  --> Done | Failed
//!                                                    \-> Deleting --> Done | Failed
//! ```
//!
//! Skips (destination already present without override, destination already
//! absent on delete, cancellation) are successful outcomes. Every failure is
//! terminal for the job; retrying the whole job is the caller's decision.

use std::fmt;
use std::sync::Arc;

use csar_core::{ArtifactIdentity, Resource};
use tracing::{error, info, warn};

use super::{Adapter, AdapterRegistry};
use crate::error::TransferPhase;
use crate::{Error, Result};

/// Cooperative cancellation predicate, checked before each copy attempt
pub type StopFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Lifecycle state of a transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Adapters not created yet
    Uninitialized,
    /// Both adapters created
    Initialized,
    /// Copy in progress
    Copying,
    /// Delete in progress
    Deleting,
    /// Finished successfully (including skips)
    Done,
    /// Finished with an error
    Failed,
}

/// What a successful transfer did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Artifact copied to a destination that did not have it
    Copied,
    /// Artifact copied over an existing destination artifact
    Overwritten,
    /// Destination artifact deleted
    Deleted,
    /// Destination already had the artifact and override is off
    SkippedExisting,
    /// Delete requested but the destination has no such artifact
    SkippedAbsent,
    /// Job stopped before the copy started
    Cancelled,
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Copied => "copied",
            Self::Overwritten => "overwritten",
            Self::Deleted => "deleted",
            Self::SkippedExisting => "skipped (exists)",
            Self::SkippedAbsent => "skipped (absent)",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Everything `execute` needs, produced by `initialize`
struct Job {
    src: Box<dyn Adapter>,
    dst: Box<dyn Adapter>,
    src_name: ArtifactIdentity,
    dst_name: ArtifactIdentity,
    delete: bool,
    override_existing: bool,
}

/// One replication job
pub struct Transfer {
    registry: Arc<AdapterRegistry>,
    should_stop: StopFn,
    state: TransferState,
    job: Option<Job>,
}

impl Transfer {
    /// New job resolving adapters through `registry`
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>, should_stop: StopFn) -> Self {
        Self {
            registry,
            should_stop,
            state: TransferState::Uninitialized,
            job: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Create the source and destination adapters.
    ///
    /// Both adapters are created before anything is transferred; if either
    /// fails the job fails without any registry I/O.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterCreation`] if an adapter cannot be created,
    /// [`Error::InvalidIdentity`] for a malformed repository name, or
    /// [`Error::Internal`] if the job was already initialized.
    pub fn initialize(&mut self, src: &Resource, dst: &Resource) -> Result<()> {
        if self.state != TransferState::Uninitialized {
            return Err(Error::Internal(format!(
                "transfer cannot be initialized in state {:?}",
                self.state
            )));
        }
        match self.build_job(src, dst) {
            Ok(job) => {
                self.job = Some(job);
                self.state = TransferState::Initialized;
                Ok(())
            }
            Err(e) => {
                self.state = TransferState::Failed;
                Err(e)
            }
        }
    }

    fn build_job(&self, src: &Resource, dst: &Resource) -> Result<Job> {
        let src_name = src.identity()?;
        let dst_name = dst.identity()?;

        let src_adapter = self.registry.create(&src.registry).inspect_err(|e| {
            error!(error = %e, "Failed to create client for source registry");
        })?;
        info!(
            registry_type = %src.registry.registry_type,
            url = %src.registry.url,
            insecure = src.registry.insecure,
            "Client for source registry created"
        );

        let dst_adapter = self.registry.create(&dst.registry).inspect_err(|e| {
            error!(error = %e, "Failed to create client for destination registry");
        })?;
        info!(
            registry_type = %dst.registry.registry_type,
            url = %dst.registry.url,
            insecure = dst.registry.insecure,
            "Client for destination registry created"
        );

        Ok(Job {
            src: src_adapter,
            dst: dst_adapter,
            src_name,
            dst_name,
            delete: dst.deleted,
            override_existing: dst.override_existing,
        })
    }

    /// Run the job: delete on the destination if the destination resource is
    /// marked deleted, otherwise copy source to destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExistenceCheck`] or [`Error::Transfer`] on adapter
    /// failure, or [`Error::Internal`] if the job is not initialized.
    pub async fn execute(&mut self) -> Result<TransferOutcome> {
        let Some(job) = self.job.take() else {
            return Err(Error::Internal(format!(
                "transfer cannot be executed in state {:?}",
                self.state
            )));
        };

        let result = if job.delete {
            self.state = TransferState::Deleting;
            delete(&job).await
        } else {
            self.state = TransferState::Copying;
            info!(src = %job.src_name, dst = %job.dst_name, "Copying csar from source registry to destination registry");
            self.copy(&job).await
        };

        self.state = if result.is_ok() {
            TransferState::Done
        } else {
            TransferState::Failed
        };
        result
    }

    fn should_stop(&self) -> bool {
        let stopped = (self.should_stop)();
        if stopped {
            info!("The job is stopped");
        }
        stopped
    }

    async fn copy(&self, job: &Job) -> Result<TransferOutcome> {
        if self.should_stop() {
            return Ok(TransferOutcome::Cancelled);
        }

        let src = job.src_name.to_string();
        let dst = job.dst_name.to_string();

        let exists = job.dst.exists(&job.dst_name).await.map_err(|e| {
            error!(artifact = %dst, error = %e, "Failed to check the existence of csar on the destination registry");
            Error::existence_check(&dst, e)
        })?;

        if exists && !job.override_existing {
            warn!(artifact = %dst, "Csar exists on the destination registry and override is off, skip");
            return Ok(TransferOutcome::SkippedExisting);
        }
        if exists {
            warn!(artifact = %dst, "Csar exists on the destination registry and override is on, overwriting");
        }

        let content = job.src.download(&job.src_name).await.map_err(|e| {
            error!(artifact = %src, error = %e, "Failed to download the csar");
            Error::transfer(TransferPhase::Download, &src, e)
        })?;

        // The stream is consumed by the upload and dropped on every path
        job.dst.upload(&job.dst_name, content).await.map_err(|e| {
            error!(artifact = %dst, error = %e, "Failed to upload the csar");
            Error::transfer(TransferPhase::Upload, &dst, e)
        })?;

        info!(src = %src, dst = %dst, "Copy completed");
        Ok(if exists {
            TransferOutcome::Overwritten
        } else {
            TransferOutcome::Copied
        })
    }
}

async fn delete(job: &Job) -> Result<TransferOutcome> {
    let name = job.dst_name.to_string();

    let exists = job.dst.exists(&job.dst_name).await.map_err(|e| {
        error!(artifact = %name, error = %e, "Failed to check the existence of csar on the destination registry");
        Error::existence_check(&name, e)
    })?;
    if !exists {
        info!(artifact = %name, "Csar does not exist on the destination registry, skip");
        return Ok(TransferOutcome::SkippedAbsent);
    }

    info!(artifact = %name, "Deleting csar on the destination registry");
    job.dst.delete(&job.dst_name).await.map_err(|e| {
        error!(artifact = %name, error = %e, "Failed to delete the csar on the destination registry");
        Error::transfer(TransferPhase::Delete, &name, e)
    })?;
    info!(artifact = %name, "Delete completed");
    Ok(TransferOutcome::Deleted)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use csar_core::RegistryDescriptor;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::replication::ArtifactStream;

    /// Shared call counters and behavior of a fake registry
    #[derive(Default)]
    struct Calls {
        exists: AtomicUsize,
        download: AtomicUsize,
        upload: AtomicUsize,
        delete: AtomicUsize,
        uploaded_bytes: AtomicUsize,
        present: AtomicBool,
        fail_exists: AtomicBool,
        fail_download: AtomicBool,
        fail_upload: AtomicBool,
        fail_delete: AtomicBool,
    }

    impl Calls {
        fn total(&self) -> usize {
            self.exists.load(Ordering::SeqCst)
                + self.download.load(Ordering::SeqCst)
                + self.upload.load(Ordering::SeqCst)
                + self.delete.load(Ordering::SeqCst)
        }
    }

    struct FakeAdapter(Arc<Calls>);

    fn boom(op: &str) -> Error {
        Error::Backend {
            status: 500,
            message: format!("{op} failed"),
        }
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        async fn exists(&self, _name: &ArtifactIdentity) -> Result<bool> {
            self.0.exists.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_exists.load(Ordering::SeqCst) {
                return Err(boom("exists"));
            }
            Ok(self.0.present.load(Ordering::SeqCst))
        }

        async fn download(&self, _name: &ArtifactIdentity) -> Result<ArtifactStream> {
            self.0.download.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_download.load(Ordering::SeqCst) {
                return Err(boom("download"));
            }
            let chunks: Vec<std::io::Result<Bytes>> =
                vec![Ok(Bytes::from_static(b"csar-")), Ok(Bytes::from_static(b"bytes"))];
            Ok(futures::stream::iter(chunks).boxed())
        }

        async fn upload(&self, _name: &ArtifactIdentity, mut content: ArtifactStream) -> Result<()> {
            self.0.upload.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_upload.load(Ordering::SeqCst) {
                return Err(boom("upload"));
            }
            while let Some(chunk) = content.next().await {
                self.0.uploaded_bytes.fetch_add(chunk?.len(), Ordering::SeqCst);
            }
            Ok(())
        }

        async fn delete(&self, _name: &ArtifactIdentity) -> Result<()> {
            self.0.delete.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_delete.load(Ordering::SeqCst) {
                return Err(boom("delete"));
            }
            Ok(())
        }
    }

    struct Harness {
        src: Arc<Calls>,
        dst: Arc<Calls>,
        registry: Arc<AdapterRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            let src = Arc::new(Calls::default());
            let dst = Arc::new(Calls::default());
            let registry = Arc::new(AdapterRegistry::new());
            let s = Arc::clone(&src);
            registry.register(
                "fake-src",
                Arc::new(move |_: &RegistryDescriptor| {
                    Ok(Box::new(FakeAdapter(Arc::clone(&s))) as Box<dyn Adapter>)
                }),
            );
            let d = Arc::clone(&dst);
            registry.register(
                "fake-dst",
                Arc::new(move |_: &RegistryDescriptor| {
                    Ok(Box::new(FakeAdapter(Arc::clone(&d))) as Box<dyn Adapter>)
                }),
            );
            Self { src, dst, registry }
        }

        fn resources(&self, deleted: bool, override_existing: bool) -> (Resource, Resource) {
            let id = ArtifactIdentity::new("test", "kong").unwrap();
            let src = Resource::new(RegistryDescriptor::new("fake-src", "http://src"), &id);
            let mut dst = Resource::new(RegistryDescriptor::new("fake-dst", "http://dst"), &id);
            dst.deleted = deleted;
            dst.override_existing = override_existing;
            (src, dst)
        }

        async fn run(&self, deleted: bool, override_existing: bool) -> Result<TransferOutcome> {
            self.run_with_stop(deleted, override_existing, false).await
        }

        async fn run_with_stop(
            &self,
            deleted: bool,
            override_existing: bool,
            stopped: bool,
        ) -> Result<TransferOutcome> {
            let (src, dst) = self.resources(deleted, override_existing);
            let mut transfer = Transfer::new(Arc::clone(&self.registry), Arc::new(move || stopped));
            transfer.initialize(&src, &dst)?;
            assert_eq!(transfer.state(), TransferState::Initialized);
            let result = transfer.execute().await;
            let expected = if result.is_ok() {
                TransferState::Done
            } else {
                TransferState::Failed
            };
            assert_eq!(transfer.state(), expected);
            result
        }
    }

    #[tokio::test]
    async fn test_copy_to_absent_destination() {
        let h = Harness::new();
        assert_eq!(h.run(false, false).await.unwrap(), TransferOutcome::Copied);
        assert_eq!(h.src.download.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.upload.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.uploaded_bytes.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_copy_skips_existing_without_override() {
        let h = Harness::new();
        h.dst.present.store(true, Ordering::SeqCst);
        assert_eq!(h.run(false, false).await.unwrap(), TransferOutcome::SkippedExisting);
        assert_eq!(h.src.download.load(Ordering::SeqCst), 0);
        assert_eq!(h.dst.upload.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_copy_overwrites_existing_with_override() {
        let h = Harness::new();
        h.dst.present.store(true, Ordering::SeqCst);
        assert_eq!(h.run(false, true).await.unwrap(), TransferOutcome::Overwritten);
        assert_eq!(h.src.download.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.upload.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let h = Harness::new();
        assert_eq!(h.run(true, false).await.unwrap(), TransferOutcome::SkippedAbsent);
        assert_eq!(h.dst.delete.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_present() {
        let h = Harness::new();
        h.dst.present.store(true, Ordering::SeqCst);
        assert_eq!(h.run(true, false).await.unwrap(), TransferOutcome::Deleted);
        assert_eq!(h.dst.delete.load(Ordering::SeqCst), 1);
        assert_eq!(h.src.total(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_copy_makes_no_calls() {
        let h = Harness::new();
        assert_eq!(
            h.run_with_stop(false, false, true).await.unwrap(),
            TransferOutcome::Cancelled
        );
        assert_eq!(h.src.total(), 0);
        assert_eq!(h.dst.total(), 0);
    }

    #[tokio::test]
    async fn test_download_failure_is_transfer_error() {
        let h = Harness::new();
        h.src.fail_download.store(true, Ordering::SeqCst);
        let err = h.run(false, false).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transfer { phase: TransferPhase::Download, ref name, .. } if name == "test/kong"
        ));
        assert_eq!(h.dst.upload.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_transfer_error() {
        let h = Harness::new();
        h.dst.fail_upload.store(true, Ordering::SeqCst);
        let err = h.run(false, false).await.unwrap_err();
        assert!(matches!(err, Error::Transfer { phase: TransferPhase::Upload, .. }));
    }

    #[tokio::test]
    async fn test_delete_failure_is_transfer_error() {
        let h = Harness::new();
        h.dst.present.store(true, Ordering::SeqCst);
        h.dst.fail_delete.store(true, Ordering::SeqCst);
        let err = h.run(true, false).await.unwrap_err();
        assert!(matches!(err, Error::Transfer { phase: TransferPhase::Delete, .. }));
    }

    #[tokio::test]
    async fn test_existence_check_failure() {
        let h = Harness::new();
        h.dst.fail_exists.store(true, Ordering::SeqCst);
        let err = h.run(false, false).await.unwrap_err();
        assert!(matches!(err, Error::ExistenceCheck { .. }));
        assert_eq!(h.src.download.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_destination_type_fails_fast() {
        let h = Harness::new();
        let (src, mut dst) = h.resources(false, false);
        dst.registry.registry_type = "unknown".into();
        let mut transfer = Transfer::new(Arc::clone(&h.registry), Arc::new(|| false));
        let err = transfer.initialize(&src, &dst).unwrap_err();
        assert!(matches!(err, Error::AdapterCreation(_)));
        assert_eq!(transfer.state(), TransferState::Failed);
        assert_eq!(h.src.total() + h.dst.total(), 0);
        assert!(transfer.execute().await.is_err());
    }

    #[tokio::test]
    async fn test_execute_requires_initialize() {
        let h = Harness::new();
        let mut transfer = Transfer::new(Arc::clone(&h.registry), Arc::new(|| false));
        assert!(matches!(transfer.execute().await, Err(Error::Internal(_))));
        assert_eq!(transfer.state(), TransferState::Uninitialized);
    }
}
