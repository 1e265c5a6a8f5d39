//! Artifact replication between registries
//!
//! An [`Adapter`] is the four-operation contract (exists, download, upload,
//! delete) a registry must satisfy to take part in replication, plus a
//! filtered listing used by schedulers. Adapters are built from a
//! [`RegistryDescriptor`] through the [`AdapterRegistry`], keyed by registry
//! type. The [`Transfer`] engine moves or deletes one artifact per job.

mod http;
mod transfer;
mod trigger;

pub use http::{ApiLayout, HttpAdapter};
pub use transfer::{StopFn, Transfer, TransferOutcome, TransferState};
pub use trigger::ReplicationTrigger;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use csar_core::{ArtifactIdentity, Filter, RegistryDescriptor, Resource};
use dashmap::DashMap;
use futures::stream::BoxStream;

use crate::{Error, Result};

/// Adapter type key of the CSAR artifact API
pub const CSAR_REGISTRY_TYPE: &str = "csar";

/// Adapter type key of a Harbor peer exposing the CSAR artifact API
pub const HARBOR_REGISTRY_TYPE: &str = "harbor";

/// Adapter type key of the storage backend behind the gateway
pub const BACKEND_REGISTRY_TYPE: &str = "csar-backend";

/// Artifact content as a byte stream. Dropping it releases the transport.
pub type ArtifactStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Registry operations needed by replication
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Whether the artifact exists
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    async fn exists(&self, name: &ArtifactIdentity) -> Result<bool>;

    /// Open the artifact content
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be read.
    async fn download(&self, name: &ArtifactIdentity) -> Result<ArtifactStream>;

    /// Store `content` under `name`
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the upload.
    async fn upload(&self, name: &ArtifactIdentity, content: ArtifactStream) -> Result<()>;

    /// Remove the artifact
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the deletion.
    async fn delete(&self, name: &ArtifactIdentity) -> Result<()>;

    /// List artifacts matching every filter
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    async fn fetch(&self, _filters: &[Filter]) -> Result<Vec<Resource>> {
        Ok(Vec::new())
    }
}

/// Builds an adapter for a registry descriptor
pub type AdapterFactory =
    Arc<dyn Fn(&RegistryDescriptor) -> Result<Box<dyn Adapter>> + Send + Sync>;

/// Adapter factories keyed by registry type
pub struct AdapterRegistry {
    factories: DashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Registry with the HTTP adapter under `csar` and `harbor`, and its
    /// backend layout under `csar-backend`
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let http: AdapterFactory = Arc::new(|descriptor: &RegistryDescriptor| {
            HttpAdapter::new(descriptor).map(|a| Box::new(a) as Box<dyn Adapter>)
        });
        registry.register(CSAR_REGISTRY_TYPE, Arc::clone(&http));
        registry.register(HARBOR_REGISTRY_TYPE, http);
        registry.register(
            BACKEND_REGISTRY_TYPE,
            Arc::new(|descriptor: &RegistryDescriptor| {
                HttpAdapter::with_layout(descriptor, ApiLayout::Backend)
                    .map(|a| Box::new(a) as Box<dyn Adapter>)
            }),
        );
        registry
    }

    /// Register (or replace) the factory for a registry type
    pub fn register(&self, registry_type: impl Into<String>, factory: AdapterFactory) {
        self.factories.insert(registry_type.into(), factory);
    }

    /// Registered registry types
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.iter().map(|f| f.key().clone()).collect();
        types.sort();
        types
    }

    /// Build an adapter for `descriptor`
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterCreation`] if the type is unknown or the
    /// factory fails.
    pub fn create(&self, descriptor: &RegistryDescriptor) -> Result<Box<dyn Adapter>> {
        let factory = self
            .factories
            .get(&descriptor.registry_type)
            .map(|f| Arc::clone(&*f))
            .ok_or_else(|| {
                Error::AdapterCreation(format!(
                    "adapter factory for {} not found",
                    descriptor.registry_type
                ))
            })?;
        factory(descriptor).map_err(|e| match e {
            Error::AdapterCreation(_) => e,
            other => Error::AdapterCreation(format!(
                "failed to create {} adapter for {}: {other}",
                descriptor.registry_type, descriptor.url
            )),
        })
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
