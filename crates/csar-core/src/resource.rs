//! Replication resource model
//!
//! A [`Resource`] names one artifact on one registry endpoint. The replication
//! job builds a source and a destination resource and hands both to the
//! transfer engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{ArtifactIdentity, IdentityError};

/// Credential used to reach a registry
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredential {
    /// Access key (user name)
    pub access_key: String,
    /// Access secret (password or token)
    pub access_secret: String,
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("access_key", &self.access_key)
            .field("access_secret", &"***")
            .finish()
    }
}

/// Where a registry lives and how to talk to it.
///
/// Opaque to the transfer engine beyond being the key used to pick and build
/// an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDescriptor {
    /// Adapter type key (e.g. `csar`, `harbor`)
    #[serde(rename = "type")]
    pub registry_type: String,
    /// Base URL of the registry's artifact API
    pub url: String,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
    /// Optional credential
    #[serde(default)]
    pub credential: Option<RegistryCredential>,
}

impl RegistryDescriptor {
    /// Descriptor without credentials
    #[must_use]
    pub fn new(registry_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            registry_type: registry_type.into(),
            url: url.into(),
            insecure: false,
            credential: None,
        }
    }
}

/// Version tags and labels of one artifact revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Version tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Label names
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Repository-level metadata of a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Full `namespace/name` of the artifact
    pub repository_name: String,
    /// Free-form repository metadata (e.g. `public`)
    #[serde(default)]
    pub repository_metadata: serde_json::Map<String, serde_json::Value>,
    /// Artifact revisions covered by this resource
    #[serde(default)]
    pub artifacts: Vec<ArtifactInfo>,
}

/// One artifact on one registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Registry holding the artifact
    pub registry: RegistryDescriptor,
    /// Artifact metadata
    pub metadata: ResourceMetadata,
    /// Delete-intent transfer when set on the destination
    #[serde(default)]
    pub deleted: bool,
    /// Allow overwriting an existing artifact on the destination
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

impl Resource {
    /// Resource for `identity` on `registry` with default flags
    #[must_use]
    pub fn new(registry: RegistryDescriptor, identity: &ArtifactIdentity) -> Self {
        Self {
            registry,
            metadata: ResourceMetadata {
                repository_name: identity.to_string(),
                ..ResourceMetadata::default()
            },
            deleted: false,
            override_existing: false,
        }
    }

    /// Parse the repository name into an identity
    ///
    /// # Errors
    ///
    /// Returns an error if the repository name is not `namespace/name`.
    pub fn identity(&self) -> Result<ArtifactIdentity, IdentityError> {
        self.metadata.repository_name.parse()
    }
}

/// Filter applied when fetching resources from a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Filter {
    /// Glob over the full `namespace/name`
    Name(String),
    /// Glob over version tags
    Tag(String),
    /// Exact label name
    Label(String),
}
