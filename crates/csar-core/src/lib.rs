//! Core value types shared by the CSAR gateway.
//!
//! - [`ArtifactIdentity`]: the `namespace/name` pair every operation is keyed by
//! - [`Resource`] and friends: the replication-side description of one artifact
//!   on one registry endpoint

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod identity;
pub mod resource;

pub use identity::{ArtifactIdentity, IdentityError};
pub use resource::{
    ArtifactInfo, Filter, RegistryCredential, RegistryDescriptor, Resource, ResourceMetadata,
};
