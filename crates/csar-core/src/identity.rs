//! Artifact identity

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised while parsing an [`ArtifactIdentity`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// No `/` separating namespace and name
    #[error("artifact name '{0}' is not of the form namespace/name")]
    MissingSeparator(String),
    /// Namespace part is empty
    #[error("artifact name '{0}' has an empty namespace")]
    EmptyNamespace(String),
    /// Name part is empty
    #[error("artifact name '{0}' has an empty name")]
    EmptyName(String),
    /// Namespace contains a `/`, so the canonical form would not split back
    #[error("namespace '{0}' must not contain '/'")]
    SlashInNamespace(String),
}

/// A `(namespace, name)` pair addressing one artifact.
///
/// The canonical form is `namespace/name`. Parsing splits on the first
/// slash only, so `a/b/c` is namespace `a`, name `b/c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactIdentity {
    namespace: String,
    name: String,
}

impl ArtifactIdentity {
    /// Create an identity from its two parts
    ///
    /// # Errors
    ///
    /// Returns an error if either part is empty or the namespace contains
    /// a slash.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, IdentityError> {
        let namespace = namespace.into();
        let name = name.into();
        if namespace.is_empty() {
            return Err(IdentityError::EmptyNamespace(format!("{namespace}/{name}")));
        }
        if namespace.contains('/') {
            return Err(IdentityError::SlashInNamespace(namespace));
        }
        if name.is_empty() {
            return Err(IdentityError::EmptyName(format!("{namespace}/{name}")));
        }
        Ok(Self { namespace, name })
    }

    /// Namespace (project) part
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Artifact name part
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same artifact name under another namespace
    ///
    /// # Errors
    ///
    /// Returns an error if `namespace` is empty or contains a slash.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Result<Self, IdentityError> {
        Self::new(namespace, self.name.clone())
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ArtifactIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = s
            .split_once('/')
            .ok_or_else(|| IdentityError::MissingSeparator(s.to_string()))?;
        if namespace.is_empty() {
            return Err(IdentityError::EmptyNamespace(s.to_string()));
        }
        if name.is_empty() {
            return Err(IdentityError::EmptyName(s.to_string()));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl Serialize for ArtifactIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ArtifactIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
