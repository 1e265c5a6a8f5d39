//! Per-request event context
//!
//! Built by a route handler before forwarding and handed to
//! [`CsarProxy::forward`](super::CsarProxy::forward) by value. The response
//! interceptor consumes it, so one context can never outlive or be shared
//! beyond the request it was built for.

use chrono::{DateTime, Utc};
use csar_core::ArtifactIdentity;

/// Lifecycle operation carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Artifact upload (`POST /{namespace}/artifacts`)
    Upload,
    /// Artifact download (`GET .../{name}/download`)
    Download,
    /// Artifact deletion (`DELETE .../{name}`)
    Delete,
}

/// Metadata the response interceptor needs to emit a lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    /// Operation kind
    pub operation: Operation,
    /// Artifact the request targets
    pub identity: ArtifactIdentity,
    /// Authenticated actor
    pub operator: String,
    /// When the request was received
    pub occurred_at: DateTime<Utc>,
    /// Project visibility at request time
    pub public: bool,
    /// Version tag supplied with an upload
    pub version: Option<String>,
}

impl EventContext {
    /// Context stamped with the current time
    #[must_use]
    pub fn new(operation: Operation, identity: ArtifactIdentity, operator: impl Into<String>) -> Self {
        Self {
            operation,
            identity,
            operator: operator.into(),
            occurred_at: Utc::now(),
            public: false,
            version: None,
        }
    }

    /// Set project visibility
    #[must_use]
    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Set the version tag (empty strings are ignored)
    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }
}
