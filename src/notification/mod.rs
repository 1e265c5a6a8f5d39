//! Lifecycle notifications
//!
//! [`Dispatcher::build`] turns an [`EventContext`] into a
//! [`NotificationPayload`]; [`Dispatcher::publish`] hands it to a
//! [`Notifier`]. Project visibility is looked up when the payload is built,
//! not taken from the request, so a visibility change between request and
//! response is reflected in the notification.

mod catalog;
mod webhook;

pub use catalog::StaticProjectCatalog;
pub use webhook::WebhookNotifier;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::gateway::{EventContext, Operation};
use crate::{Error, Result};

/// Notification topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Artifact uploaded
    #[serde(rename = "UPLOAD_CSAR")]
    Upload,
    /// Artifact downloaded
    #[serde(rename = "DOWNLOAD_CSAR")]
    Download,
    /// Artifact deleted
    #[serde(rename = "DELETE_CSAR")]
    Delete,
}

impl Topic {
    /// Wire name of the topic
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "UPLOAD_CSAR",
            Self::Download => "DOWNLOAD_CSAR",
            Self::Delete => "DELETE_CSAR",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Operation> for Topic {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Upload => Self::Upload,
            Operation::Download => Self::Download,
            Operation::Delete => Self::Delete,
        }
    }
}

/// Repository visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Readable by anyone
    Public,
    /// Project members only
    Private,
}

/// Repository described by a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Artifact name
    pub name: String,
    /// Namespace (project)
    pub namespace: String,
    /// `namespace/name`
    pub full_name: String,
    /// Visibility at notification time
    pub visibility: Visibility,
}

/// Canonical lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Event topic
    pub topic: Topic,
    /// Unix seconds
    pub occurred_at: i64,
    /// Actor that triggered the event
    pub operator: String,
    /// Affected repository
    pub repository: RepositoryDescriptor,
    /// Backend-relative resource path
    pub resource_url: String,
}

/// Delivers notification payloads (policy matching and transport live here)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one payload
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed.
    async fn notify(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Project existence and visibility lookup
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    /// Whether the namespace exists
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProjectLookup`] if the lookup itself failed.
    async fn exists(&self, namespace: &str) -> Result<bool>;

    /// Whether the namespace is public
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProjectLookup`] if the lookup itself failed.
    async fn is_public(&self, namespace: &str) -> Result<bool>;
}

/// Notifier that only logs; used when no webhook is configured
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> Result<()> {
        debug!(
            topic = %payload.topic,
            repository = %payload.repository.full_name,
            operator = %payload.operator,
            "Notification (no webhook configured)"
        );
        Ok(())
    }
}

/// Builds and publishes lifecycle notifications
#[derive(Clone)]
pub struct Dispatcher {
    external_url: Option<String>,
    projects: Arc<dyn ProjectCatalog>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(
        external_url: Option<String>,
        projects: Arc<dyn ProjectCatalog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            external_url: external_url.filter(|u| !u.trim().is_empty()),
            projects,
            notifier,
        }
    }

    /// Build the payload for `ctx`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the external base URL is not configured,
    /// or [`Error::ProjectLookup`] if visibility cannot be resolved.
    pub async fn build(&self, ctx: &EventContext) -> Result<NotificationPayload> {
        let external_url = self
            .external_url
            .as_deref()
            .ok_or_else(|| Error::Config("get external endpoint failed: not configured".into()))?;

        let namespace = ctx.identity.namespace();
        let name = ctx.identity.name();
        let visibility = if self.projects.is_public(namespace).await? {
            Visibility::Public
        } else {
            Visibility::Private
        };

        Ok(NotificationPayload {
            topic: ctx.operation.into(),
            occurred_at: ctx.occurred_at.timestamp(),
            operator: ctx.operator.clone(),
            repository: RepositoryDescriptor {
                name: name.to_string(),
                namespace: namespace.to_string(),
                full_name: ctx.identity.to_string(),
                visibility,
            },
            resource_url: format!("/api/{external_url}/csarrepo/{namespace}/csars/{name}"),
        })
    }

    /// Hand a payload to the notifier. Errors are returned unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the notifier's error.
    pub async fn publish(&self, payload: &NotificationPayload) -> Result<()> {
        self.notifier.notify(payload).await
    }

    /// Build and publish, logging any failure. Never fails.
    pub async fn emit(&self, ctx: &EventContext) {
        let topic = Topic::from(ctx.operation);
        match self.build(ctx).await {
            Ok(payload) => {
                if let Err(e) = self.publish(&payload).await {
                    error!(topic = %topic, artifact = %ctx.identity, error = %e, "Failed to publish notification");
                }
            }
            Err(e) => {
                error!(topic = %topic, artifact = %ctx.identity, error = %e, "Failed to build notification");
            }
        }
    }
}
