//! Webhook notifier
//!
//! POSTs notification payloads to every configured target whose topic and
//! namespace filters match, signing the body with HMAC-SHA256 when the
//! target has a secret.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, KeyInit, Mac};
use reqwest::Client;
use sha2::Sha256;
use tracing::{debug, warn};

use super::{NotificationPayload, Notifier};
use crate::config::WebhookTargetConfig;
use crate::{Error, Result};

/// Header carrying the payload signature (`sha256=<hex>`)
pub const SIGNATURE_HEADER: &str = "x-csar-signature";

/// Header carrying the topic
pub const TOPIC_HEADER: &str = "x-csar-event";

/// Webhook target with its secret resolved
#[derive(Clone)]
struct ResolvedTarget {
    url: String,
    topics: Vec<String>,
    namespaces: Vec<String>,
    secret: Option<String>,
}

impl ResolvedTarget {
    fn matches(&self, payload: &NotificationPayload) -> bool {
        let topic_ok = self.topics.is_empty()
            || self
                .topics
                .iter()
                .any(|t| t.eq_ignore_ascii_case(payload.topic.as_str()));
        let ns_ok = self.namespaces.is_empty()
            || self
                .namespaces
                .iter()
                .any(|n| n == "*" || *n == payload.repository.namespace);
        topic_ok && ns_ok
    }
}

/// Delivers payloads to HTTP webhooks
pub struct WebhookNotifier {
    client: Client,
    targets: Vec<ResolvedTarget>,
}

impl WebhookNotifier {
    /// Create from configured targets
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(targets: &[WebhookTargetConfig], timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build webhook client: {e}")))?;
        let targets = targets
            .iter()
            .map(|t| ResolvedTarget {
                url: t.url.clone(),
                topics: t.topics.clone(),
                namespaces: t.namespaces.clone(),
                secret: t.secret.as_ref().map(crate::config::Secret::resolve),
            })
            .collect();
        Ok(Self { client, targets })
    }

    /// Number of configured targets
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no targets are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    async fn deliver(&self, target: &ResolvedTarget, payload: &NotificationPayload, body: &[u8]) -> Result<()> {
        let mut request = self
            .client
            .post(&target.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(TOPIC_HEADER, payload.topic.as_str())
            .body(body.to_vec());
        if let Some(secret) = &target.secret {
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", sign(secret, body)?));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "webhook {} returned {status}: {message}",
                target.url
            )));
        }
        debug!(url = %target.url, topic = %payload.topic, "Webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        let mut first_error = None;

        for target in self.targets.iter().filter(|t| t.matches(payload)) {
            if let Err(e) = self.deliver(target, payload, &body).await {
                warn!(url = %target.url, topic = %payload.topic, error = %e, "Webhook delivery failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// HMAC-SHA256 of `body`, hex encoded
fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
