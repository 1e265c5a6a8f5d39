//! Retry logic with exponential backoff

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::Error;
use crate::config::RetryConfig;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Whether retries are enabled
    pub enabled: bool,
    /// Maximum attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff
    pub initial_backoff: Duration,
    /// Maximum backoff
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f32,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    /// Single attempt, no retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Create the exponential backoff builder
    #[must_use]
    pub fn create_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Execute a future with retry logic
///
/// # Errors
///
/// Returns the last error from `f` if all retry attempts are exhausted or
/// the error is not retryable.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut f = f;
    if !policy.enabled {
        return f().await;
    }

    f.retry(policy.create_backoff())
        .when(is_retryable)
        .notify(|e: &Error, delay: Duration| {
            debug!(
                operation = name,
                delay_ms = delay.as_millis(),
                error = %e,
                "Retrying after backoff"
            );
        })
        .await
}

/// Check if an error is retryable
fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Http(_) | Error::Io(_) | Error::Notification(_) => true,
        Error::Backend { status, .. } => *status >= 500,
        Error::Transfer { source, .. } | Error::ExistenceCheck { source, .. } => {
            is_retryable(source)
        }
        _ => false,
    }
}
