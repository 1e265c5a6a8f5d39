//! CSAR Gateway Library
//!
//! Reverse proxy in front of a CSAR artifact storage backend that turns
//! successful artifact operations into lifecycle notifications, plus a
//! transfer engine that replicates artifacts between registries.
//!
//! # Features
//!
//! - **Proxy**: path joining, internal credential injection, streaming
//!   pass-through and canonical `{"error": ...}` bodies
//! - **Notifications**: upload, download and delete events delivered to
//!   signed webhooks
//! - **Replication**: adapter registry keyed by registry type and a
//!   copy/delete transfer engine, triggered on upload or run from the CLI

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod failsafe;
pub mod gateway;
pub mod notification;
pub mod replication;

pub use csar_core;
pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {e}")))
}
