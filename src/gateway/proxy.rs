//! Reverse proxy to the CSAR storage backend
//!
//! [`CsarProxy::forward`] rewrites an inbound request onto the backend,
//! injects the internal service credential, performs the call and passes the
//! backend response through the interceptor:
//!
//! - `201` + upload context: replication event queued, upload notification
//! - `200` + download context: download notification
//! - `204` + delete context: delete notification
//! - other `200..=307`: passed through unchanged
//! - `401`: remapped to `500` with a canonical error body
//! - any other status: body canonicalized to `{"error": "..."}`
//!
//! Notification and replication-event failures are only logged.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::Form;
use serde_json::json;
use tracing::{debug, error, info, warn};
use url::Url;

use super::context::{EventContext, Operation};
use super::rewrite::{Credential, outbound_headers, outbound_url, strip_hop_by_hop};
use crate::config::BackendConfig;
use crate::events::{EventQueue, ReplicationEvent};
use crate::notification::Dispatcher;
use crate::{Error, Result};

/// Body sent to the backend
pub enum OutboundBody {
    /// Inbound body streamed through unchanged
    Stream(Body),
    /// Multipart form rebuilt from a buffered upload
    Multipart(Form),
}

/// Proxy to one backend storage server
#[derive(Clone)]
pub struct CsarProxy {
    client: Client,
    backend: Url,
    credential: Credential,
    dispatcher: Dispatcher,
    events: Option<EventQueue>,
}

impl CsarProxy {
    /// Create a proxy for the configured backend.
    ///
    /// The backend secret is resolved once here and held for the lifetime
    /// of the proxy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the backend URL is malformed or the HTTP
    /// client cannot be built.
    pub fn new(config: &BackendConfig, dispatcher: Dispatcher, events: Option<EventQueue>) -> Result<Self> {
        let trimmed = config.url.trim().trim_end_matches('/');
        let backend = Url::parse(trimmed).map_err(|e| {
            Error::Config(format!("endpoint URL of csar storage server is malformed: {e}"))
        })?;
        if !matches!(backend.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "endpoint URL of csar storage server must be http(s): {trimmed}"
            )));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .danger_accept_invalid_certs(config.insecure)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("failed to build backend client: {e}")))?;

        let credential = Credential {
            username: config.username.clone(),
            password: config.secret.resolve(),
        };
        if credential.password.is_empty() {
            warn!("Backend secret is empty; requests will carry an empty password");
        }

        debug!(backend = %backend, "CSAR storage server configured");
        Ok(Self {
            client,
            backend,
            credential,
            dispatcher,
            events,
        })
    }

    /// Backend base URL
    #[must_use]
    pub fn backend(&self) -> &Url {
        &self.backend
    }

    /// Credential of the internal service identity
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Forward a request whose body is streamed through unchanged
    pub async fn forward(&self, request: Request<Body>, ctx: Option<EventContext>) -> Response<Body> {
        let (parts, body) = request.into_parts();
        self.forward_parts(&parts, OutboundBody::Stream(body), ctx).await
    }

    /// Forward a request head with an explicit outbound body
    pub async fn forward_parts(
        &self,
        parts: &axum::http::request::Parts,
        body: OutboundBody,
        ctx: Option<EventContext>,
    ) -> Response<Body> {
        info!(method = %parts.method, uri = %parts.uri, "Proxying csar request");

        let url = outbound_url(&self.backend, &parts.uri);
        let rebuilt = matches!(body, OutboundBody::Multipart(_));
        let headers = match outbound_headers(&parts.headers, &self.credential, rebuilt) {
            Ok(h) => h,
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        };

        let builder = self
            .client
            .request(parts.method.clone(), url.clone())
            .headers(headers);
        let builder = match body {
            OutboundBody::Stream(body) => {
                builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
            }
            OutboundBody::Multipart(form) => builder.multipart(form),
        };

        match builder.send().await {
            Ok(response) => self.intercept(response, ctx).await,
            Err(e) => {
                error!(url = %url, error = %e, "Backend request failed");
                error_response(StatusCode::BAD_GATEWAY, &format!("backend request failed: {e}"))
            }
        }
    }

    /// Lifecycle events plus status/body canonicalization
    async fn intercept(&self, response: reqwest::Response, ctx: Option<EventContext>) -> Response<Body> {
        let status = response.status();
        self.emit_lifecycle(status, ctx).await;

        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        if (StatusCode::OK..=StatusCode::TEMPORARY_REDIRECT).contains(&status) {
            let mut out = Response::new(Body::from_stream(response.bytes_stream()));
            *out.status_mut() = status;
            *out.headers_mut() = headers;
            return out;
        }

        let body = if status == StatusCode::UNAUTHORIZED {
            Ok(Bytes::new())
        } else {
            response.bytes().await.map_err(|e| e.to_string())
        };
        let (status, content) = canonicalize_error(status, body);
        canonical_response(status, headers, content)
    }

    /// Emit the notification (and replication event) a status implies.
    /// Consumes the context.
    async fn emit_lifecycle(&self, status: StatusCode, ctx: Option<EventContext>) {
        let expected = match status {
            StatusCode::CREATED => Operation::Upload,
            StatusCode::OK => Operation::Download,
            StatusCode::NO_CONTENT => Operation::Delete,
            _ => return,
        };

        let Some(ctx) = ctx else {
            if expected == Operation::Upload {
                warn!("Upload succeeded but carries no event context; skipping events");
            }
            return;
        };
        if ctx.operation != expected {
            return;
        }

        info!(operation = ?ctx.operation, artifact = %ctx.identity, "Csar operation succeeded, emitting events");
        if ctx.operation == Operation::Upload {
            if let Some(queue) = &self.events {
                queue.submit(ReplicationEvent::from(&ctx));
            }
        }
        self.dispatcher.emit(&ctx).await;
    }
}

/// Canonical `{"error": ...}` body for a failed backend response.
///
/// `401` becomes `500` so an upstream credential failure is never reported
/// to the client as its own. Other bodies keep their `error` string if they
/// carry one; otherwise the raw text becomes the error.
#[must_use]
pub fn canonicalize_error(
    status: StatusCode,
    body: std::result::Result<Bytes, String>,
) -> (StatusCode, Vec<u8>) {
    if status == StatusCode::UNAUTHORIZED {
        let content = json!({ "error": Error::UpstreamAuth.to_string() }).to_string();
        return (StatusCode::INTERNAL_SERVER_ERROR, content.into_bytes());
    }

    let message = match body {
        Err(e) => format!("{status}: {e}"),
        Ok(data) => match serde_json::from_slice::<BTreeMap<String, String>>(&data) {
            Ok(mut obj) if obj.contains_key("error") => obj.remove("error").unwrap_or_default(),
            _ => String::from_utf8_lossy(&data).into_owned(),
        },
    };
    (status, json!({ "error": message }).to_string().into_bytes())
}

fn canonical_response(status: StatusCode, mut headers: HeaderMap, content: Vec<u8>) -> Response<Body> {
    headers.remove(header::CONTENT_ENCODING);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content.len()));
    let mut out = Response::new(Body::from(content));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// JSON error response produced by the gateway itself
#[must_use]
pub fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let content = json!({ "error": message }).to_string().into_bytes();
    canonical_response(status, HeaderMap::new(), content)
}
