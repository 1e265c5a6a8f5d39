//! Outbound request rewriting
//!
//! - URL: backend scheme/host, backend base path joined with the inbound path
//!   by exactly one slash, backend query parameters first
//! - Headers: hop-by-hop headers dropped, default `User-Agent`,
//!   `X-Forwarded-Host`, basic auth for the internal service identity
//! - Multipart uploads: re-encoded from a buffered copy of the form

use std::collections::HashMap;
use std::fmt;

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header};
use base64::Engine;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};
use url::Url;

use crate::config::{FormFieldConfig, FormFieldKind};
use crate::{Error, Result};

/// `User-Agent` set on outbound requests that carry none
pub const DEFAULT_USER_AGENT: &str = concat!("csar-gateway/", env!("CARGO_PKG_VERSION"));

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Headers never forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Basic-auth credential of the internal service identity
#[derive(Clone)]
pub struct Credential {
    /// User name
    pub username: String,
    /// Password, read once at startup
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credential {
    /// `Authorization: Basic ...` value, marked sensitive
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded value is not a valid header value.
    pub fn authorization(&self) -> Result<HeaderValue> {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|e| Error::Config(format!("invalid backend credential: {e}")))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Join two path fragments with exactly one slash between them
#[must_use]
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Backend query parameters first, then the inbound ones
fn merge_query(target: &str, inbound: &str) -> String {
    if target.is_empty() || inbound.is_empty() {
        format!("{target}{inbound}")
    } else {
        format!("{target}&{inbound}")
    }
}

/// Rewrite an inbound URI onto the backend base URL
#[must_use]
pub fn outbound_url(backend: &Url, uri: &Uri) -> Url {
    let mut url = backend.clone();
    url.set_path(&single_joining_slash(backend.path(), uri.path()));
    let query = merge_query(backend.query().unwrap_or(""), uri.query().unwrap_or(""));
    url.set_query((!query.is_empty()).then_some(query.as_str()));
    url
}

/// Drop hop-by-hop headers in place
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Build the outbound header set from the inbound one
///
/// # Errors
///
/// Returns an error if the credential cannot be encoded.
pub fn outbound_headers(
    inbound: &HeaderMap,
    credential: &Credential,
    rebuilt_body: bool,
) -> Result<HeaderMap> {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    if rebuilt_body {
        // The rebuilt multipart form carries its own boundary
        headers.remove(header::CONTENT_TYPE);
    }

    if !headers.contains_key(header::USER_AGENT) {
        headers.insert(header::USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    }
    if let Some(host) = inbound.get(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    headers.insert(header::AUTHORIZATION, credential.authorization()?);
    Ok(headers)
}

/// Whether a request carries a `multipart/form-data` body
#[must_use]
pub fn is_multipart_form_data(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}

fn multipart_error(context: &str, e: &MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(format!("{context}: {}", e.body_text()))
    } else {
        Error::RequestRewrite(format!("{context}: {e}"))
    }
}

/// One buffered multipart field
#[derive(Debug, Clone)]
pub struct FormPart {
    /// Original filename, for file parts
    pub file_name: Option<String>,
    /// Part content type
    pub content_type: Option<String>,
    /// Field content
    pub data: Bytes,
}

/// Uploaded form buffered in memory.
///
/// The whole form is held in memory so it can be read twice: once for the
/// event context and once to build the forwarded body. Artifact size is
/// bounded by the server's body limit.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    parts: HashMap<String, FormPart>,
}

impl UploadForm {
    /// Read every field of a multipart body
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the body exceeds the request
    /// limit, or [`Error::RequestRewrite`] if it is not valid multipart.
    pub async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut parts = HashMap::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error("failed to read multipart form", &e))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                debug!("Skipping unnamed multipart field");
                continue;
            };
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(|e| {
                multipart_error(&format!("failed to read form field '{name}'"), &e)
            })?;
            parts.entry(name).or_insert(FormPart {
                file_name,
                content_type,
                data,
            });
        }
        Ok(Self { parts })
    }

    /// Add a part (used by tests and callers assembling forms directly)
    pub fn insert(&mut self, name: impl Into<String>, part: FormPart) {
        self.parts.insert(name.into(), part);
    }

    /// Buffered part by field name
    #[must_use]
    pub fn part(&self, name: &str) -> Option<&FormPart> {
        self.parts.get(name)
    }

    /// Text value of a field
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        self.parts
            .get(name)
            .map(|p| String::from_utf8_lossy(&p.data).into_owned())
    }

    /// Re-encode the configured fields into a fresh multipart form.
    ///
    /// A missing `must_have` field fails the whole request; a missing
    /// optional field is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestRewrite`] for a missing required field or an
    /// invalid part content type.
    pub fn rebuild(&self, fields: &[FormFieldConfig]) -> Result<Form> {
        let mut form = Form::new();
        for field in fields {
            let Some(part) = self.parts.get(&field.name) else {
                let msg = format!("get content of form field '{}' failed: field is missing", field.name);
                if field.must_have {
                    return Err(Error::RequestRewrite(msg));
                }
                warn!(field = %field.name, "{msg}");
                continue;
            };

            let rebuilt = match field.kind {
                FormFieldKind::Text => Part::text(String::from_utf8_lossy(&part.data).into_owned()),
                FormFieldKind::File => {
                    let file_name = part.file_name.clone().unwrap_or_else(|| field.name.clone());
                    let mut p = Part::stream(reqwest::Body::from(part.data.clone()))
                        .file_name(file_name);
                    if let Some(ct) = &part.content_type {
                        p = p.mime_str(ct).map_err(|e| {
                            Error::RequestRewrite(format!(
                                "invalid content type for form field '{}': {e}",
                                field.name
                            ))
                        })?;
                    }
                    p
                }
            };
            form = form.part(field.name.clone(), rebuilt);
        }
        Ok(form)
    }
}
