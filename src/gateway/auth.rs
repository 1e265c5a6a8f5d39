//! Authentication middleware for the CSAR gateway
//!
//! Supports:
//! - Bearer token authentication (`Authorization: Bearer <key>`)
//! - API key authentication (`X-API-Key: <key>`)
//! - Public paths that bypass authentication
//!
//! The authenticated client's name becomes the operator recorded in
//! lifecycle notifications. Authorization (RBAC) is not enforced here.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::AuthConfig;

/// Operator name used when authentication is disabled
pub const ANONYMOUS: &str = "anonymous";

/// Header carrying an API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolved authentication configuration (keys expanded)
#[derive(Debug, Default)]
pub struct ResolvedAuthConfig {
    /// Whether auth is enabled
    pub enabled: bool,
    /// Resolved API keys
    pub api_keys: Vec<ResolvedApiKey>,
    /// Public paths
    pub public_paths: Vec<String>,
}

/// API key with its value resolved
#[derive(Clone)]
pub struct ResolvedApiKey {
    /// The actual key value
    pub key: String,
    /// Client name
    pub name: String,
}

impl std::fmt::Debug for ResolvedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedApiKey")
            .field("key", &"***")
            .field("name", &self.name)
            .finish()
    }
}

impl ResolvedAuthConfig {
    /// Create resolved config from `AuthConfig`
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let api_keys: Vec<ResolvedApiKey> = config
            .api_keys
            .iter()
            .map(|k| ResolvedApiKey {
                key: k.key.resolve(),
                name: k.name.clone(),
            })
            .filter(|k| {
                if k.key.is_empty() {
                    warn!(client = %k.name, "API key resolved to an empty value, ignoring");
                }
                !k.key.is_empty()
            })
            .collect();

        if config.enabled && api_keys.is_empty() {
            warn!("Authentication enabled but no API keys configured; all requests will be rejected");
        }

        Self {
            enabled: config.enabled,
            api_keys,
            public_paths: config.public_paths.clone(),
        }
    }

    /// Check if a path is public (bypasses auth)
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p))
    }

    /// Validate a key and return the client if it matches
    #[must_use]
    pub fn validate_token(&self, token: &str) -> Option<AuthenticatedClient> {
        // Scan every key so timing does not reveal which one matched
        let mut found = None;
        for key in &self.api_keys {
            if bool::from(key.key.as_bytes().ct_eq(token.as_bytes())) && found.is_none() {
                found = Some(AuthenticatedClient {
                    name: key.name.clone(),
                });
            }
        }
        found
    }
}

/// Information about an authenticated client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient {
    /// Client name, recorded as the operator
    pub name: String,
}

impl AuthenticatedClient {
    /// Client used when authentication is disabled
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            name: ANONYMOUS.to_string(),
        }
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(auth_config): State<Arc<ResolvedAuthConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !auth_config.enabled {
        request.extensions_mut().insert(AuthenticatedClient::anonymous());
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();

    if auth_config.is_public_path(&path) {
        debug!(path = %path, "Public path, skipping auth");
        request.extensions_mut().insert(AuthenticatedClient {
            name: "public".to_string(),
        });
        return next.run(request).await;
    }

    let headers = request.headers();
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .or_else(|| headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()))
        .map(str::to_string);

    let Some(token) = token else {
        warn!(path = %path, "Missing credentials");
        return unauthorized_response(
            "Missing credentials. Use: Authorization: Bearer <key> or X-API-Key: <key>",
        );
    };

    if let Some(client) = auth_config.validate_token(&token) {
        debug!(client = %client.name, path = %path, "Authenticated request");
        request.extensions_mut().insert(client);
        next.run(request).await
    } else {
        warn!(path = %path, "Invalid API key");
        unauthorized_response("Invalid API key")
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeyConfig, Secret};

    fn config() -> ResolvedAuthConfig {
        ResolvedAuthConfig {
            enabled: true,
            api_keys: vec![
                ResolvedApiKey {
                    key: "key1".to_string(),
                    name: "ci-pipeline".to_string(),
                },
                ResolvedApiKey {
                    key: "key2".to_string(),
                    name: "operator-b".to_string(),
                },
            ],
            public_paths: vec!["/health".to_string()],
        }
    }

    #[test]
    fn test_public_path_check() {
        let config = config();
        assert!(config.is_public_path("/health"));
        assert!(config.is_public_path("/health/"));
        assert!(!config.is_public_path("/library/artifacts"));
        assert!(!config.is_public_path("/"));
    }

    #[test]
    fn test_api_key_validation() {
        let config = config();
        assert_eq!(config.validate_token("key1").unwrap().name, "ci-pipeline");
        assert_eq!(config.validate_token("key2").unwrap().name, "operator-b");
        assert!(config.validate_token("key").is_none());
        assert!(config.validate_token("").is_none());
    }

    #[test]
    fn test_from_config_drops_empty_keys() {
        let auth = AuthConfig {
            enabled: true,
            api_keys: vec![
                ApiKeyConfig {
                    key: Secret::new("env:CSAR_GATEWAY_TEST_UNSET_KEY_1234"),
                    name: "ghost".into(),
                },
                ApiKeyConfig {
                    key: Secret::new("literal"),
                    name: "real".into(),
                },
            ],
            public_paths: vec![],
        };
        let resolved = ResolvedAuthConfig::from_config(&auth);
        assert_eq!(resolved.api_keys.len(), 1);
        assert_eq!(resolved.api_keys[0].name, "real");
    }

    #[test]
    fn test_debug_redacts_key() {
        let dbg = format!("{:?}", config().api_keys[0]);
        assert!(!dbg.contains("key1"));
    }
}
