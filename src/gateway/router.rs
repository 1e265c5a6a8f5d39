//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, State},
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use csar_core::ArtifactIdentity;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, error, warn};

use super::auth::{ANONYMOUS, AuthenticatedClient, ResolvedAuthConfig, auth_middleware};
use super::context::{EventContext, Operation};
use super::proxy::{CsarProxy, OutboundBody, error_response};
use super::rewrite::{UploadForm, is_multipart_form_data};
use crate::config::UploadConfig;
use crate::notification::ProjectCatalog;

/// Shared application state
pub struct AppState {
    /// Backend proxy
    pub proxy: CsarProxy,
    /// Project existence and visibility lookup
    pub projects: Arc<dyn ProjectCatalog>,
    /// Upload form layout
    pub upload: UploadConfig,
    /// Authentication configuration
    pub auth_config: Arc<ResolvedAuthConfig>,
    /// Request body limit in bytes
    pub max_body_size: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_config = Arc::clone(&state.auth_config);
    let body_limit = state.max_body_size;

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/{namespace}/artifacts",
            get(list_handler).post(upload_handler),
        )
        .route(
            "/{namespace}/artifacts/{name}",
            get(detail_handler).delete(delete_handler),
        )
        .route("/{namespace}/artifacts/{name}/download", get(download_handler))
        .layer(middleware::from_fn_with_state(auth_config, auth_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Operator recorded for the request
fn operator(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<AuthenticatedClient>()
        .map_or_else(|| ANONYMOUS.to_string(), |c| c.name.clone())
}

/// Reject empty or unknown namespaces before anything is forwarded
async fn check_namespace(state: &AppState, namespace: &str) -> Result<(), Response> {
    if namespace.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "empty namespace"));
    }
    if namespace.contains('/') {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            &format!("namespace '{namespace}' must not contain '/'"),
        ));
    }
    match state.projects.exists(namespace).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(error_response(
            StatusCode::NOT_FOUND,
            &format!("namespace {namespace} not found"),
        )),
        Err(e) => {
            error!(namespace = %namespace, error = %e, "Project lookup failed");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("check existence of namespace {namespace} failed"),
            ))
        }
    }
}

/// Visibility at request time; lookup failures count as private
async fn is_public(state: &AppState, namespace: &str) -> bool {
    state.projects.is_public(namespace).await.unwrap_or_else(|e| {
        warn!(namespace = %namespace, error = %e, "Project visibility lookup failed");
        false
    })
}

/// Context for download and delete requests
async fn artifact_context(
    state: &AppState,
    operation: Operation,
    namespace: String,
    name: String,
    operator: String,
) -> Result<EventContext, Response> {
    let public = is_public(state, &namespace).await;
    let identity = ArtifactIdentity::new(namespace, name)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e.to_string()))?;
    Ok(EventContext::new(operation, identity, operator).with_public(public))
}

/// List artifacts (GET /{namespace}/artifacts)
async fn list_handler(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    request: Request<Body>,
) -> Response {
    if let Err(resp) = check_namespace(&state, &namespace).await {
        return resp;
    }
    state.proxy.forward(request, None).await
}

/// Artifact detail (GET /{namespace}/artifacts/{name})
async fn detail_handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, _name)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    if let Err(resp) = check_namespace(&state, &namespace).await {
        return resp;
    }
    state.proxy.forward(request, None).await
}

/// Download (GET /{namespace}/artifacts/{name}/download)
async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    if let Err(resp) = check_namespace(&state, &namespace).await {
        return resp;
    }
    let operator = operator(&request);
    match artifact_context(&state, Operation::Download, namespace, name, operator).await {
        Ok(ctx) => state.proxy.forward(request, Some(ctx)).await,
        Err(resp) => resp,
    }
}

/// Delete (DELETE /{namespace}/artifacts/{name})
async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    if let Err(resp) = check_namespace(&state, &namespace).await {
        return resp;
    }
    let operator = operator(&request);
    match artifact_context(&state, Operation::Delete, namespace, name, operator).await {
        Ok(ctx) => state.proxy.forward(request, Some(ctx)).await,
        Err(resp) => resp,
    }
}

/// Upload (POST /{namespace}/artifacts)
///
/// A multipart body is buffered, its metadata read into the upload context,
/// and the configured fields re-encoded into a fresh form for the backend.
/// Any other body is forwarded as-is without a context.
async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    request: Request<Body>,
) -> Response {
    if let Err(resp) = check_namespace(&state, &namespace).await {
        return resp;
    }
    let operator = operator(&request);

    if !is_multipart_form_data(request.headers()) {
        warn!(namespace = %namespace, "Upload is not multipart/form-data, forwarding without event context");
        return state.proxy.forward(request, None).await;
    }

    // Extensions carry the configured body limit into the multipart reader
    let (parts, body) = request.into_parts();
    let inbound = Request::from_parts(parts.clone(), body);
    let multipart = match Multipart::from_request(inbound, &()).await {
        Ok(m) => m,
        Err(rejection) => return error_response(rejection.status(), &rejection.body_text()),
    };
    let form = match UploadForm::read(multipart).await {
        Ok(form) => form,
        Err(e) => {
            error!(namespace = %namespace, error = %e, "Failed to read upload form");
            return error_response(e.status_code(), &e.to_string());
        }
    };

    let ctx = upload_context(&state, &form, &namespace, operator).await;

    let rebuilt = match form.rebuild(&state.upload.form_fields) {
        Ok(rebuilt) => rebuilt,
        Err(e) => {
            error!(namespace = %namespace, error = %e, "Failed to rebuild upload form");
            return error_response(e.status_code(), &e.to_string());
        }
    };

    state
        .proxy
        .forward_parts(&parts, OutboundBody::Multipart(rebuilt), ctx)
        .await
}

/// Upload context from the artifact part's filename and the version field
async fn upload_context(
    state: &AppState,
    form: &UploadForm,
    namespace: &str,
    operator: String,
) -> Option<EventContext> {
    let part = form.part(&state.upload.artifact_field)?;
    let Some(file_name) = part.file_name.as_deref().filter(|n| !n.is_empty()) else {
        warn!(field = %state.upload.artifact_field, "Artifact part has no filename, no event context");
        return None;
    };
    let identity = match ArtifactIdentity::new(namespace, file_name) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(namespace = %namespace, file_name = %file_name, error = %e, "Invalid artifact identity, no event context");
            return None;
        }
    };
    debug!(artifact = %identity, size = part.data.len(), "Built upload context");

    let public = is_public(state, namespace).await;
    Some(
        EventContext::new(Operation::Upload, identity, operator)
            .with_public(public)
            .with_version(form.text(&state.upload.version_field)),
    )
}
