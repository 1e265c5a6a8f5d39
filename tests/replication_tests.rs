//! Replication tests
//!
//! Runs the HTTP adapter and the transfer engine against in-process fake
//! registries that implement the CSAR artifact API, and the gateway's
//! upload-triggered replication against a fake storage backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::TryStreamExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceExt;

use csar_gateway::Error;
use csar_gateway::config::{Config, ReplicationTargetConfig, Secret};
use csar_gateway::csar_core::{
    ArtifactIdentity, Filter, RegistryCredential, RegistryDescriptor, Resource,
};
use csar_gateway::events::{ReplicationEvent, ReplicationEventHandler};
use csar_gateway::gateway::{EventContext, Gateway, Operation};
use csar_gateway::replication::{
    Adapter, AdapterRegistry, HttpAdapter, ReplicationTrigger, Transfer, TransferOutcome,
    TransferState,
};

#[derive(Debug, Clone)]
struct Stored {
    version: String,
    labels: Vec<String>,
    content: Vec<u8>,
}

#[derive(Default)]
struct FakeRegistry {
    csars: Mutex<BTreeMap<(String, String), Stored>>,
    uploaded_files: Mutex<Vec<String>>,
    authorizations: Mutex<Vec<Option<String>>>,
}

impl FakeRegistry {
    fn put(&self, namespace: &str, name: &str, version: &str, labels: &[&str], content: &[u8]) {
        self.csars.lock().insert(
            (namespace.to_string(), name.to_string()),
            Stored {
                version: version.to_string(),
                labels: labels.iter().map(ToString::to_string).collect(),
                content: content.to_vec(),
            },
        );
    }

    fn get(&self, namespace: &str, name: &str) -> Option<Stored> {
        self.csars
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn record_auth(&self, headers: &HeaderMap) {
        self.authorizations.lock().push(
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string),
        );
    }
}

type Shared = State<Arc<FakeRegistry>>;

async fn list_projects(State(reg): Shared) -> Json<serde_json::Value> {
    let mut names: Vec<String> = reg.csars.lock().keys().map(|(ns, _)| ns.clone()).collect();
    names.dedup();
    Json(json!(
        names
            .into_iter()
            .map(|name| json!({"name": name, "metadata": {"public": "true"}}))
            .collect::<Vec<_>>()
    ))
}

async fn list_csars(State(reg): Shared, Path(namespace): Path<String>) -> Json<serde_json::Value> {
    let entries: Vec<_> = reg
        .csars
        .lock()
        .keys()
        .filter(|(ns, _)| *ns == namespace)
        .map(|(_, name)| json!({"name": name}))
        .collect();
    Json(json!(entries))
}

async fn detail(
    State(reg): Shared,
    headers: HeaderMap,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    reg.record_auth(&headers);
    match reg.get(&namespace, &name) {
        Some(stored) => Json(json!({
            "name": name,
            "version": stored.version,
            "labels": stored.labels.iter().map(|l| json!({"name": l})).collect::<Vec<_>>(),
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, "csar not found").into_response(),
    }
}

async fn download(State(reg): Shared, Path((namespace, name)): Path<(String, String)>) -> Response {
    match reg.get(&namespace, &name) {
        Some(stored) => stored.content.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn upload(
    State(reg): Shared,
    headers: HeaderMap,
    Path(namespace): Path<String>,
    mut multipart: Multipart,
) -> StatusCode {
    reg.record_auth(&headers);
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("csar") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await.unwrap();
        let name = file_name.trim_end_matches(".tgz").to_string();
        reg.uploaded_files.lock().push(file_name);
        reg.put(&namespace, &name, "uploaded", &[], &content);
        return StatusCode::CREATED;
    }
    StatusCode::BAD_REQUEST
}

async fn delete(State(reg): Shared, Path((namespace, name)): Path<(String, String)>) -> StatusCode {
    match reg.csars.lock().remove(&(namespace, name)) {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

/// Upload on the storage backend: the stored name is the part's filename
async fn backend_upload(
    State(reg): Shared,
    Path(namespace): Path<String>,
    mut multipart: Multipart,
) -> StatusCode {
    let mut artifact = None;
    let mut version = String::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("csar") => {
                let name = field.file_name().unwrap_or_default().to_string();
                artifact = Some((name, field.bytes().await.unwrap()));
            }
            Some("version") => version = field.text().await.unwrap(),
            _ => {}
        }
    }
    match artifact {
        Some((name, content)) => {
            reg.put(&namespace, &name, &version, &[], &content);
            StatusCode::CREATED
        }
        None => StatusCode::BAD_REQUEST,
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_registry() -> (String, Arc<FakeRegistry>) {
    let reg = Arc::new(FakeRegistry::default());
    let app = Router::new()
        .route("/api/projects", get(list_projects))
        .route(
            "/api/csarrepo/{namespace}/csars",
            get(list_csars).post(upload),
        )
        .route(
            "/api/csarrepo/{namespace}/csars/{name}",
            get(detail).delete(delete),
        )
        .route("/api/csarrepo/{namespace}/csars/{name}/download", get(download))
        .with_state(Arc::clone(&reg));
    (serve(app).await, reg)
}

/// Storage backend surface the gateway forwards to
async fn spawn_storage_backend() -> (String, Arc<FakeRegistry>) {
    let reg = Arc::new(FakeRegistry::default());
    let app = Router::new()
        .route(
            "/{namespace}/artifacts",
            get(list_csars).post(backend_upload),
        )
        .route(
            "/{namespace}/artifacts/{name}",
            get(detail).delete(delete),
        )
        .route("/{namespace}/artifacts/{name}/download", get(download))
        .with_state(Arc::clone(&reg));
    (serve(app).await, reg)
}

fn id(full: &str) -> ArtifactIdentity {
    full.parse().unwrap()
}

fn adapter(url: &str) -> HttpAdapter {
    HttpAdapter::new(&RegistryDescriptor::new("csar", url)).unwrap()
}

async fn read_all(adapter: &HttpAdapter, name: &str) -> Vec<u8> {
    let stream = adapter.download(&id(name)).await.unwrap();
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    chunks.concat()
}

#[tokio::test]
async fn test_exists() {
    let (url, reg) = spawn_registry().await;
    reg.put("test", "kong", "1.0", &[], b"kong");
    let adapter = adapter(&url);

    assert!(adapter.exists(&id("test/kong")).await.unwrap());
    assert!(!adapter.exists(&id("test/missing")).await.unwrap());
}

#[tokio::test]
async fn test_download_streams_content() {
    let (url, reg) = spawn_registry().await;
    reg.put("test", "kong", "1.0", &[], b"kong-package");
    assert_eq!(read_all(&adapter(&url), "test/kong").await, b"kong-package");
}

#[tokio::test]
async fn test_download_without_version_fails() {
    let (url, reg) = spawn_registry().await;
    reg.put("test", "kong", "", &[], b"kong");
    let err = adapter(&url).download(&id("test/kong")).await.err().unwrap();
    assert!(err.to_string().contains("no version"));
}

#[tokio::test]
async fn test_upload_sends_csar_field_with_credential() {
    let (url, reg) = spawn_registry().await;
    let mut descriptor = RegistryDescriptor::new("csar", &url);
    descriptor.credential = Some(RegistryCredential {
        access_key: "admin".into(),
        access_secret: "pw".into(),
    });
    let adapter = HttpAdapter::new(&descriptor).unwrap();

    let content: csar_gateway::replication::ArtifactStream = Box::pin(futures::stream::iter(vec![
        Ok(bytes::Bytes::from_static(b"part-1/")),
        Ok(bytes::Bytes::from_static(b"part-2")),
    ]));
    adapter.upload(&id("prod/kong"), content).await.unwrap();

    assert_eq!(reg.uploaded_files.lock().clone(), vec!["kong.tgz".to_string()]);
    assert_eq!(reg.get("prod", "kong").unwrap().content, b"part-1/part-2");
    assert!(
        reg.authorizations.lock()[0]
            .as_deref()
            .is_some_and(|v| v.starts_with("Basic "))
    );
}

#[tokio::test]
async fn test_delete() {
    let (url, reg) = spawn_registry().await;
    reg.put("test", "kong", "1.0", &[], b"kong");
    let adapter = adapter(&url);

    adapter.delete(&id("test/kong")).await.unwrap();
    assert!(reg.get("test", "kong").is_none());

    let err = adapter.delete(&id("test/kong")).await.unwrap_err();
    assert_eq!(err.backend_status(), Some(404));
}

#[tokio::test]
async fn test_fetch_applies_filters() {
    let (url, reg) = spawn_registry().await;
    reg.put("test", "kong", "1.0", &["stable"], b"");
    reg.put("test", "nginx", "2.0", &[], b"");
    reg.put("other", "kong", "1.1", &["stable"], b"");
    let adapter = adapter(&url);

    let all = adapter.fetch(&[]).await.unwrap();
    assert_eq!(all.len(), 3);

    let filtered = adapter
        .fetch(&[
            Filter::Name("*/kong".into()),
            Filter::Tag("1.*".into()),
            Filter::Label("stable".into()),
        ])
        .await
        .unwrap();
    let mut names: Vec<_> = filtered
        .iter()
        .map(|r| r.metadata.repository_name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["other/kong".to_string(), "test/kong".to_string()]);
    assert_eq!(filtered[0].metadata.artifacts[0].labels, vec!["stable".to_string()]);
    assert_eq!(filtered[0].metadata.repository_metadata["public"], "true");

    let by_tag = adapter.fetch(&[Filter::Tag("2.*".into())]).await.unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].metadata.repository_name, "test/nginx");
}

fn resources(src_url: &str, dst_url: &str, name: &str) -> (Resource, Resource) {
    let identity = id(name);
    (
        Resource::new(RegistryDescriptor::new("csar", src_url), &identity),
        Resource::new(RegistryDescriptor::new("harbor", dst_url), &identity),
    )
}

async fn run(src: &Resource, dst: &Resource) -> csar_gateway::Result<TransferOutcome> {
    let mut transfer = Transfer::new(Arc::new(AdapterRegistry::with_defaults()), Arc::new(|| false));
    transfer.initialize(src, dst)?;
    let outcome = transfer.execute().await;
    assert_eq!(
        transfer.state(),
        if outcome.is_ok() {
            TransferState::Done
        } else {
            TransferState::Failed
        }
    );
    outcome
}

#[tokio::test]
async fn test_transfer_between_registries() {
    let (src_url, src_reg) = spawn_registry().await;
    let (dst_url, dst_reg) = spawn_registry().await;
    src_reg.put("test", "kong", "1.0", &[], b"kong-v1");

    let (src, mut dst) = resources(&src_url, &dst_url, "test/kong");
    assert_eq!(run(&src, &dst).await.unwrap(), TransferOutcome::Copied);
    assert_eq!(dst_reg.get("test", "kong").unwrap().content, b"kong-v1");

    src_reg.put("test", "kong", "1.1", &[], b"kong-v2");
    assert_eq!(run(&src, &dst).await.unwrap(), TransferOutcome::SkippedExisting);
    assert_eq!(dst_reg.get("test", "kong").unwrap().content, b"kong-v1");

    dst.override_existing = true;
    assert_eq!(run(&src, &dst).await.unwrap(), TransferOutcome::Overwritten);
    assert_eq!(dst_reg.get("test", "kong").unwrap().content, b"kong-v2");

    dst.deleted = true;
    assert_eq!(run(&src, &dst).await.unwrap(), TransferOutcome::Deleted);
    assert!(dst_reg.get("test", "kong").is_none());
    assert_eq!(run(&src, &dst).await.unwrap(), TransferOutcome::SkippedAbsent);
}

#[tokio::test]
async fn test_transfer_missing_source_fails_download() {
    let (src_url, _src_reg) = spawn_registry().await;
    let (dst_url, dst_reg) = spawn_registry().await;
    let (src, dst) = resources(&src_url, &dst_url, "test/ghost");

    let err = run(&src, &dst).await.unwrap_err();
    assert!(matches!(err, Error::Transfer { ref name, .. } if name == "test/ghost"));
    assert!(dst_reg.uploaded_files.lock().is_empty());
}

#[tokio::test]
async fn test_transfer_unknown_registry_type() {
    let (src, mut dst) = resources("http://127.0.0.1:1", "http://127.0.0.1:2", "test/kong");
    dst.registry.registry_type = "quay".into();

    let mut transfer = Transfer::new(Arc::new(AdapterRegistry::with_defaults()), Arc::new(|| false));
    let err = transfer.initialize(&src, &dst).unwrap_err();
    assert!(matches!(err, Error::AdapterCreation(ref m) if m.contains("quay")));
    assert_eq!(transfer.state(), TransferState::Failed);
}

#[tokio::test]
async fn test_upload_event_replicates_to_targets() {
    let (src_url, src_reg) = spawn_registry().await;
    let (dst_url, dst_reg) = spawn_registry().await;
    src_reg.put("library", "vfw", "1.0", &[], b"vfw");

    let targets = vec![ReplicationTargetConfig {
        registry: RegistryDescriptor::new("harbor", &dst_url),
        namespace: Some("mirror".into()),
        override_existing: false,
    }];
    let trigger = ReplicationTrigger::new(
        Arc::new(AdapterRegistry::with_defaults()),
        RegistryDescriptor::new("csar", &src_url),
        targets,
    );

    let ctx = EventContext::new(Operation::Upload, id("library/vfw"), "alice");
    trigger.handle(&ReplicationEvent::from(&ctx)).await.unwrap();

    assert_eq!(dst_reg.get("mirror", "vfw").unwrap().content, b"vfw");
    assert!(dst_reg.get("library", "vfw").is_none());
}

#[tokio::test]
async fn test_gateway_upload_replicates_from_storage_backend() {
    let (backend_url, backend) = spawn_storage_backend().await;
    let (peer_url, peer) = spawn_registry().await;

    let mut config = Config::default();
    config.backend.url = backend_url;
    config.backend.secret = Secret::new("s3cret");
    config.events.retry.initial_backoff = Duration::from_millis(1);
    config.replication.targets = vec![ReplicationTargetConfig {
        registry: RegistryDescriptor::new("harbor", &peer_url),
        namespace: None,
        override_existing: false,
    }];
    let (app, worker) = Gateway::new(config).unwrap().router().unwrap();

    let body = "--BND\r\nContent-Disposition: form-data; name=\"csar\"; filename=\"vfw.csar\"\r\n\
                Content-Type: application/octet-stream\r\n\r\nVFW-PACKAGE\r\n\
                --BND\r\nContent-Disposition: form-data; name=\"version\"\r\n\r\n1.0\r\n\
                --BND--\r\n";
    let request = Request::builder()
        .method("POST")
        .uri("/library/artifacts")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BND")
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    worker.shutdown(Duration::from_secs(10)).await;

    assert_eq!(backend.get("library", "vfw.csar").unwrap().version, "1.0");
    assert_eq!(peer.get("library", "vfw.csar").unwrap().content, b"VFW-PACKAGE");
    let expected = format!("Basic {}", STANDARD.encode("csar_controller:s3cret"));
    assert_eq!(backend.authorizations.lock()[0].as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn test_backend_source_adapter_speaks_backend_surface() {
    let (backend_url, backend) = spawn_storage_backend().await;
    backend.put("library", "vfw.csar", "2.0", &[], b"vfw");
    let registry = AdapterRegistry::with_defaults();
    let adapter = registry
        .create(&RegistryDescriptor::new("csar-backend", &backend_url))
        .ok()
        .unwrap();

    assert!(adapter.exists(&id("library/vfw.csar")).await.unwrap());
    assert!(!adapter.exists(&id("library/other")).await.unwrap());
    let chunks: Vec<bytes::Bytes> = adapter
        .download(&id("library/vfw.csar"))
        .await
        .ok()
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.concat(), b"vfw");
    assert!(adapter.fetch(&[]).await.unwrap().is_empty());
}
