//! HTTP adapter for registries exposing the CSAR artifact API
//!
//! Endpoints of a peer registry, relative to the registry URL:
//! - `GET  /api/projects`
//! - `GET  /api/csarrepo/{namespace}/csars`
//! - `GET  /api/csarrepo/{namespace}/csars/{name}`
//! - `GET  /api/csarrepo/{namespace}/csars/{name}/download`
//! - `POST /api/csarrepo/{namespace}/csars` (multipart field `csar`)
//! - `DELETE /api/csarrepo/{namespace}/csars/{name}`
//!
//! The storage backend serves the same operations under
//! `/{namespace}/artifacts` and has no project listing.

use async_trait::async_trait;
use csar_core::{
    ArtifactIdentity, ArtifactInfo, Filter, RegistryCredential, RegistryDescriptor, Resource,
    ResourceMetadata,
};
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{Adapter, ArtifactStream};
use crate::{Error, Result};

/// Multipart field carrying the artifact on upload
pub const UPLOAD_FIELD: &str = "csar";

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    name: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RepositoryEntry {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct LabelEntry {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct CsarDetail {
    #[serde(default)]
    version: String,
    #[serde(default)]
    labels: Vec<LabelEntry>,
}

/// Path layout of an artifact API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiLayout {
    /// `/api/csarrepo/{namespace}/csars[/{name}]`
    Registry,
    /// `/{namespace}/artifacts[/{name}]`
    Backend,
}

/// Adapter talking to a peer registry over HTTP
pub struct HttpAdapter {
    client: Client,
    base: String,
    layout: ApiLayout,
    credential: Option<RegistryCredential>,
    registry: RegistryDescriptor,
}

impl HttpAdapter {
    /// Create an adapter for a peer registry
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterCreation`] if the URL is malformed or the
    /// client cannot be built.
    pub fn new(descriptor: &RegistryDescriptor) -> Result<Self> {
        Self::with_layout(descriptor, ApiLayout::Registry)
    }

    /// Create an adapter speaking `layout`
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterCreation`] if the URL is malformed or the
    /// client cannot be built.
    pub fn with_layout(descriptor: &RegistryDescriptor, layout: ApiLayout) -> Result<Self> {
        let base = descriptor.url.trim().trim_end_matches('/').to_string();
        let url = Url::parse(&base).map_err(|e| {
            Error::AdapterCreation(format!("invalid registry URL {base}: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::AdapterCreation(format!(
                "registry URL must be http(s): {base}"
            )));
        }

        let client = Client::builder()
            .danger_accept_invalid_certs(descriptor.insecure)
            .build()
            .map_err(|e| Error::AdapterCreation(format!("failed to build registry client: {e}")))?;

        Ok(Self {
            client,
            base,
            layout,
            credential: descriptor.credential.clone(),
            registry: descriptor.clone(),
        })
    }

    fn repository_url(&self, namespace: &str) -> String {
        match self.layout {
            ApiLayout::Registry => format!("{}/api/csarrepo/{namespace}/csars", self.base),
            ApiLayout::Backend => format!("{}/{namespace}/artifacts", self.base),
        }
    }

    fn csar_url(&self, name: &ArtifactIdentity) -> String {
        format!("{}/{}", self.repository_url(name.namespace()), name.name())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credential {
            Some(c) => builder.basic_auth(&c.access_key, Some(&c.access_secret)),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = check(self.request(Method::GET, url).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn detail(&self, name: &ArtifactIdentity) -> Result<CsarDetail> {
        self.get_json(&self.csar_url(name)).await
    }

    async fn fetch_project(&self, project: &ProjectEntry, filters: &[Filter]) -> Result<Vec<Resource>> {
        let repositories: Vec<RepositoryEntry> =
            self.get_json(&self.repository_url(&project.name)).await?;

        let mut resources = Vec::new();
        for repository in repositories {
            let identity = ArtifactIdentity::new(project.name.clone(), repository.name)?;
            if !matches_name(filters, &identity.to_string())? {
                continue;
            }

            let detail = self.detail(&identity).await?;
            let artifact = ArtifactInfo {
                tags: vec![detail.version],
                labels: detail.labels.into_iter().map(|l| l.name).collect(),
            };
            if !matches_artifact(filters, &artifact)? {
                continue;
            }

            resources.push(Resource {
                registry: self.registry.clone(),
                metadata: ResourceMetadata {
                    repository_name: identity.to_string(),
                    repository_metadata: project.metadata.clone(),
                    artifacts: vec![artifact],
                },
                deleted: false,
                override_existing: false,
            });
        }
        Ok(resources)
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    async fn exists(&self, name: &ArtifactIdentity) -> Result<bool> {
        match self.detail(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.backend_status() == Some(404) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn download(&self, name: &ArtifactIdentity) -> Result<ArtifactStream> {
        let detail = self.detail(name).await?;
        if detail.version.is_empty() {
            return Err(Error::Internal(format!(
                "cannot get the download url for csar {name}: no version"
            )));
        }

        let url = format!("{}/download", self.csar_url(name));
        debug!(url = %url, "Downloading csar");
        let response = check(self.request(Method::GET, &url).send().await?).await?;
        Ok(Box::pin(response.bytes_stream().map_err(std::io::Error::other)))
    }

    async fn upload(&self, name: &ArtifactIdentity, content: ArtifactStream) -> Result<()> {
        let part = Part::stream(reqwest::Body::wrap_stream(content))
            .file_name(format!("{}.tgz", name.name()));
        let form = Form::new().part(UPLOAD_FIELD, part);

        let url = self.repository_url(name.namespace());
        debug!(url = %url, artifact = %name, "Uploading csar");
        check(self.request(Method::POST, &url).multipart(form).send().await?).await?;
        Ok(())
    }

    async fn delete(&self, name: &ArtifactIdentity) -> Result<()> {
        check(self.request(Method::DELETE, &self.csar_url(name)).send().await?).await?;
        Ok(())
    }

    async fn fetch(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        if self.layout == ApiLayout::Backend {
            debug!(url = %self.base, "Storage backend has no project listing");
            return Ok(Vec::new());
        }
        let projects: Vec<ProjectEntry> = self.get_json(&format!("{}/api/projects", self.base)).await?;
        let mut resources = Vec::new();
        for project in &projects {
            resources.extend(self.fetch_project(project, filters).await?);
        }
        Ok(resources)
    }
}

/// Map a non-2xx response to [`Error::Backend`]
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Backend {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            message
        },
    })
}

fn pattern(glob: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(glob).map_err(|e| Error::Config(format!("invalid filter pattern {glob}: {e}")))
}

/// Whether `full_name` passes every name filter
fn matches_name(filters: &[Filter], full_name: &str) -> Result<bool> {
    for filter in filters {
        if let Filter::Name(glob) = filter {
            if !pattern(glob)?.matches(full_name) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Whether `artifact` passes every tag and label filter
fn matches_artifact(filters: &[Filter], artifact: &ArtifactInfo) -> Result<bool> {
    for filter in filters {
        let ok = match filter {
            Filter::Name(_) => true,
            Filter::Tag(glob) => {
                let p = pattern(glob)?;
                artifact.tags.iter().any(|t| p.matches(t))
            }
            Filter::Label(label) => artifact.labels.iter().any(|l| l == label),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}
