//! Static project catalog backed by configuration

use std::collections::HashMap;

use async_trait::async_trait;

use super::ProjectCatalog;
use crate::Result;
use crate::config::ProjectConfig;

/// Project catalog read from the `projects` config section.
///
/// With no projects configured every namespace exists and is private.
#[derive(Debug, Clone, Default)]
pub struct StaticProjectCatalog {
    projects: HashMap<String, ProjectConfig>,
}

impl StaticProjectCatalog {
    /// Create from configuration
    #[must_use]
    pub fn new(projects: HashMap<String, ProjectConfig>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl ProjectCatalog for StaticProjectCatalog {
    async fn exists(&self, namespace: &str) -> Result<bool> {
        Ok(self.projects.is_empty() || self.projects.contains_key(namespace))
    }

    async fn is_public(&self, namespace: &str) -> Result<bool> {
        Ok(self.projects.get(namespace).is_some_and(|p| p.public))
    }
}
