use std::sync::Arc;

use tracing::debug;

use ted_common::process;
use ted_queue::StagingQueue;

use crate::registry::ProjectionRegistry;
use crate::Result;

/// Write-path hook: stages projection work for paths some projection cares about.
pub struct ProjectionPipeline {
    registry: Arc<ProjectionRegistry>,
    staging: Arc<StagingQueue>,
}

impl ProjectionPipeline {
    pub fn new(registry: Arc<ProjectionRegistry>, staging: Arc<StagingQueue>) -> Self {
        Self { registry, staging }
    }

    pub fn registry(&self) -> &Arc<ProjectionRegistry> {
        &self.registry
    }

    /// Call after a successful write to `path`. Returns whether a task was staged.
    pub async fn after_write(&self, path: &str) -> Result<bool> {
        let path = process(path)?;

        if !self.registry.is_registered(&path) {
            debug!(path = %path, "No projection for written collection");
            return Ok(false);
        }

        self.staging.push_path(&path).await?;
        Ok(true)
    }
}
