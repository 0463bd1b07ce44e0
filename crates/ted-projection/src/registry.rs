//! Projection registrations keyed by collection path.
//!
//! A collection path is the collection segments of an address joined by `/`
//! (`users/42/posts/7` belongs to `users/posts`). Every task path for that collection is routed
//! to the same callback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use ted_common::{DocumentPath, SEPARATOR};
use ted_queue::{CallbackError, ProjectionCallback};

use crate::{ProjectionError, Result};

#[derive(Default)]
pub struct ProjectionRegistry {
    callbacks: RwLock<HashMap<String, Arc<dyn ProjectionCallback>>>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the projection for a collection path, replacing any previous one.
    pub fn register(
        &self,
        collection_path: &str,
        callback: Arc<dyn ProjectionCallback>,
    ) -> Result<()> {
        if collection_path.is_empty()
            || collection_path.split(SEPARATOR).any(|segment| segment.is_empty())
        {
            return Err(ProjectionError::InvalidCollection(collection_path.to_string()));
        }

        let replaced = self
            .callbacks
            .write()
            .insert(collection_path.to_string(), callback)
            .is_some();

        if replaced {
            warn!(collection = %collection_path, "Projection registration replaced");
        } else {
            info!(collection = %collection_path, "Projection registered");
        }
        Ok(())
    }

    pub fn unregister(&self, collection_path: &str) -> bool {
        self.callbacks.write().remove(collection_path).is_some()
    }

    /// Callback projecting the collection `path` belongs to.
    pub fn lookup(&self, path: &DocumentPath) -> Option<Arc<dyn ProjectionCallback>> {
        self.callbacks.read().get(&path.collection_path()).cloned()
    }

    pub fn is_registered(&self, path: &DocumentPath) -> bool {
        self.callbacks.read().contains_key(&path.collection_path())
    }

    pub fn collections(&self) -> Vec<String> {
        let mut collections: Vec<String> = self.callbacks.read().keys().cloned().collect();
        collections.sort();
        collections
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}

/// Callback dispatching each task to the projection registered for its collection.
///
/// Tasks for collections nobody projects are acknowledged, since redelivering them can never
/// succeed.
pub struct ProjectionRouter {
    registry: Arc<ProjectionRegistry>,
}

impl ProjectionRouter {
    pub fn new(registry: Arc<ProjectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ProjectionCallback for ProjectionRouter {
    async fn project(&self, path: &DocumentPath) -> std::result::Result<(), CallbackError> {
        match self.registry.lookup(path) {
            Some(callback) => {
                debug!(path = %path, collection = %path.collection_path(), "Routing projection task");
                callback.project(path).await
            }
            None => {
                warn!(
                    path = %path,
                    collection = %path.collection_path(),
                    "No projection registered for collection, dropping task"
                );
                Ok(())
            }
        }
    }
}
