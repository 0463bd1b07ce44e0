//! Projection side of the TED collections pipeline.
//!
//! - [`ProjectionRegistry`] / [`ProjectionRouter`]: which callback projects which collection
//! - [`ProjectionPipeline`]: write-path hook staging tasks for registered collections
//! - [`StagingDrainer`]: moves staged tasks into the durable broker
//! - [`WebhookProjection`]: callback delegating projection to an HTTP endpoint

pub mod drainer;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod webhook;

pub use drainer::{DrainerConfig, StagingDrainer};
pub use error::ProjectionError;
pub use pipeline::ProjectionPipeline;
pub use registry::{ProjectionRegistry, ProjectionRouter};
pub use webhook::{WebhookConfig, WebhookProjection};

pub type Result<T> = std::result::Result<T, ProjectionError>;
