//! Shared building blocks for the TED collections projection pipeline.
//!
//! - [`path`]: the hierarchical path codec (collection/document segments)
//! - [`logging`]: `tracing` subscriber setup shared by every binary

pub mod logging;
pub mod path;

pub use path::{build, collection_path, process, DocumentPath, PathError, SEPARATOR};
