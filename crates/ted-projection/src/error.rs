use thiserror::Error;

use ted_common::PathError;
use ted_queue::{CallbackError, QueueError};

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Invalid collection path '{0}'")]
    InvalidCollection(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook {url} answered {status} for {path}")]
    UnexpectedStatus { url: String, status: u16, path: String },
}

impl From<ProjectionError> for CallbackError {
    fn from(e: ProjectionError) -> Self {
        CallbackError::new(e.to_string())
    }
}
