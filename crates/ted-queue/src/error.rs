use thiserror::Error;

use ted_common::PathError;

#[derive(Error, Debug)]
pub enum QueueError {
    /// Malformed separator structure or a length-invariant violation
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Queue already exists: {0}")]
    QueueExists(String),

    #[error("Queue provisioning failed: {0}")]
    Provisioning(String),

    #[error("Transient queue error: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Lease not found: {0}")]
    NotFound(String),

    #[error("Broker connection error: {0}")]
    BrokerConnection(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Consumer closed: {0}")]
    ConsumerClosed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl QueueError {
    /// The broker link itself is gone; retrying on the same connection cannot succeed.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            QueueError::BrokerConnection(_) | QueueError::ConsumerClosed(_)
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Database(e.to_string())
    }
}

#[cfg(feature = "amqp")]
impl From<lapin::Error> for QueueError {
    fn from(e: lapin::Error) -> Self {
        QueueError::Broker(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_faults() {
        assert!(QueueError::BrokerConnection("refused".into()).is_connection_fault());
        assert!(QueueError::ConsumerClosed("cancelled".into()).is_connection_fault());
        assert!(!QueueError::Broker("nack".into()).is_connection_fault());
        assert!(!QueueError::Transient("busy".into()).is_connection_fault());
    }
}
