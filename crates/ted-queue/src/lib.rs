//! Two-tier projection task queueing.
//!
//! Writes are first buffered in a lease-based [`staging`] queue close to the write path, then
//! handed to a durable [`broker`] whose consumer applies a [`ProjectionCallback`] to every task
//! with at-least-once delivery. The two stages only share the serialized path string.

pub mod broker;
pub mod callback;
pub mod delivery;
pub mod error;
pub mod staging;

pub use broker::{BrokerState, InMemoryBroker, TaskBroker, TaskSubscription};
#[cfg(feature = "amqp")]
pub use broker::amqp::{AmqpBroker, AmqpBrokerConfig};
pub use callback::{projection_fn, CallbackError, FnProjection, ProjectionCallback};
pub use delivery::{apply_projection, DeliveryOutcome};
pub use error::QueueError;
pub use staging::{StagedTask, StagingBackend, StagingMetrics, StagingQueue, DEFAULT_LEASE};
#[cfg(feature = "redis")]
pub use staging::redis::{RedisStagingBackend, RedisStagingConfig};
#[cfg(feature = "sqlite")]
pub use staging::sqlite::SqliteStagingBackend;

pub type Result<T> = std::result::Result<T, QueueError>;
