//! Durable task broker abstraction.
//!
//! A [`TaskBroker`] accepts serialized task paths and runs a consumer that applies a
//! [`ProjectionCallback`] to each one. Implementations share the per-delivery settlement rules
//! in [`crate::delivery`] and only differ in how messages are stored and transported.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::callback::ProjectionCallback;
use crate::{QueueError, Result};

#[cfg(feature = "amqp")]
pub mod amqp;
pub(crate) mod consumer;
pub mod memory;

pub use memory::InMemoryBroker;

/// Connection lifecycle of a broker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Disconnected,
    Connecting,
    /// Connection and channel are open
    Channeled,
    /// A consumer is registered and receiving deliveries
    Consuming,
}

#[async_trait]
pub trait TaskBroker: Send + Sync {
    fn queue_name(&self) -> &str;

    fn state(&self) -> BrokerState;

    /// Hand a task to the durable queue. The queue is declared on first use, so this is safe
    /// to call before any consumer runs.
    async fn push_task(&self, task: &str) -> Result<()>;

    /// Start consuming with at most `prefetch` unacknowledged deliveries in flight.
    ///
    /// Returns once the subscription is established; deliveries are processed in the
    /// background until the returned subscription is stopped or the delivery stream fails.
    async fn run_tasks(
        &self,
        callback: Arc<dyn ProjectionCallback>,
        prefetch: u16,
    ) -> Result<TaskSubscription>;
}

pub(crate) fn check_prefetch(prefetch: u16) -> Result<()> {
    if prefetch == 0 {
        return Err(QueueError::InvalidArgument(
            "prefetch must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

/// Handle to a running consumer.
///
/// Dropping the handle leaves the consumer running detached.
pub struct TaskSubscription {
    consumer_tag: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

impl TaskSubscription {
    pub(crate) fn new(
        consumer_tag: String,
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            consumer_tag,
            shutdown_tx,
            handle,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop consuming and wait for in-flight deliveries to settle.
    pub async fn stop(self) -> Result<()> {
        info!(consumer_tag = %self.consumer_tag, "Stopping task consumer");
        let _ = self.shutdown_tx.send(true);
        self.join().await
    }

    /// Wait for the consumer to end. Only returns early when the delivery stream fails.
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(QueueError::ConsumerClosed(format!("consumer task failed: {}", e))),
        }
    }
}

/// Resolves once a stop has been requested. Never resolves if the subscription was dropped.
pub(crate) async fn stop_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
