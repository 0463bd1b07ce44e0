//! In-process task broker.
//!
//! Follows the same contract as the AMQP broker: prefetch-bounded competing consumers,
//! acknowledgement removes a task, rejection with requeue puts it back at the tail. Tasks live
//! only as long as the process, so this is meant for embedded setups and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, info, warn};

use super::{check_prefetch, stop_requested, BrokerState, TaskBroker, TaskSubscription};
use crate::callback::ProjectionCallback;
use crate::delivery::{apply_projection, DeliveryOutcome};
use crate::{QueueError, Result};

#[derive(Debug, Clone)]
struct QueuedTask {
    payload: Vec<u8>,
    deliveries: u32,
}

struct Inner {
    queue_name: String,
    /// Rejected tasks are dead-lettered instead of requeued after this many deliveries
    delivery_limit: Option<u32>,
    tasks: Mutex<VecDeque<QueuedTask>>,
    dead_letters: Mutex<Vec<Vec<u8>>>,
    available: Notify,
    state: Mutex<BrokerState>,
    consumers: AtomicU64,
    acknowledged: AtomicU64,
    rejected: AtomicU64,
}

impl Inner {
    fn ensure_channeled(&self) {
        let mut state = self.state.lock();
        if *state == BrokerState::Disconnected {
            *state = BrokerState::Channeled;
        }
    }

    fn enqueue(&self, task: QueuedTask) {
        self.tasks.lock().push_back(task);
        self.available.notify_one();
    }

    async fn next_task(&self) -> QueuedTask {
        loop {
            if let Some(task) = self.tasks.lock().pop_front() {
                return task;
            }
            self.available.notified().await;
        }
    }

    fn settle(&self, task: QueuedTask, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Acknowledged => {
                self.acknowledged.fetch_add(1, Ordering::SeqCst);
            }
            DeliveryOutcome::Rejected { requeue } => {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                let exhausted = self
                    .delivery_limit
                    .is_some_and(|limit| task.deliveries >= limit);

                if requeue && !exhausted {
                    debug!(queue = %self.queue_name, deliveries = task.deliveries, "Task requeued");
                    self.enqueue(task);
                } else {
                    warn!(queue = %self.queue_name, deliveries = task.deliveries, "Task dead-lettered");
                    self.dead_letters.lock().push(task.payload);
                }
            }
        }
    }
}

/// In-memory [`TaskBroker`].
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self::build(queue_name.into(), None)
    }

    /// Dead-letter a task once it has been rejected `limit` times.
    pub fn with_delivery_limit(queue_name: impl Into<String>, limit: u32) -> Self {
        Self::build(queue_name.into(), Some(limit))
    }

    fn build(queue_name: String, delivery_limit: Option<u32>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue_name,
                delivery_limit,
                tasks: Mutex::new(VecDeque::new()),
                dead_letters: Mutex::new(Vec::new()),
                available: Notify::new(),
                state: Mutex::new(BrokerState::Disconnected),
                consumers: AtomicU64::new(0),
                acknowledged: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Tasks waiting for a consumer
    pub fn pending(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn acknowledged(&self) -> u64 {
        self.inner.acknowledged.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> u64 {
        self.inner.rejected.load(Ordering::SeqCst)
    }

    /// Payloads dropped by rejection without requeue or after the delivery limit
    pub fn dead_letters(&self) -> Vec<String> {
        self.inner
            .dead_letters
            .lock()
            .iter()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    /// Raw enqueue, bypassing path serialization
    pub fn push_raw(&self, payload: Vec<u8>) {
        self.inner.ensure_channeled();
        self.inner.enqueue(QueuedTask { payload, deliveries: 0 });
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    fn queue_name(&self) -> &str {
        &self.inner.queue_name
    }

    fn state(&self) -> BrokerState {
        *self.inner.state.lock()
    }

    async fn push_task(&self, task: &str) -> Result<()> {
        self.push_raw(task.as_bytes().to_vec());
        debug!(queue = %self.inner.queue_name, task = %task, "Task pushed");
        Ok(())
    }

    async fn run_tasks(
        &self,
        callback: Arc<dyn ProjectionCallback>,
        prefetch: u16,
    ) -> Result<TaskSubscription> {
        check_prefetch(prefetch)?;
        self.inner.ensure_channeled();

        let consumer_number = self.inner.consumers.fetch_add(1, Ordering::SeqCst) + 1;
        let consumer_tag = format!("{}-consumer-{}", self.inner.queue_name, consumer_number);
        *self.inner.state.lock() = BrokerState::Consuming;

        info!(
            queue = %self.inner.queue_name,
            consumer_tag = %consumer_tag,
            prefetch = prefetch,
            "In-memory consumer started, waiting for tasks"
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let slots = Arc::new(Semaphore::new(prefetch as usize));

        let handle = tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = stop_requested(&mut shutdown_rx) => break,
                    permit = slots.clone().acquire_owned() => permit
                        .map_err(|e| QueueError::ConsumerClosed(e.to_string()))?,
                };

                let mut task = tokio::select! {
                    _ = stop_requested(&mut shutdown_rx) => break,
                    task = inner.next_task() => task,
                };
                task.deliveries += 1;

                let inner = inner.clone();
                let callback = callback.clone();
                tokio::spawn(async move {
                    let outcome = apply_projection(callback.as_ref(), &task.payload).await;
                    inner.settle(task, outcome);
                    drop(permit);
                });
            }

            // Every slot back means every in-flight delivery has been settled
            let _ = slots.acquire_many(prefetch as u32).await;
            let remaining = inner.consumers.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining == 0 {
                *inner.state.lock() = BrokerState::Channeled;
            }
            Ok::<(), QueueError>(())
        });

        Ok(TaskSubscription::new(consumer_tag, shutdown_tx, handle))
    }
}
