//! Consumer loop shared by stream-based brokers.
//!
//! Drives a delivery stream with at most `prefetch` projections in flight and settles every
//! delivery through [`InboundDelivery`]. The loop only ends on a stop request (`Ok`) or when the
//! stream fails or ends on its own (`Err(ConsumerClosed)`); a stream never ends while the
//! subscription is healthy.

#![cfg_attr(not(feature = "amqp"), allow(dead_code))]

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{stop_requested, BrokerState};
use crate::callback::ProjectionCallback;
use crate::delivery::{apply_projection, DeliveryOutcome};
use crate::{QueueError, Result};

/// A delivery as seen by the consumer loop: a payload plus the means to settle it.
#[async_trait]
pub(crate) trait InboundDelivery: Send + Sync {
    fn delivery_tag(&self) -> u64;

    fn payload(&self) -> &[u8];

    async fn ack(&self) -> Result<()>;

    async fn reject(&self, requeue: bool) -> Result<()>;
}

/// Run the consumer until stopped or until the stream breaks.
///
/// On stop, `cancel` is awaited and the remaining in-flight deliveries are settled before
/// returning. `state` ends as `Channeled` after a clean stop and `Disconnected` after a failure.
pub(crate) async fn consume<S, D, E, C, F>(
    deliveries: S,
    callback: Arc<dyn ProjectionCallback>,
    prefetch: u16,
    consumer_tag: &str,
    mut shutdown_rx: watch::Receiver<bool>,
    cancel: C,
    state: Arc<Mutex<BrokerState>>,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<D, E>>,
    D: InboundDelivery,
    E: fmt::Display,
    C: FnOnce() -> F,
    F: Future<Output = ()>,
{
    let processing = deliveries
        .map(|delivery| delivery.map_err(|e| QueueError::ConsumerClosed(e.to_string())))
        .try_for_each_concurrent(prefetch as usize, |delivery| {
            let callback = callback.clone();
            async move {
                settle(&delivery, callback.as_ref()).await;
                Ok(())
            }
        });
    tokio::pin!(processing);

    let result = tokio::select! {
        result = &mut processing => {
            let reason = match result {
                Ok(()) => "delivery stream ended".to_string(),
                Err(QueueError::ConsumerClosed(reason)) => reason,
                Err(e) => e.to_string(),
            };
            error!(consumer_tag = %consumer_tag, reason = %reason, "Unable to consume tasks");
            Err(QueueError::ConsumerClosed(reason))
        }
        _ = stop_requested(&mut shutdown_rx) => {
            cancel().await;
            // Cancelling ends the stream once in-flight deliveries are settled
            if let Err(e) = processing.await {
                warn!(consumer_tag = %consumer_tag, error = %e, "Consumer ended with error during shutdown");
            }
            info!(consumer_tag = %consumer_tag, "Consumer stopped");
            Ok(())
        }
    };

    *state.lock() = if result.is_ok() {
        BrokerState::Channeled
    } else {
        BrokerState::Disconnected
    };
    result
}

async fn settle<D: InboundDelivery>(delivery: &D, callback: &dyn ProjectionCallback) {
    let delivery_tag = delivery.delivery_tag();
    let outcome = apply_projection(callback, delivery.payload()).await;

    let settled = match outcome {
        DeliveryOutcome::Acknowledged => delivery.ack().await,
        DeliveryOutcome::Rejected { requeue } => delivery.reject(requeue).await,
    };

    match settled {
        Ok(()) => debug!(delivery_tag = delivery_tag, outcome = ?outcome, "Delivery settled"),
        Err(e) => error!(
            delivery_tag = delivery_tag,
            outcome = ?outcome,
            error = %e,
            "Failed to settle delivery, broker will redeliver it"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{projection_fn, CallbackError};
    use futures::channel::mpsc;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    type Settlements = Arc<Mutex<Vec<(u64, DeliveryOutcome)>>>;

    struct TestDelivery {
        tag: u64,
        payload: Vec<u8>,
        settlements: Settlements,
    }

    #[async_trait]
    impl InboundDelivery for TestDelivery {
        fn delivery_tag(&self) -> u64 {
            self.tag
        }

        fn payload(&self) -> &[u8] {
            &self.payload
        }

        async fn ack(&self) -> Result<()> {
            self.settlements.lock().push((self.tag, DeliveryOutcome::Acknowledged));
            Ok(())
        }

        async fn reject(&self, requeue: bool) -> Result<()> {
            self.settlements
                .lock()
                .push((self.tag, DeliveryOutcome::Rejected { requeue }));
            Ok(())
        }
    }

    fn deliveries(paths: &[&str], settlements: &Settlements) -> Vec<TestDelivery> {
        paths
            .iter()
            .enumerate()
            .map(|(i, path)| TestDelivery {
                tag: i as u64 + 1,
                payload: path.as_bytes().to_vec(),
                settlements: settlements.clone(),
            })
            .collect()
    }

    fn succeed() -> Arc<dyn ProjectionCallback> {
        Arc::new(projection_fn(|_| async { Ok::<(), CallbackError>(()) }))
    }

    fn consuming() -> Arc<Mutex<BrokerState>> {
        Arc::new(Mutex::new(BrokerState::Consuming))
    }

    #[tokio::test]
    async fn test_stream_end_closes_consumer() {
        let settlements = Settlements::default();
        let items: Vec<std::result::Result<TestDelivery, String>> =
            deliveries(&["users", "users/42/posts"], &settlements)
                .into_iter()
                .map(Ok)
                .collect();
        let state = consuming();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = consume(
            stream::iter(items),
            succeed(),
            1,
            "test",
            shutdown_rx,
            || async {},
            state.clone(),
        )
        .await;

        assert!(matches!(result, Err(QueueError::ConsumerClosed(_))));
        assert_eq!(*state.lock(), BrokerState::Disconnected);
        assert_eq!(
            *settlements.lock(),
            vec![
                (1, DeliveryOutcome::Acknowledged),
                (2, DeliveryOutcome::Acknowledged)
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_error_closes_consumer() {
        let settlements = Settlements::default();
        let mut items: Vec<std::result::Result<TestDelivery, String>> =
            deliveries(&["users"], &settlements).into_iter().map(Ok).collect();
        items.push(Err("channel closed by server".to_string()));
        let state = consuming();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = consume(
            stream::iter(items),
            succeed(),
            1,
            "test",
            shutdown_rx,
            || async {},
            state.clone(),
        )
        .await;

        match result {
            Err(QueueError::ConsumerClosed(reason)) => {
                assert!(reason.contains("channel closed by server"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(*state.lock(), BrokerState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_projection_rejects_with_requeue() {
        let settlements = Settlements::default();
        let items: Vec<std::result::Result<TestDelivery, String>> =
            deliveries(&["users", "users//posts"], &settlements)
                .into_iter()
                .map(Ok)
                .collect();
        let callback: Arc<dyn ProjectionCallback> = Arc::new(projection_fn(|_| async {
            Err(CallbackError::new("store unavailable"))
        }));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let _ = consume(
            stream::iter(items),
            callback,
            1,
            "test",
            shutdown_rx,
            || async {},
            consuming(),
        )
        .await;

        assert_eq!(
            *settlements.lock(),
            vec![
                (1, DeliveryOutcome::Rejected { requeue: true }),
                (2, DeliveryOutcome::Rejected { requeue: false })
            ]
        );
    }

    #[tokio::test]
    async fn test_prefetch_bounds_concurrency() {
        let settlements = Settlements::default();
        let paths: Vec<String> = (0..8).map(|i| format!("users/{}/posts", i)).collect();
        let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
        let items: Vec<std::result::Result<TestDelivery, String>> =
            deliveries(&paths, &settlements).into_iter().map(Ok).collect();

        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let (a, m) = (active.clone(), max_active.clone());
        let callback: Arc<dyn ProjectionCallback> = Arc::new(projection_fn(move |_| {
            let (active, max_active) = (a.clone(), m.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), CallbackError>(())
            }
        }));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let _ = consume(
            stream::iter(items),
            callback,
            3,
            "test",
            shutdown_rx,
            || async {},
            consuming(),
        )
        .await;

        let max = max_active.load(Ordering::SeqCst);
        assert!(max > 1, "expected overlapping projections, got {}", max);
        assert!(max <= 3, "prefetch exceeded: {}", max);
        assert_eq!(settlements.lock().len(), 8);
    }

    #[tokio::test]
    async fn test_stop_cancels_and_settles_in_flight() {
        let settlements = Settlements::default();
        let (tx, rx) = mpsc::unbounded::<std::result::Result<TestDelivery, String>>();
        for delivery in deliveries(&["users"], &settlements) {
            tx.unbounded_send(Ok(delivery)).unwrap();
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let cancel = move || {
            flag.store(true, Ordering::SeqCst);
            // Closing the sender ends the stream, as a broker-side cancel does
            drop(tx);
            async {}
        };

        let state = consuming();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = consume(rx, succeed(), 1, "test", shutdown_rx, cancel, state.clone());

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(consumer, stop);

        assert!(result.is_ok());
        assert!(cancelled.load(Ordering::SeqCst));
        assert_eq!(*state.lock(), BrokerState::Channeled);
        assert_eq!(*settlements.lock(), vec![(1, DeliveryOutcome::Acknowledged)]);
    }
}
