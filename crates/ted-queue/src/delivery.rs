//! Per-delivery handling shared by every broker implementation.
//!
//! A delivery is decoded, handed to the projection callback and settled:
//! `Delivered -> Acknowledged` on success, `Delivered -> Rejected` otherwise. Callback errors
//! and panics only ever affect the delivery being handled.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, info, info_span, warn, Instrument};

use ted_common::process;

use crate::callback::ProjectionCallback;

/// How a delivery must be settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acknowledged,
    /// `requeue = false` is reserved for payloads that can never succeed
    Rejected { requeue: bool },
}

/// Decode a task payload and run the callback on it.
pub async fn apply_projection(callback: &dyn ProjectionCallback, payload: &[u8]) -> DeliveryOutcome {
    let raw = match std::str::from_utf8(payload) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "Task payload is not UTF-8, dropping");
            return DeliveryOutcome::Rejected { requeue: false };
        }
    };

    let path = match process(raw) {
        Ok(path) => path,
        Err(e) => {
            warn!(task = %raw, error = %e, "Task payload is not a valid path, dropping");
            return DeliveryOutcome::Rejected { requeue: false };
        }
    };

    let span = info_span!("projection_task", path = %raw);
    async move {
        info!("New task");
        match AssertUnwindSafe(callback.project(&path)).catch_unwind().await {
            Ok(Ok(())) => {
                info!("End of task");
                DeliveryOutcome::Acknowledged
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Projection failed, rejecting task");
                DeliveryOutcome::Rejected { requeue: true }
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "Projection panicked, rejecting task");
                DeliveryOutcome::Rejected { requeue: true }
            }
        }
    }
    .instrument(span)
    .await
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
