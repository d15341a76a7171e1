//! Local endpoint notification queue.
//!
//! Bounded FIFO between registry callers and the gossip sender task.
//! Producers block while the queue is full. Until gossip is running,
//! events are dropped instead of queued.

use crate::domain::entities::NotifyEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct NotifyQueue {
    tx: mpsc::Sender<NotifyEvent>,
    active: Arc<AtomicBool>,
}

impl NotifyQueue {
    /// Create a queue holding at most `capacity` events, and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotifyEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                active: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Enqueue `event`, waiting for room. Returns false if the event was dropped.
    pub async fn push(&self, event: NotifyEvent) -> bool {
        if !self.is_active() {
            tracing::trace!(
                "gossip inactive, dropping {} for endpoint {}",
                event.action.as_str(),
                event.endpoint.id
            );
            return false;
        }
        self.tx.send(event).await.is_ok()
    }
}
