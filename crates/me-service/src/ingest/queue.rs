//! Bounded ingestion queue with depth monitoring.
//!
//! Thin wrapper over a tokio `mpsc` channel. The producer side never waits:
//! a full queue is reported to the caller as backpressure.

use crate::events::CanonicalEvent;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

/// Percentage of capacity above which depth is logged as critical.
const QUEUE_WARNING_PERCENT: usize = 80;

/// Queue depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueLevel {
    Normal,
    Warning,
    Critical,
}

/// Point-in-time view of the queue for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub depth: usize,
    pub peak_depth: usize,
    pub capacity: usize,
    pub level: QueueLevel,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
}

/// Depth tracking shared by both ends of the queue.
#[derive(Debug)]
pub struct QueueMonitor {
    capacity: usize,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

impl QueueMonitor {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    /// Claim a slot. `None` when every slot is already claimed.
    fn reserve(&self) -> Option<usize> {
        let mut current = self.depth.load(Ordering::SeqCst);
        loop {
            if current >= self.capacity {
                return None;
            }
            match self.depth.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    fn raise_peak(&self, depth: usize) {
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
    }

    fn release(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn record_enqueue(&self, new_depth: usize) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.raise_peak(new_depth);
        match self.level_for_depth(new_depth) {
            QueueLevel::Critical => warn!(
                target: "me.ingest",
                depth = new_depth,
                capacity = self.capacity,
                "Ingestion queue depth critical"
            ),
            QueueLevel::Warning if new_depth == self.capacity / 2 + 1 => debug!(
                target: "me.ingest",
                depth = new_depth,
                "Ingestion queue depth elevated"
            ),
            _ => {}
        }
    }

    fn record_dequeue(&self) {
        self.release();
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> QueueLevel {
        self.level_for_depth(self.current_depth())
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let depth = self.current_depth();
        QueueSnapshot {
            depth,
            peak_depth: self.peak_depth(),
            capacity: self.capacity,
            level: self.level_for_depth(depth),
            total_enqueued: self.total_enqueued(),
            total_dequeued: self.total_dequeued(),
        }
    }

    fn level_for_depth(&self, depth: usize) -> QueueLevel {
        let warning = self.capacity.saturating_mul(QUEUE_WARNING_PERCENT) / 100;
        if depth > warning {
            QueueLevel::Critical
        } else if depth > self.capacity / 2 {
            QueueLevel::Warning
        } else {
            QueueLevel::Normal
        }
    }
}

/// Why an event could not be enqueued. Carries the event back.
#[derive(Debug)]
pub enum EnqueueError {
    Full(Box<CanonicalEvent>),
    Closed(Box<CanonicalEvent>),
}

/// Producer half, owned by the gateway.
#[derive(Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<CanonicalEvent>,
    monitor: Arc<QueueMonitor>,
}

impl QueueSender {
    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// `EnqueueError::Full` when the queue is at capacity,
    /// `EnqueueError::Closed` when the consumer is gone.
    pub fn try_enqueue(&self, event: CanonicalEvent) -> Result<(), EnqueueError> {
        // Reserve before sending so the consumer can never observe an
        // event whose depth increment has not happened yet.
        let Some(new_depth) = self.monitor.reserve() else {
            return Err(EnqueueError::Full(Box::new(event)));
        };
        match self.tx.try_send(event) {
            Ok(()) => {
                self.monitor.record_enqueue(new_depth);
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.monitor.release();
                Err(EnqueueError::Full(Box::new(event)))
            }
            Err(TrySendError::Closed(event)) => {
                self.monitor.release();
                Err(EnqueueError::Closed(Box::new(event)))
            }
        }
    }
}

/// Result of a bounded wait on the queue.
#[derive(Debug)]
pub enum Dequeue {
    Event(Box<CanonicalEvent>),
    Timeout,
    /// Every sender is gone and the queue is empty.
    Closed,
}

/// Consumer half, owned by the processing pipeline.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<CanonicalEvent>,
    monitor: Arc<QueueMonitor>,
}

impl QueueReceiver {
    /// Wait up to `timeout` for the next event.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Dequeue {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => {
                self.monitor.record_dequeue();
                Dequeue::Event(Box::new(event))
            }
            Ok(None) => Dequeue::Closed,
            Err(_) => Dequeue::Timeout,
        }
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<CanonicalEvent> {
        match self.rx.try_recv() {
            Ok(event) => {
                self.monitor.record_dequeue();
                Some(event)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<QueueMonitor> {
        &self.monitor
    }
}

/// Create a bounded queue of `capacity` events.
#[must_use]
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let monitor = Arc::new(QueueMonitor::new(capacity));
    (
        QueueSender {
            tx,
            monitor: Arc::clone(&monitor),
        },
        QueueReceiver { rx, monitor },
    )
}
