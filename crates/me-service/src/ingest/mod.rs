//! Ingestion: dedup window, bounded queue and the gateway in front of them.

pub mod dedup;
pub mod gateway;
pub mod queue;

pub use dedup::DedupRegistry;
pub use gateway::{IngestOutcome, IngestSnapshot, IngestionGateway, RejectReason};
pub use queue::{Dequeue, QueueLevel, QueueMonitor, QueueReceiver, QueueSnapshot};
