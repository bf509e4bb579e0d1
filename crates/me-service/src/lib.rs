//! Meeting Events (ME) Service Library
//!
//! Real-time processing engine for video-conferencing meeting lifecycle
//! events:
//!
//! - Ingestion with time-windowed deduplication and a bounded queue that
//!   applies explicit backpressure
//! - A single consumer pipeline that persists raw events, maps provider
//!   vocabulary to an internal taxonomy and drives state transitions
//! - Authoritative in-memory meeting and participant state owned by one actor
//! - Best-effort broadcast of applied transitions to subscriber scopes
//! - Background state flush, analytics sampling and retention
//!
//! # Architecture
//!
//! ```text
//! Event Source ──► IngestionGateway ──► bounded queue ──► pipeline
//!                  (DedupRegistry)                          │
//!                                  ┌────────────────────────┤
//!                                  ▼                        ▼
//!                           StateReconciler         BroadcastDispatcher
//!                           (actor, owns state)     (SubscriberChannel)
//!                                  │
//!          synchronizer / analytics / retention ──► DurableStore
//! ```
//!
//! # Modules
//!
//! - [`engine`] - Wiring, operational surface and graceful shutdown
//! - [`ingest`] - Dedup registry, bounded queue and gateway
//! - [`pipeline`] - Queue consumer and processing statistics
//! - [`state`] - Meeting/participant model and the reconciler actor
//! - [`broadcast`] - Subscriber scopes, channel contract and dispatcher
//! - [`store`] - Durable store contract with in-memory and Redis backends
//! - [`tasks`] - Synchronizer, analytics collector and retention cleaner
//! - [`http`] - Internal HTTP surface

pub mod broadcast;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod http;
pub mod ingest;
pub mod observability;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod tasks;
