//! # ME Test Utilities
//!
//! Shared test utilities for the Meeting Events (ME) service.
//!
//! ## Modules
//!
//! - `fixtures` - Envelope builders and participants for provider events
//! - `failing_store` - Durable store wrapper with switchable failures
//! - `recording_channel` - Subscriber channel that records every delivery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use me_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = Arc::new(FailingStore::new());
//!     let channel = Arc::new(RecordingChannel::new());
//!     let engine = EventEngine::start(&test_config(), store.clone(), channel.clone());
//!
//!     let host = TestParticipant::new("Alice").host();
//!     engine.accept(meeting_started("m-1", "Standup").id("E1").build()).await;
//!     engine.accept(participant_joined("m-1", &host).id("E2").build()).await;
//!
//!     wait_until_handled(&engine, 2).await;
//!     assert_eq!(channel.messages_for("meeting:m-1").len(), 2);
//! }
//! ```

pub mod failing_store;
pub mod fixtures;
pub mod recording_channel;

pub use failing_store::*;
pub use fixtures::*;
pub use recording_channel::*;
