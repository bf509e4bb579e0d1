//! Event model: inbound envelopes, canonical events and the internal taxonomy.

pub mod envelope;
pub mod taxonomy;

pub use envelope::{CanonicalEvent, EventEnvelope, ParticipantDetails};
pub use taxonomy::{map_event_type, EventMapping, InternalEvent, InternalEventType, StatusChange};
