//! Broadcast of applied internal events to subscriber scopes.

pub mod channel;
pub mod dispatcher;
pub mod message;

pub use channel::{LocalSubscriberHub, SubscriberChannel, Subscription};
pub use dispatcher::BroadcastDispatcher;
pub use message::{BroadcastMessage, BroadcastScope};
