//! Live meeting state and the reconciler actor that owns it.

pub mod messages;
pub mod model;
pub mod reconciler;

pub use messages::{IgnoreReason, TransitionContext, TransitionOutcome};
pub use model::{
    ConnectionStatus, MeetingState, MeetingStatus, ParticipantSnapshot, RecordingStatus,
};
pub use reconciler::{ReconcilerHandle, StateReconciler, TrackedCounts, TrackedCountsSnapshot};
