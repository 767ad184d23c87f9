//! lectern-core — Presence-tracking engine for the venue attendance client.
//!
//! Pure decision logic: detection and match types, the liveness voting
//! window, and the per-subject entry/resume/exit state machine. No I/O
//! happens here; the daemon feeds recognition results in and delivers the
//! resulting reports.

pub mod presence;
pub mod types;

pub use presence::{EngineConfig, PresenceState, PresenceTracker, Report, VotingWindow};
pub use types::{BoundingBox, Detection, SubjectMatch, Verdict};
