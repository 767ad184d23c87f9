//! lectern-net — HTTP collaborators of the venue client.
//!
//! All three clients use blocking `reqwest` with per-client timeouts; they
//! run on the decision loop's dedicated OS thread, never on the async
//! runtime. The traits seam the engine away from the network for tests.

pub mod liveness;
pub mod recognition;
pub mod reporter;

pub use liveness::{HttpLivenessGate, LivenessError, LivenessGate};
pub use recognition::{HttpRecognizer, RecognitionError, RecognitionOptions, Recognizer};
pub use reporter::{AttendanceReporter, ReportSink, ReporterError};
