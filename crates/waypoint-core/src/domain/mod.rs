//! Domain model (IDs, envelope, task, outcome, URL source shapes).

pub mod envelope;
pub mod ids;
pub mod outcome;
pub mod task;
pub mod urls;

pub use envelope::{EnvelopeError, JobEnvelope, JobEnvelopeBuilder};
pub use ids::TaskId;
pub use outcome::{OutcomeKind, ScanOutcome};
pub use task::Task;
pub use urls::{DeepScanDocument, UrlParameter, UrlRecord};
