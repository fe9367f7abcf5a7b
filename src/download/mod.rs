//! Job queue, progress reporting and the download worker

pub mod progress;
pub mod queue;
pub mod reporter;
pub mod selection;
pub mod session;
pub mod source;
pub mod worker;

// Re-exports for convenience
pub use queue::{Job, JobQueue};
pub use selection::{PendingSelection, SelectionStore};
pub use worker::{JobOutcome, JobState, Worker, WorkerConfig, WorkerHandle};
