pub mod dispatcher;
pub mod processor;

pub use dispatcher::{run_worker, WorkerSettings};
pub use processor::{BatchOutcome, BatchProcessor, LoggingProcessor};
