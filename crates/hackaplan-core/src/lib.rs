pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod snapshot;
pub mod traits;
pub mod urls;
pub mod util;
pub mod worker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{AppError, ErrorCode};
pub use events::{EventPayload, ProgressEvent, Stage};
pub use job::{JobError, JobOutcome, JobStatus, LookupJob};
pub use models::{LookupResult, WinnerProject, compute_hash};
pub use traits::{AdmissionLedger, Extractor, Fetcher, LookupStore, ProgressSink};
