//! jobgate: An In-Process Job Queue with Resource Locks
//!
//! Runs submitted jobs on a bounded Tokio worker pool while guaranteeing that
//! jobs sharing a resource key never execute at the same time. Every job moves
//! through a fixed lifecycle and notifies ordered callback chains as it goes.
//!
//! # Features
//!
//! - Resource-keyed mutual exclusion: jobs with the same key run one at a time,
//!   jobs without a key are always runnable.
//! - Bounded execution: an elastic pool (a task per job, at most `max_workers`)
//!   or a fixed pool of long-lived workers behind a bounded dispatch queue.
//! - Lifecycle tracking through [`JobStatus`], with every transition reported
//!   to the job's status-change callbacks and its queue's storage.
//! - Success, error, finalize and status-change callback chains, plus a
//!   queue-wide error handler that always runs first.
//! - Single-start guarantee: a job's action runs at most once.
//! - Captured failures: errors, panics and timeouts are stored on the job as
//!   `anyhow::Error` and never escape the queue.
//! - Caller-chosen or deferred job identifiers.
//! - Pluggable storage ([`JobStorage`]) with an in-memory reference backend.
//! - Cancellation of running jobs, graceful and forced shutdown.
//! - Metrics snapshots ([`MetricsSnapshot`]).
//! - Optional task-local job context (`job_context` feature, on by default).
//! - Optional Serde support for snapshots and status types (`serde` feature).
//!
//! # Usage
//!
//! ```no_run
//! use jobgate::{Job, JobQueue, JobStatus};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = JobQueue::builder()
//!         .max_workers(4)
//!         .on_job_error(|job, err| eprintln!("job {:?} failed: {err:#}", job.id()))
//!         .build_and_start()?;
//!
//!     // Both jobs touch the same account, so they run one after the other.
//!     let debit = queue.submit(
//!         Job::builder()
//!             .resource_key("account-42")
//!             .description("debit")
//!             .action(|_job| async {
//!                 tokio::time::sleep(Duration::from_millis(100)).await;
//!                 Ok(())
//!             })
//!             .build(),
//!     )?;
//!     let credit = queue.submit(
//!         Job::builder()
//!             .resource_key("account-42")
//!             .description("credit")
//!             .action(|_job| async { Ok(()) })
//!             .on_success(|job| println!("credited by job {:?}", job.id()))
//!             .build(),
//!     )?;
//!     assert_eq!(credit.status(), JobStatus::WaitingForResource);
//!
//!     queue.stop_and_await(Duration::from_secs(5)).await;
//!     assert_eq!(debit.status(), JobStatus::Finished);
//!     Ok(())
//! }
//! ```
//!
//! # Job Lifecycle
//!
//! ```text
//! Created -> [WaitingForId] -> Initialized <-> WaitingForResource
//!         -> RunningAction -> RunningCallback -> Finished
//!                          -> Failed
//! any non-terminal state  -> Canceled
//! ```
//!
//! A job is admitted by an *admission pass*, which runs after every
//! submission, identifier assignment, cancellation and job completion.
//!
//! # Observability
//!
//! - [`JobQueue::metrics_snapshot`] returns a [`MetricsSnapshot`].
//! - Status transitions are logged through `tracing` at `debug` (or `info` in
//!   debug mode), and each execution runs inside a `job_exec` span.

// This empty module attaches the documentation block below only when
// the `job_context` feature is enabled during doc generation.
#[cfg(all(doc, feature = "job_context"))]
pub mod job_context_docs {
    //! # Accessing Job Context (`job_context` feature)
    //!
    //! Code running inside a job's action can look up the executing job
    //! without threading the [`Job`](crate::Job) handle through every call:
    //!
    //! 1.  **`try_get_current_job_context() -> Option<JobContext>`** returns
    //!     `None` outside an action.
    //! 2.  **`job_context!() -> JobContext`** panics outside an action.
    //!
    //! ```no_run
    //! # #[cfg(feature = "job_context")] {
    //! use jobgate::{try_get_current_job_context, job_context, Job};
    //!
    //! async fn audit() {
    //!     if let Some(ctx) = try_get_current_job_context() {
    //!         println!("running for job {:?} on {:?}", ctx.job_id, ctx.resource_key);
    //!     }
    //! }
    //!
    //! let job = Job::builder()
    //!     .resource_key("ledger")
    //!     .action(|_job| async {
    //!         audit().await;
    //!         let ctx = job_context!();
    //!         assert_eq!(ctx.resource_key.as_deref(), Some("ledger"));
    //!         Ok(())
    //!     })
    //!     .build();
    //! # }
    //! ```
}

pub mod command;
pub mod config;
mod coordinator;
pub mod error;
mod execution;
pub mod job;
mod macros;
pub mod metrics;
pub mod scheduler;
pub mod storage;
mod worker;

// --- Public Re-exports ---

pub use command::ShutdownMode;
pub use scheduler::{JobQueue, QueueBuilder};

pub use error::{
  ActionPanicked, ActionTimedOut, BuildError, ConfigError, JobStateError, SubmitError,
};

pub use job::{
  ActionFuture, ActionResult, BoxedAction, Job, JobBuilder, JobCategory, JobId, JobIdentity,
  JobOptions, JobSnapshot, JobStatus,
};
#[cfg(feature = "job_context")]
pub use job::context::{try_get_current_job_context, JobContext};

pub use metrics::{MetricsSnapshot, QueueMetrics};

pub use storage::{InMemoryStorage, JobStorage, StorageBackend, StorageKind};
