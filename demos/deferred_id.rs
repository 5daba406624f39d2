//! demos/deferred_id.rs
//!
//! A job is handed to the queue before its identifier is known, and only
//! becomes runnable once an external system (simulated here) supplies one.

use std::time::Duration as StdDuration;

use jobgate::{Job, JobQueue, JobStatus};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let filter = tracing_subscriber::EnvFilter::try_new("warn,jobgate=debug,deferred_id=trace")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let queue = JobQueue::builder().max_workers(2).build_and_start()?;

  let job = queue.submit(
    Job::builder()
      .defer_id()
      .description("import batch")
      .action(|job: Job| async move {
        #[cfg(feature = "job_context")]
        {
          let ctx = jobgate::job_context!();
          info!(job_id = ?ctx.job_id, "Running with context.");
        }
        info!(job_id = ?job.id(), "Importing.");
        Ok(())
      })
      .build(),
  )?;

  info!(status = %job.status(), visible = queue.get_all_jobs().len(), "Submitted.");

  // Pretend the identifier comes back from a remote registry.
  tokio::time::sleep(StdDuration::from_millis(200)).await;
  job.assign_id(9001)?;

  queue.stop_and_await(StdDuration::from_secs(5)).await;
  info!(status = %job.status(), snapshot = ?job.snapshot(), "Done.");
  assert_eq!(job.status(), JobStatus::Finished);
  Ok(())
}
