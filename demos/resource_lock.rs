//! demos/resource_lock.rs
//!
//! Two transfers touch the same account and run one after the other, while an
//! unrelated report runs alongside them.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use jobgate::{job_action, Job, JobQueue, JobStatus};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,jobgate=info,resource_lock=trace")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  // --- Build Queue ---
  let queue = JobQueue::builder()
    .max_workers(4)
    .on_job_error(|job, err| error!(job_id = ?job.id(), "Job failed: {err:#}"))
    .build_and_start()?;

  // --- Shared State ---
  let balance = Arc::new(AtomicI64::new(100));

  let debit_balance = balance.clone();
  let debit = job_action! {
    { let balance = debit_balance.clone(); }
    |job| {
      tokio::time::sleep(StdDuration::from_millis(300)).await;
      let now = balance.fetch_sub(30, Ordering::SeqCst) - 30;
      info!(job_id = ?job.id(), balance = now, "Debited 30.");
      Ok(())
    }
  };
  let credit_balance = balance.clone();
  let credit = job_action! {
    { let balance = credit_balance.clone(); }
    |job| {
      let now = balance.fetch_add(50, Ordering::SeqCst) + 50;
      info!(job_id = ?job.id(), balance = now, "Credited 50.");
      Ok(())
    }
  };

  let first = queue.submit(
    Job::builder()
      .resource_key("account-42")
      .description("debit")
      .boxed_action(debit)
      .build(),
  )?;
  let second = queue.submit(
    Job::builder()
      .resource_key("account-42")
      .description("credit")
      .boxed_action(credit)
      .on_success(|job| info!(job_id = ?job.id(), "Credit confirmed."))
      .build(),
  )?;
  let report = queue.submit(
    Job::builder()
      .description("report")
      .action(|_job: Job| async {
        info!("Report generated while the account is locked.");
        Ok(())
      })
      .build(),
  )?;

  info!(
    first = %first.status(),
    second = %second.status(),
    "Submitted both transfers."
  );

  // --- Shutdown ---
  if !queue.stop_and_await(StdDuration::from_secs(5)).await {
    error!("Queue did not drain in time.");
    queue.stop_now();
  }

  for job in [&first, &second, &report] {
    info!(description = ?job.description(), status = %job.status(), "Final state.");
    assert_eq!(job.status(), JobStatus::Finished);
  }
  info!(balance = balance.load(Ordering::SeqCst), metrics = ?queue.metrics_snapshot(), "Done.");
  Ok(())
}
