//! tests/common.rs
//! Shared helper functions for integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use jobgate::{ActionFuture, BoxedAction, BuildError, Job, JobQueue};
use tracing_subscriber::fmt::TestWriter;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds and starts a queue with the given pool shape.
pub fn build_queue(max_workers: usize, elastic: bool) -> Result<JobQueue, BuildError> {
  JobQueue::builder()
    .max_workers(max_workers)
    .elastic_pool(elastic)
    .debug(true)
    .build_and_start()
}

// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: StdDuration, condition: F) -> bool
where
  F: Fn() -> bool,
{
  let deadline = Instant::now() + timeout;
  loop {
    if condition() {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(StdDuration::from_millis(10)).await;
  }
}

// Waits for the job to reach a terminal status and for its finalize chain to start.
pub async fn wait_finished(job: &Job, timeout: StdDuration) -> bool {
  wait_until(timeout, || job.status().is_terminal() && job.is_finished()).await
}

// Action that increments a counter, optionally delays, then succeeds or fails.
pub fn action_counter(counter: Arc<AtomicUsize>, delay: StdDuration, succeeds: bool) -> BoxedAction {
  Arc::new(move |_job: Job| {
    let ctr = counter.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(count, succeeds, "Counter job executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      if succeeds {
        Ok(())
      } else {
        Err(anyhow::anyhow!("counter job failed on purpose"))
      }
    }) as ActionFuture
  })
}

// Action that sets a flag after an optional delay.
pub fn action_flag(flag: Arc<AtomicBool>, delay: StdDuration) -> BoxedAction {
  Arc::new(move |_job: Job| {
    let flg = flag.clone();
    Box::pin(async move {
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      flg.store(true, Ordering::SeqCst);
      tracing::debug!("Flag job set flag to true");
      Ok::<(), anyhow::Error>(())
    }) as ActionFuture
  })
}

// Action that panics.
pub fn action_panic() -> BoxedAction {
  Arc::new(move |_job: Job| {
    Box::pin(async move {
      tokio::task::yield_now().await;
      panic!("Job forced panic!");
      #[allow(unreachable_code)]
      Ok::<(), anyhow::Error>(())
    }) as ActionFuture
  })
}

// Tracks how many copies of this action run at once.
pub fn action_concurrency_tracker(
  active_counter: Arc<AtomicUsize>,
  max_observed_active: Arc<AtomicUsize>,
  delay: StdDuration,
) -> BoxedAction {
  Arc::new(move |_job: Job| {
    let active = active_counter.clone();
    let max_obs = max_observed_active.clone();
    Box::pin(async move {
      let current_active = active.fetch_add(1, Ordering::SeqCst) + 1;
      max_obs.fetch_max(current_active, Ordering::SeqCst);
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      active.fetch_sub(1, Ordering::SeqCst);
      Ok::<(), anyhow::Error>(())
    }) as ActionFuture
  })
}

// Status listener that, once its job enters RunningCallback, holds the
// notification for a while and then submits a follow-up job to `queue`.
pub fn submit_follow_up_on_callback(
  queue: JobQueue,
  follow_up: Arc<parking_lot::Mutex<Option<Job>>>,
) -> impl Fn(&Job) + Send + Sync + 'static {
  move |job: &Job| {
    if job.status() == jobgate::JobStatus::RunningCallback {
      std::thread::sleep(StdDuration::from_millis(200));
      let next = queue
        .submit(Job::builder().description("follow-up").build())
        .expect("Follow-up submit failed");
      *follow_up.lock() = Some(next);
    }
  }
}
