use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Histogram ---

/// Concurrent count/sum histogram for execution latency.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Live Counters ---

/// Atomic counters shared by the queue, its admission pass and its workers.
///
/// Cloning only clones the `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
  /// Jobs accepted by `submit`, including predefined jobs.
  pub jobs_submitted: Arc<AtomicUsize>,
  /// Jobs that won their resource and were handed to an executor.
  pub jobs_admitted: Arc<AtomicUsize>,
  pub jobs_finished: Arc<AtomicUsize>,
  /// Actions that returned an error, panicked or timed out.
  pub jobs_failed: Arc<AtomicUsize>,
  pub jobs_panicked: Arc<AtomicUsize>,
  pub jobs_timed_out: Arc<AtomicUsize>,
  pub jobs_cancelled: Arc<AtomicUsize>,
  /// Times a pending job was found blocked on a busy resource.
  pub resource_waits: Arc<AtomicUsize>,
  /// Admission passes cut short because the pool had no free slot.
  pub dispatch_rejected: Arc<AtomicUsize>,
  /// Jobs executed on a worker that just finished another job.
  pub inline_executions: Arc<AtomicUsize>,

  /// Current number of executors running a job.
  pub workers_active_current: Arc<AtomicUsize>,

  pub job_execution_duration: Arc<SimpleHistogram>,
}

impl QueueMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;
    MetricsSnapshot {
      jobs_submitted: self.jobs_submitted.load(order),
      jobs_admitted: self.jobs_admitted.load(order),
      jobs_finished: self.jobs_finished.load(order),
      jobs_failed: self.jobs_failed.load(order),
      jobs_panicked: self.jobs_panicked.load(order),
      jobs_timed_out: self.jobs_timed_out.load(order),
      jobs_cancelled: self.jobs_cancelled.load(order),
      resource_waits: self.resource_waits.load(order),
      dispatch_rejected: self.dispatch_rejected.load(order),
      inline_executions: self.inline_executions.load(order),
      workers_active_current: self.workers_active_current.load(order),
      job_execution_duration_count: self.job_execution_duration.get_count(),
      job_execution_duration_sum_micros: self.job_execution_duration.get_sum_micros(),
    }
  }

  pub(crate) fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
  }
}

// --- Snapshot ---

/// Plain-data copy of the queue metrics at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
  pub jobs_submitted: usize,
  pub jobs_admitted: usize,
  pub jobs_finished: usize,
  pub jobs_failed: usize,
  pub jobs_panicked: usize,
  pub jobs_timed_out: usize,
  pub jobs_cancelled: usize,
  pub resource_waits: usize,
  pub dispatch_rejected: usize,
  pub inline_executions: usize,
  pub workers_active_current: usize,
  pub job_execution_duration_count: usize,
  pub job_execution_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean action duration in microseconds, `None` before the first execution.
  pub fn mean_execution_duration_micros(&self) -> Option<f64> {
    if self.job_execution_duration_count == 0 {
      None
    } else {
      Some(self.job_execution_duration_sum_micros as f64 / self.job_execution_duration_count as f64)
    }
  }

  pub fn mean_execution_duration(&self) -> Option<Duration> {
    self
      .mean_execution_duration_micros()
      .map(|micros| Duration::from_micros(micros as u64))
  }
}
