use crate::job::{Job, OnErrorFn};

use std::fmt;
use std::sync::Arc;

/// Enables debug mode (`1`, `true`, `yes` or `on`).
pub const ENV_DEBUG: &str = "JOBGATE_DEBUG";
/// Names the storage backend, see [`StorageKind`](crate::storage::StorageKind).
pub const ENV_STORAGE_MODE: &str = "JOBGATE_STORAGE_MODE";

pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Resolved queue settings, as consumed by the running queue.
#[derive(Clone)]
pub(crate) struct QueueConfig {
  pub max_workers: usize,
  pub elastic_pool: bool,
  pub queue_capacity: usize,
  pub single_execution: bool,
  pub debug: bool,
  pub on_job_error: Option<Arc<OnErrorFn>>,
}

impl fmt::Debug for QueueConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueConfig")
      .field("max_workers", &self.max_workers)
      .field("elastic_pool", &self.elastic_pool)
      .field("queue_capacity", &self.queue_capacity)
      .field("single_execution", &self.single_execution)
      .field("debug", &self.debug)
      .field("on_job_error", &self.on_job_error.is_some())
      .finish()
  }
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_workers: DEFAULT_MAX_WORKERS,
      elastic_pool: true,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      single_execution: false,
      debug: false,
      on_job_error: None,
    }
  }
}

/// Logs a status transition; debug mode raises it to `info`.
pub(crate) fn log_status_change(debug: bool, job: &Job) {
  let status = job.status();
  if debug {
    tracing::info!(job_id = ?job.id(), resource_key = ?job.resource_key(), %status, "Job status changed.");
  } else {
    tracing::debug!(job_id = ?job.id(), resource_key = ?job.resource_key(), %status, "Job status changed.");
  }
}

pub(crate) fn env_lookup(key: &str) -> Option<String> {
  std::env::var(key).ok()
}

pub(crate) fn parse_flag(value: &str) -> bool {
  matches!(
    value.trim().to_ascii_lowercase().as_str(),
    "1" | "true" | "yes" | "on"
  )
}

/// Reads [`ENV_DEBUG`]. Unset means `false`.
pub fn debug_from_env() -> bool {
  env_lookup(ENV_DEBUG).map(|v| parse_flag(&v)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flags_accept_common_truthy_values() {
    for v in ["1", "true", "TRUE", " yes ", "on"] {
      assert!(parse_flag(v), "{v}");
    }
    for v in ["0", "false", "", "nope"] {
      assert!(!parse_flag(v), "{v}");
    }
  }
}
