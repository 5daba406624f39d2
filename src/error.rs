use crate::job::JobId;

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while building a queue with `QueueBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Maximum worker count (`max_workers`) must be greater than zero")]
  ZeroMaxWorkers,
  #[error("Dispatch queue capacity must be greater than zero")]
  ZeroQueueCapacity,
  #[error("A Tokio runtime is required to build a job queue")]
  NoRuntime,
  #[error("A predefined job was rejected: {0}")]
  PredefinedJob(#[from] SubmitError),
  #[error("Storage configuration is invalid: {0}")]
  Config(#[from] ConfigError),
}

/// Violations of the job lifecycle contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobStateError {
  /// The execution wrapper was invoked on a job that already recorded a start time.
  #[error("Job already started at {started_at}")]
  AlreadyStarted { started_at: chrono::DateTime<chrono::Utc> },
  /// The requested operation is not valid for the job's current state.
  #[error("Invalid job state: {0}")]
  InvalidJobState(String),
  /// Another job is already stored under this identifier.
  #[error("Job with ID {0} already exists")]
  JobIdAlreadyExists(JobId),
}

/// Errors returned by `JobQueue::submit`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
  #[error(transparent)]
  State(#[from] JobStateError),
  #[error("Storage backend refused job {0}")]
  StorageRejected(String),
}

/// Errors raised while resolving the storage backend from configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error("Unknown storage mode '{0}'")]
  UnknownStorageMode(String),
  #[error("Storage mode 'custom' requires an injected implementation")]
  MissingCustomStorage,
}

/// Captured when a job's action panics instead of returning an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Job action panicked: {message}")]
pub struct ActionPanicked {
  pub message: String,
}

/// Captured when a job's action runs past its configured timeout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Job action timed out after {timeout:?}")]
pub struct ActionTimedOut {
  pub timeout: Duration,
}
