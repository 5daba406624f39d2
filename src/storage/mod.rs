//! Storage of submitted jobs, partitioned into pending, running and finished.
//!
//! The queue writes through [`JobStorage::upsert`] on every status transition,
//! so a backend only has to derive each job's category from its current status.

pub mod memory;

pub use memory::InMemoryStorage;

use crate::error::ConfigError;
use crate::job::{Job, JobCategory, JobId};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The storage contract consumed by the queue.
///
/// Implementations must keep every identifier in exactly one category and
/// update the category in place when a stored job is upserted again.
pub trait JobStorage: Send + Sync + fmt::Debug {
  /// Inserts `job`, or re-categorizes it if already stored, based on its
  /// current status. A job without an identifier receives the next free
  /// sequential one.
  ///
  /// Returns `None` for jobs that cannot be stored yet (not submitted, or
  /// waiting for an external identifier assignment) and for an identifier
  /// already held by a different job.
  fn upsert(&self, job: &Job) -> Option<JobId>;

  fn get_by_id(&self, id: JobId) -> Option<Job>;

  fn category_of(&self, id: JobId) -> Option<JobCategory>;

  /// Pending jobs in insertion order.
  fn pending(&self) -> Vec<Job>;

  fn running(&self) -> Vec<Job>;

  fn finished(&self) -> Vec<Job>;

  /// Every stored job in insertion order.
  fn all(&self) -> Vec<Job>;

  fn remove(&self, id: JobId) -> Option<Job>;

  /// True if no job in the running category holds `key`.
  fn is_resource_free(&self, key: &str) -> bool {
    !self
      .running()
      .iter()
      .any(|job| job.resource_key() == Some(key))
  }

  fn contains(&self, id: JobId) -> bool {
    self.get_by_id(id).is_some()
  }

  /// Pending jobs the admission pass may consider, in insertion order.
  fn pending_ready(&self) -> Vec<Job> {
    self
      .pending()
      .into_iter()
      .filter(|job| job.status().is_pending_and_ready())
      .collect()
  }

  fn pending_by_resource(&self, key: &str) -> Vec<Job> {
    self
      .pending()
      .into_iter()
      .filter(|job| job.resource_key() == Some(key))
      .collect()
  }

  fn running_by_resource(&self, key: &str) -> Option<Job> {
    self
      .running()
      .into_iter()
      .find(|job| job.resource_key() == Some(key))
  }

  fn finished_by_resource(&self, key: &str) -> Vec<Job> {
    self
      .finished()
      .into_iter()
      .filter(|job| job.resource_key() == Some(key))
      .collect()
  }

  fn last_added(&self) -> Option<Job> {
    self.all().pop()
  }

  /// The finished job with the latest stop time.
  fn last_finished(&self) -> Option<Job> {
    self
      .finished()
      .into_iter()
      .max_by_key(|job| job.stopped_at())
  }
}

// --- Backend selection ---

/// Names a storage backend known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
  InMemory,
  /// A caller-provided implementation of [`JobStorage`].
  Custom,
}

impl StorageKind {
  /// Case-insensitive names accepted by [`StorageKind::from_name`].
  pub const REGISTRY: &'static [(&'static str, StorageKind)] = &[
    ("in-memory", StorageKind::InMemory),
    ("memory", StorageKind::InMemory),
    ("runtime", StorageKind::InMemory),
    ("internal", StorageKind::InMemory),
    ("custom", StorageKind::Custom),
  ];

  pub fn from_name(name: &str) -> Result<Self, ConfigError> {
    let wanted = name.trim();
    Self::REGISTRY
      .iter()
      .find(|(known, _)| known.eq_ignore_ascii_case(wanted))
      .map(|(_, kind)| *kind)
      .ok_or_else(|| ConfigError::UnknownStorageMode(name.to_string()))
  }
}

impl FromStr for StorageKind {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_name(s)
  }
}

/// The storage a queue is built with.
#[derive(Clone, Default)]
pub enum StorageBackend {
  #[default]
  InMemory,
  Custom(Arc<dyn JobStorage>),
}

impl fmt::Debug for StorageBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StorageBackend::InMemory => f.write_str("InMemory"),
      StorageBackend::Custom(storage) => f.debug_tuple("Custom").field(storage).finish(),
    }
  }
}

impl StorageBackend {
  /// Resolves a registry entry. `StorageKind::Custom` needs `custom`.
  pub fn from_kind(
    kind: StorageKind,
    custom: Option<Arc<dyn JobStorage>>,
  ) -> Result<Self, ConfigError> {
    match kind {
      StorageKind::InMemory => Ok(StorageBackend::InMemory),
      StorageKind::Custom => custom
        .map(StorageBackend::Custom)
        .ok_or(ConfigError::MissingCustomStorage),
    }
  }

  /// Selects the backend named by `JOBGATE_STORAGE_MODE`, defaulting to
  /// in-memory when the variable is unset.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_env_with(None)
  }

  /// Like [`StorageBackend::from_env`], supplying the instance used when the
  /// mode is `custom`.
  pub fn from_env_with(custom: Option<Arc<dyn JobStorage>>) -> Result<Self, ConfigError> {
    Self::from_lookup(crate::config::env_lookup, custom)
  }

  pub(crate) fn from_lookup<L>(
    lookup: L,
    custom: Option<Arc<dyn JobStorage>>,
  ) -> Result<Self, ConfigError>
  where
    L: Fn(&str) -> Option<String>,
  {
    match lookup(crate::config::ENV_STORAGE_MODE) {
      None => Ok(StorageBackend::InMemory),
      Some(name) if name.trim().is_empty() => Ok(StorageBackend::InMemory),
      Some(name) => Self::from_kind(StorageKind::from_name(&name)?, custom),
    }
  }

  pub(crate) fn into_storage(self) -> Arc<dyn JobStorage> {
    match self {
      StorageBackend::InMemory => Arc::new(InMemoryStorage::new()),
      StorageBackend::Custom(storage) => storage,
    }
  }
}
