use super::JobStorage;
use crate::job::{Job, JobCategory, JobId, JobIdentity};

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::{trace, warn};

/// The in-process reference backend.
///
/// Keeps a single insertion-ordered map of job to category, so a job can never
/// be listed under two categories at once.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
  inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Entry {
  job: Job,
  category: JobCategory,
}

#[derive(Debug)]
struct Inner {
  next_seq: u64,
  next_id: JobId,
  // Insertion sequence -> entry.
  entries: BTreeMap<u64, Entry>,
  index: HashMap<JobId, u64>,
}

impl Default for Inner {
  fn default() -> Self {
    Self {
      next_seq: 0,
      next_id: 1,
      entries: BTreeMap::new(),
      index: HashMap::new(),
    }
  }
}

impl Inner {
  fn next_free_id(&mut self) -> JobId {
    while self.index.contains_key(&self.next_id) {
      self.next_id += 1;
    }
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  fn by_category(&self, category: JobCategory) -> Vec<Job> {
    self
      .entries
      .values()
      .filter(|entry| entry.category == category)
      .map(|entry| entry.job.clone())
      .collect()
  }
}

impl InMemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.inner.read().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl JobStorage for InMemoryStorage {
  fn upsert(&self, job: &Job) -> Option<JobId> {
    let category = job.status().category()?;
    if job.identity() == JobIdentity::AwaitingAssignment {
      return None;
    }

    let mut inner = self.inner.write();
    let id = match job.id() {
      Some(id) => id,
      None => {
        let candidate = inner.next_free_id();
        job.assign_generated_id(candidate);
        job.id()?
      }
    };

    match inner.index.get(&id).copied() {
      Some(seq) => {
        let entry = inner.entries.get_mut(&seq)?;
        if !entry.job.ptr_eq(job) {
          warn!(job_id = id, "Refusing to overwrite a different job stored under the same ID.");
          return None;
        }
        entry.category = category;
      }
      None => {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
          seq,
          Entry {
            job: job.clone(),
            category,
          },
        );
        inner.index.insert(id, seq);
      }
    }
    trace!(job_id = id, ?category, "Stored job.");
    Some(id)
  }

  fn get_by_id(&self, id: JobId) -> Option<Job> {
    let inner = self.inner.read();
    let seq = inner.index.get(&id)?;
    inner.entries.get(seq).map(|entry| entry.job.clone())
  }

  fn category_of(&self, id: JobId) -> Option<JobCategory> {
    let inner = self.inner.read();
    let seq = inner.index.get(&id)?;
    inner.entries.get(seq).map(|entry| entry.category)
  }

  fn pending(&self) -> Vec<Job> {
    self.inner.read().by_category(JobCategory::Pending)
  }

  fn running(&self) -> Vec<Job> {
    self.inner.read().by_category(JobCategory::Running)
  }

  fn finished(&self) -> Vec<Job> {
    self.inner.read().by_category(JobCategory::Finished)
  }

  fn all(&self) -> Vec<Job> {
    self
      .inner
      .read()
      .entries
      .values()
      .map(|entry| entry.job.clone())
      .collect()
  }

  fn remove(&self, id: JobId) -> Option<Job> {
    let mut inner = self.inner.write();
    let seq = inner.index.remove(&id)?;
    inner.entries.remove(&seq).map(|entry| entry.job)
  }

  fn is_resource_free(&self, key: &str) -> bool {
    !self.inner.read().entries.values().any(|entry| {
      entry.category == JobCategory::Running && entry.job.resource_key() == Some(key)
    })
  }

  fn contains(&self, id: JobId) -> bool {
    self.inner.read().index.contains_key(&id)
  }

  fn last_added(&self) -> Option<Job> {
    self
      .inner
      .read()
      .entries
      .values()
      .next_back()
      .map(|entry| entry.job.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::job::JobStatus;

  fn submitted(builder: crate::job::JobBuilder) -> Job {
    let job = builder.build();
    job.set_status(JobStatus::Initialized);
    job
  }

  #[test]
  fn unsubmitted_and_deferred_jobs_are_not_stored() {
    let storage = InMemoryStorage::new();
    assert_eq!(storage.upsert(&Job::builder().build()), None);
    assert_eq!(storage.upsert(&Job::builder().defer_id().build()), None);
    assert!(storage.is_empty());
  }

  #[test]
  fn generated_ids_are_sequential_and_skip_taken_ids() {
    let storage = InMemoryStorage::new();
    let custom = submitted(Job::builder().job_id(2));
    assert_eq!(storage.upsert(&custom), Some(2));

    let a = submitted(Job::builder());
    let b = submitted(Job::builder());
    assert_eq!(storage.upsert(&a), Some(1));
    assert_eq!(storage.upsert(&b), Some(3));
    assert_eq!(a.id(), Some(1));
  }

  #[test]
  fn upsert_recategorizes_in_place() {
    let storage = InMemoryStorage::new();
    let job = submitted(Job::builder().resource_key("R"));
    let id = storage.upsert(&job).unwrap();
    assert_eq!(storage.category_of(id), Some(JobCategory::Pending));
    assert!(storage.is_resource_free("R"));

    job.begin().unwrap();
    storage.upsert(&job);
    assert_eq!(storage.category_of(id), Some(JobCategory::Running));
    assert!(!storage.is_resource_free("R"));
    assert_eq!(storage.running_by_resource("R"), Some(job.clone()));

    job.set_status(JobStatus::Canceled);
    storage.upsert(&job);
    assert_eq!(storage.all().len(), 1);
    assert!(storage.pending().is_empty());
    assert!(storage.running().is_empty());
    assert_eq!(storage.finished_by_resource("R").len(), 1);
    assert!(storage.is_resource_free("R"));
  }

  #[test]
  fn different_job_under_same_id_is_rejected() {
    let storage = InMemoryStorage::new();
    let first = submitted(Job::builder().job_id(5));
    let second = submitted(Job::builder().job_id(5));
    assert_eq!(storage.upsert(&first), Some(5));
    assert_eq!(storage.upsert(&second), None);
    assert!(storage.get_by_id(5).unwrap().ptr_eq(&first));
  }

  #[test]
  fn remove_and_last_added() {
    let storage = InMemoryStorage::new();
    let a = submitted(Job::builder());
    let b = submitted(Job::builder());
    storage.upsert(&a);
    storage.upsert(&b);
    assert_eq!(storage.last_added(), Some(b.clone()));

    assert_eq!(storage.remove(2), Some(b));
    assert!(!storage.contains(2));
    assert_eq!(storage.last_added(), Some(a));
  }
}
