mod common;

use common::{build_queue, setup_tracing, wait_finished, wait_until};

use jobgate::{
  ConfigError, InMemoryStorage, Job, JobCategory, JobId, JobQueue, JobStatus, JobStorage,
  StorageBackend, StorageKind,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// Delegates to the in-memory backend and counts writes.
#[derive(Debug, Default)]
struct CountingStorage {
  inner: InMemoryStorage,
  upserts: AtomicUsize,
}

impl JobStorage for CountingStorage {
  fn upsert(&self, job: &Job) -> Option<JobId> {
    self.upserts.fetch_add(1, Ordering::SeqCst);
    self.inner.upsert(job)
  }

  fn get_by_id(&self, id: JobId) -> Option<Job> {
    self.inner.get_by_id(id)
  }

  fn category_of(&self, id: JobId) -> Option<JobCategory> {
    self.inner.category_of(id)
  }

  fn pending(&self) -> Vec<Job> {
    self.inner.pending()
  }

  fn running(&self) -> Vec<Job> {
    self.inner.running()
  }

  fn finished(&self) -> Vec<Job> {
    self.inner.finished()
  }

  fn all(&self) -> Vec<Job> {
    self.inner.all()
  }

  fn remove(&self, id: JobId) -> Option<Job> {
    self.inner.remove(id)
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_custom_storage_sees_every_transition() {
  setup_tracing();
  let storage = Arc::new(CountingStorage::default());
  let queue = JobQueue::builder()
    .custom_storage(storage.clone())
    .build_and_start()
    .expect("Failed to build queue");

  let job = queue.submit(Job::builder().build()).expect("Submit failed");
  assert!(wait_finished(&job, StdDuration::from_secs(2)).await);

  // Initialized, RunningAction, RunningCallback, Finished.
  assert_eq!(storage.upserts.load(Ordering::SeqCst), 4);
  let id = job.id().expect("Stored job has an ID");
  assert_eq!(storage.category_of(id), Some(JobCategory::Finished));
  assert!(queue
    .get_job_by_id(id)
    .map(|stored| stored.ptr_eq(&job))
    .unwrap_or(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remove_job() {
  setup_tracing();
  let queue = build_queue(2, true).expect("Failed to build queue");

  let done = queue.submit(Job::builder().build()).expect("Submit failed");
  assert!(wait_finished(&done, StdDuration::from_secs(2)).await);
  let done_id = done.id().expect("Stored job has an ID");

  let running = queue
    .submit(
      Job::builder()
        .action(|_job: Job| async {
          tokio::time::sleep(StdDuration::from_millis(300)).await;
          Ok(())
        })
        .build(),
    )
    .expect("Submit failed");
  assert!(wait_until(StdDuration::from_secs(1), || running.is_running()).await);
  let running_id = running.id().expect("Stored job has an ID");

  assert!(queue.remove_job(running_id).is_none(), "Running jobs stay");
  assert!(queue.get_job_by_id(running_id).is_some());

  let removed = queue.remove_job(done_id).expect("Finished job should be removable");
  assert!(removed.ptr_eq(&done));
  assert!(queue.get_job_by_id(done_id).is_none());
  assert!(queue.remove_job(done_id).is_none());

  assert!(wait_finished(&running, StdDuration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_pending_job_cancels_it() {
  setup_tracing();
  let queue = JobQueue::builder().build().expect("Failed to build queue");
  let job = queue.submit(Job::builder().build()).expect("Submit failed");
  let id = job.id().expect("Stored job has an ID");

  let removed = queue.remove_job(id).expect("Pending job should be removable");
  assert!(removed.ptr_eq(&job));
  assert_eq!(job.status(), JobStatus::Canceled);
  assert!(job.is_finished());
  assert!(queue.get_all_jobs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_storage_backend_selection() {
  setup_tracing();
  assert_eq!(StorageKind::from_name("memory"), Ok(StorageKind::InMemory));
  assert_eq!("Custom".parse::<StorageKind>(), Ok(StorageKind::Custom));
  assert_eq!(
    StorageKind::from_name("redis"),
    Err(ConfigError::UnknownStorageMode("redis".to_string()))
  );

  assert!(matches!(
    StorageBackend::from_kind(StorageKind::Custom, None),
    Err(ConfigError::MissingCustomStorage)
  ));

  let storage: Arc<dyn JobStorage> = Arc::new(InMemoryStorage::new());
  let backend = StorageBackend::from_kind(StorageKind::Custom, Some(storage))
    .expect("Custom backend with an implementation");
  let queue = JobQueue::builder()
    .storage(backend)
    .build()
    .expect("Failed to build queue");
  queue.submit(Job::builder().build()).expect("Submit failed");
  assert_eq!(queue.get_pending_jobs().len(), 1);
}
