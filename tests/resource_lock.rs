mod common;

use common::{action_concurrency_tracker, build_queue, setup_tracing, wait_finished, wait_until};

use jobgate::{Job, JobStatus};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_resource_runs_in_order() {
  setup_tracing();
  let queue = build_queue(4, true).expect("Failed to build queue");
  let x = Arc::new(AtomicUsize::new(10));

  let x1 = x.clone();
  let job1 = queue
    .submit(
      Job::builder()
        .resource_key("R")
        .description("first")
        .action(move |_job: Job| {
          let x = x1.clone();
          async move {
            tokio::time::sleep(StdDuration::from_millis(600)).await;
            x.store(11, Ordering::SeqCst);
            Ok(())
          }
        })
        .build(),
    )
    .expect("Submit job1 failed");

  let x2 = x.clone();
  let job2 = queue
    .submit(
      Job::builder()
        .resource_key("R")
        .description("second")
        .action(move |_job: Job| {
          let x = x2.clone();
          async move {
            anyhow::ensure!(x.load(Ordering::SeqCst) == 11, "first job has not run yet");
            x.store(12, Ordering::SeqCst);
            Ok(())
          }
        })
        .build(),
    )
    .expect("Submit job2 failed");

  tokio::time::sleep(StdDuration::from_millis(200)).await;
  assert_eq!(job1.status(), JobStatus::RunningAction);
  assert_eq!(job2.status(), JobStatus::WaitingForResource);
  assert_eq!(x.load(Ordering::SeqCst), 10);
  assert!(queue
    .get_running_job_by_resource("R")
    .map(|running| running.ptr_eq(&job1))
    .unwrap_or(false));
  assert_eq!(queue.get_pending_jobs_by_resource("R").len(), 1);

  assert!(wait_finished(&job2, StdDuration::from_secs(3)).await);
  assert_eq!(job1.status(), JobStatus::Finished);
  assert_eq!(job2.status(), JobStatus::Finished);
  assert!(!job2.has_error());
  assert!(job2.started_at() >= job1.stopped_at());
  assert_eq!(x.load(Ordering::SeqCst), 12);

  assert!(wait_until(StdDuration::from_secs(1), || queue.get_finished_jobs().len() == 2).await);
  assert!(queue.get_pending_jobs().is_empty());
  assert!(queue.get_running_jobs().is_empty());
  assert_eq!(queue.get_finished_jobs_by_resource("R").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_resource_never_overlaps() {
  setup_tracing();
  let queue = build_queue(4, true).expect("Failed to build queue");
  let active = Arc::new(AtomicUsize::new(0));
  let max_active = Arc::new(AtomicUsize::new(0));

  let jobs: Vec<Job> = (0..5)
    .map(|_| {
      queue
        .submit(
          Job::builder()
            .resource_key("shared")
            .boxed_action(action_concurrency_tracker(
              active.clone(),
              max_active.clone(),
              StdDuration::from_millis(30),
            ))
            .build(),
        )
        .expect("Submit failed")
    })
    .collect();

  for job in &jobs {
    assert!(wait_finished(job, StdDuration::from_secs(3)).await);
    assert_eq!(job.status(), JobStatus::Finished);
  }
  assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_resources_run_concurrently() {
  setup_tracing();
  let queue = build_queue(4, true).expect("Failed to build queue");
  let active = Arc::new(AtomicUsize::new(0));
  let max_active = Arc::new(AtomicUsize::new(0));

  let jobs: Vec<Job> = ["a", "b", "c"]
    .iter()
    .map(|key| {
      queue
        .submit(
          Job::builder()
            .resource_key(*key)
            .boxed_action(action_concurrency_tracker(
              active.clone(),
              max_active.clone(),
              StdDuration::from_millis(200),
            ))
            .build(),
        )
        .expect("Submit failed")
    })
    .collect();

  for job in &jobs {
    assert!(wait_finished(job, StdDuration::from_secs(3)).await);
  }
  assert_eq!(max_active.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_free_job_is_admitted_past_blocked_one() {
  setup_tracing();
  let queue = build_queue(4, true).expect("Failed to build queue");

  let blocker = queue
    .submit(
      Job::builder()
        .resource_key("busy")
        .action(|_job: Job| async {
          tokio::time::sleep(StdDuration::from_millis(400)).await;
          Ok(())
        })
        .build(),
    )
    .expect("Submit failed");
  let blocked = queue
    .submit(Job::builder().resource_key("busy").build())
    .expect("Submit failed");
  let free = queue
    .submit(Job::builder().resource_key("idle").build())
    .expect("Submit failed");

  assert!(wait_finished(&free, StdDuration::from_secs(1)).await);
  assert_eq!(free.status(), JobStatus::Finished);
  assert_eq!(blocker.status(), JobStatus::RunningAction);
  assert_eq!(blocked.status(), JobStatus::WaitingForResource);

  assert!(wait_finished(&blocked, StdDuration::from_secs(2)).await);
  assert_eq!(blocked.status(), JobStatus::Finished);
}
