mod common;

use common::{
  action_flag, build_queue, setup_tracing, submit_follow_up_on_callback, wait_finished, wait_until,
};

use jobgate::{Job, JobStatus};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_running_job() {
  setup_tracing();
  let queue = build_queue(2, true).expect("Failed to build queue");
  let flag = Arc::new(AtomicBool::new(false));
  let finalized = Arc::new(AtomicBool::new(false));

  let finalized_clone = finalized.clone();
  let job = queue
    .submit(
      Job::builder()
        .resource_key("long")
        .boxed_action(action_flag(flag.clone(), StdDuration::from_millis(500)))
        .on_finalize(move |_job| finalized_clone.store(true, Ordering::SeqCst))
        .build(),
    )
    .expect("Submit failed");

  assert!(wait_until(StdDuration::from_secs(1), || job.status() == JobStatus::RunningAction).await);
  assert!(queue.cancel(&job), "Cancel should succeed for a running job");
  assert_eq!(job.status(), JobStatus::Canceled);

  assert!(wait_finished(&job, StdDuration::from_secs(2)).await);
  assert!(finalized.load(Ordering::SeqCst));

  tokio::time::sleep(StdDuration::from_millis(700)).await;
  assert!(!flag.load(Ordering::SeqCst), "Aborted action must not complete");
  assert_eq!(job.status(), JobStatus::Canceled);
  assert_eq!(queue.metrics_snapshot().jobs_cancelled, 1);
  assert!(queue.get_running_jobs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_pending_job_is_refused() {
  setup_tracing();
  let queue = jobgate::JobQueue::builder()
    .build()
    .expect("Failed to build queue");
  let job = queue.submit(Job::builder().build()).expect("Submit failed");

  assert_eq!(job.status(), JobStatus::Initialized);
  assert!(!queue.cancel(&job));
  assert_eq!(job.status(), JobStatus::Initialized);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_unknown_id() {
  setup_tracing();
  let queue = build_queue(2, true).expect("Failed to build queue");
  assert!(!queue.cancel_by_id(12345));

  // A job from another queue is not ours to cancel.
  let other = build_queue(1, true).expect("Failed to build queue");
  let foreign = other
    .submit(
      Job::builder()
        .action(|_job: Job| async {
          tokio::time::sleep(StdDuration::from_millis(300)).await;
          Ok(())
        })
        .build(),
    )
    .expect("Submit failed");
  assert!(wait_until(StdDuration::from_secs(1), || foreign.is_running()).await);
  assert!(!queue.cancel(&foreign));
  assert!(wait_finished(&foreign, StdDuration::from_secs(2)).await);
  assert_eq!(foreign.status(), JobStatus::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_frees_resource() {
  setup_tracing();
  let queue = build_queue(2, true).expect("Failed to build queue");
  let flag = Arc::new(AtomicBool::new(false));

  let first = queue
    .submit(
      Job::builder()
        .resource_key("R")
        .action(|_job: Job| async {
          tokio::time::sleep(StdDuration::from_secs(10)).await;
          Ok(())
        })
        .build(),
    )
    .expect("Submit failed");
  let second = queue
    .submit(
      Job::builder()
        .resource_key("R")
        .boxed_action(action_flag(flag.clone(), StdDuration::ZERO))
        .build(),
    )
    .expect("Submit failed");

  assert!(wait_until(StdDuration::from_secs(1), || first.is_running()).await);
  assert_eq!(second.status(), JobStatus::WaitingForResource);

  let id = first.id().expect("Submitted job has an ID");
  assert!(queue.cancel_by_id(id));

  assert!(wait_finished(&second, StdDuration::from_secs(2)).await);
  assert_eq!(second.status(), JobStatus::Finished);
  assert!(flag.load(Ordering::SeqCst));
  assert_eq!(first.status(), JobStatus::Canceled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_while_status_listener_submits() {
  setup_tracing();
  let queue = build_queue(2, true).expect("Failed to build queue");
  let follow_up: Arc<Mutex<Option<Job>>> = Arc::new(Mutex::new(None));

  let job = queue
    .submit(
      Job::builder()
        .resource_key("chained")
        .on_status_change(submit_follow_up_on_callback(queue.clone(), follow_up.clone()))
        .build(),
    )
    .expect("Submit failed");
  assert!(wait_until(StdDuration::from_secs(1), || job.status() == JobStatus::RunningCallback).await);

  // The listener is still sleeping inside the RunningCallback notification.
  let canceller = queue.clone();
  let target = job.clone();
  let cancel = tokio::task::spawn_blocking(move || canceller.cancel(&target));
  let cancelled = tokio::time::timeout(StdDuration::from_secs(5), cancel)
    .await
    .expect("Cancel blocked behind the status listener")
    .expect("Cancel task failed");

  assert!(wait_finished(&job, StdDuration::from_secs(2)).await);
  let expected = if cancelled {
    JobStatus::Canceled
  } else {
    JobStatus::Finished
  };
  assert_eq!(job.status(), expected);

  let next = follow_up
    .lock()
    .clone()
    .expect("Listener should have submitted a follow-up");
  assert!(wait_finished(&next, StdDuration::from_secs(2)).await);
  assert_eq!(next.status(), JobStatus::Finished);
}
