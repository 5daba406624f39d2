use crate::command::{ShutdownMode, WorkerId};
use crate::coordinator::QueueState;
use crate::execution;
use crate::job::Job;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

type DispatchRx = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Why a pool slot could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolRejection {
  /// Every slot is taken (elastic) or the dispatch queue is full (fixed).
  Saturated,
  /// The pool stopped accepting work.
  Closed,
}

/// A reserved pool slot. Dropping it unused gives the slot back.
pub(crate) enum Slot {
  Fixed(mpsc::OwnedPermit<Job>),
  Elastic {
    permit: OwnedSemaphorePermit,
    runtime: Handle,
    worker_id: WorkerId,
  },
}

impl Slot {
  /// Hands an admitted job to the executor behind this slot.
  pub fn dispatch(self, state: &Arc<QueueState>, job: Job) {
    match self {
      Slot::Fixed(permit) => {
        permit.send(job);
      }
      Slot::Elastic {
        permit,
        runtime,
        worker_id,
      } => {
        let state = state.clone();
        runtime.spawn(async move {
          state.execute_chain(job, worker_id).await;
          drop(permit);
          state.resume_admission();
        });
      }
    }
  }
}

/// The executors that run admitted jobs.
#[derive(Debug)]
pub(crate) enum WorkerPool {
  /// `max_workers` long-lived workers draining a bounded dispatch queue.
  Fixed { dispatch_tx: mpsc::Sender<Job> },
  /// One task per job, at most `max_workers` at a time.
  Elastic {
    permits: Arc<Semaphore>,
    runtime: Handle,
    next_worker_id: AtomicUsize,
  },
}

impl WorkerPool {
  pub fn elastic(max_workers: usize, runtime: Handle) -> Self {
    WorkerPool::Elastic {
      permits: Arc::new(Semaphore::new(max_workers)),
      runtime,
      next_worker_id: AtomicUsize::new(0),
    }
  }

  /// Creates the fixed pool. The returned receiver is handed to the workers
  /// spawned with [`spawn_fixed_workers`].
  pub fn fixed(queue_capacity: usize) -> (Self, mpsc::Receiver<Job>) {
    let (dispatch_tx, dispatch_rx) = mpsc::channel(queue_capacity);
    (WorkerPool::Fixed { dispatch_tx }, dispatch_rx)
  }

  pub fn try_reserve(&self) -> Result<Slot, PoolRejection> {
    match self {
      WorkerPool::Fixed { dispatch_tx } => match dispatch_tx.clone().try_reserve_owned() {
        Ok(permit) => Ok(Slot::Fixed(permit)),
        Err(mpsc::error::TrySendError::Full(_)) => Err(PoolRejection::Saturated),
        Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolRejection::Closed),
      },
      WorkerPool::Elastic {
        permits,
        runtime,
        next_worker_id,
      } => match permits.clone().try_acquire_owned() {
        Ok(permit) => Ok(Slot::Elastic {
          permit,
          runtime: runtime.clone(),
          worker_id: next_worker_id.fetch_add(1, AtomicOrdering::Relaxed),
        }),
        Err(TryAcquireError::NoPermits) => Err(PoolRejection::Saturated),
        Err(TryAcquireError::Closed) => Err(PoolRejection::Closed),
      },
    }
  }

  /// Stops handing out elastic slots. Fixed workers close their own queue
  /// when they observe the shutdown signal.
  pub fn close(&self) {
    if let WorkerPool::Elastic { permits, .. } = self {
      permits.close();
    }
  }
}

/// Spawns the long-lived workers of a fixed pool.
pub(crate) fn spawn_fixed_workers(
  count: usize,
  runtime: &Handle,
  state: &Arc<QueueState>,
  dispatch_rx: mpsc::Receiver<Job>,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
) -> Vec<JoinHandle<()>> {
  let dispatch_rx: DispatchRx = Arc::new(Mutex::new(dispatch_rx));
  (0..count)
    .map(|id| {
      let worker = Worker {
        id,
        state: Arc::downgrade(state),
        dispatch_rx: dispatch_rx.clone(),
        shutdown_rx: shutdown_rx.clone(),
      };
      runtime.spawn(worker.run())
    })
    .collect()
}

/// A long-lived worker of the fixed pool.
///
/// Workers share the dispatch receiver and hold the queue weakly, so dropping
/// the last queue handle closes the channel and ends them.
struct Worker {
  id: WorkerId,
  state: Weak<QueueState>,
  dispatch_rx: DispatchRx,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
}

impl Worker {
  async fn run(mut self) {
    debug!(worker_id = self.id, "Worker started.");

    loop {
      let mut rx = self.dispatch_rx.lock().await;

      let mode = *self.shutdown_rx.borrow_and_update();
      match mode {
        Some(ShutdownMode::Force) => {
          rx.close();
          let mut abandoned = 0usize;
          while let Ok(job) = rx.try_recv() {
            self.abandon(&job);
            abandoned += 1;
          }
          if abandoned > 0 {
            info!(worker_id = self.id, abandoned, "Dropped queued jobs on forced stop.");
          }
          break;
        }
        // Queued jobs are still drained after close.
        Some(ShutdownMode::Graceful) => rx.close(),
        None => {}
      }

      let received = tokio::select! {
        biased;

        Ok(()) = self.shutdown_rx.changed() => {
          trace!(worker_id = self.id, "Shutdown signal changed.");
          continue;
        }

        job = rx.recv() => job,
      };
      drop(rx);

      match received {
        Some(job) => match self.state.upgrade() {
          Some(state) => {
            state.execute_chain(job, self.id).await;
            state.resume_admission();
          }
          None => {
            self.abandon(&job);
            break;
          }
        },
        None => {
          debug!(worker_id = self.id, "Dispatch queue closed.");
          break;
        }
      }
    }

    debug!(worker_id = self.id, "Worker exiting.");
  }

  fn abandon(&self, job: &Job) {
    match self.state.upgrade() {
      Some(state) => state.abandon(job),
      None => execution::finalize(job),
    }
  }
}

/// Span wrapping one job execution.
pub(crate) fn job_span(worker_id: WorkerId, job: &Job) -> tracing::Span {
  tracing::info_span!(
    "job_exec",
    worker_id,
    job_id = ?job.id(),
    resource_key = ?job.resource_key(),
  )
}
