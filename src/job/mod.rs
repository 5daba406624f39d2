pub mod callbacks;
#[cfg(feature = "job_context")]
pub mod context;
pub mod status;

pub use callbacks::{CallbackChain, OnErrorFn, OnFinalizeFn, OnStatusChangeFn, OnSuccessFn};
pub use status::{JobCategory, JobStatus};

use crate::error::JobStateError;
use callbacks::{contain, Callbacks};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::trace;

// --- Public Type Aliases ---

/// Numeric identifier of a job, unique within one queue's storage.
pub type JobId = u64;

/// What a job action resolves to. `Err` marks the action as failed.
pub type ActionResult = anyhow::Result<()>;

/// The future produced by a job action.
pub type ActionFuture = BoxFuture<'static, ActionResult>;

/// The unit of work a job runs. It receives a handle to its owning job.
///
/// Panics inside the action are caught by the execution wrapper and captured
/// like returned errors.
pub type BoxedAction = Arc<dyn Fn(Job) -> ActionFuture + Send + Sync + 'static>;

/// Queue-side hook that completes a deferred identifier assignment.
pub(crate) type IdAssignmentHook =
  Arc<dyn Fn(&Job, JobId) -> Result<(), JobStateError> + Send + Sync + 'static>;

/// How a job's identifier is (or will be) obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobIdentity {
  /// Storage assigns the next sequential identifier on first insert.
  Unassigned,
  /// Deferred-ID mode: the job stays invisible until `Job::assign_id` is called.
  AwaitingAssignment,
  Assigned(JobId),
}

impl JobIdentity {
  pub fn id(self) -> Option<JobId> {
    match self {
      JobIdentity::Assigned(id) => Some(id),
      _ => None,
    }
  }
}

/// Per-job execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobOptions {
  /// Upper bound on time spent pending, and separately on time spent in the action.
  pub timeout: Option<StdDuration>,
}

#[derive(Debug)]
struct JobState {
  status: JobStatus,
  started_at: Option<DateTime<Utc>>,
  stopped_at: Option<DateTime<Utc>>,
  error: Option<Arc<anyhow::Error>>,
}

struct JobInner {
  identity: RwLock<JobIdentity>,
  resource_key: Option<String>,
  description: Option<String>,
  options: JobOptions,
  created_at: DateTime<Utc>,
  action: BoxedAction,
  state: Mutex<JobState>,
  callbacks: Mutex<Callbacks>,
  // Held across a status write and its notifications so that listeners see
  // transitions in the order they happened.
  transition_lock: ReentrantMutex<()>,
  start_lock: Mutex<()>,
  submitted: AtomicBool,
  id_hook: Mutex<Option<IdAssignmentHook>>,
}

/// A schedulable unit of work.
///
/// `Job` is a cheap, clonable handle: the queue, its storage and the caller all
/// hold the same underlying job. Once submitted, only the queue mutates status
/// and timestamps; callers read them and may request cancellation.
///
/// Use [`Job::builder`] to create one.
#[derive(Clone)]
pub struct Job(Arc<JobInner>);

impl fmt::Debug for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let identity = *self.0.identity.read();
    let state = self.0.state.lock();
    f.debug_struct("Job")
      .field("identity", &identity)
      .field("resource_key", &self.0.resource_key)
      .field("description", &self.0.description)
      .field("status", &state.status)
      .field("started_at", &state.started_at)
      .field("stopped_at", &state.stopped_at)
      .field("has_error", &state.error.is_some())
      .field("action", &format_args!("<Fn>"))
      .finish()
  }
}

impl PartialEq for Job {
  fn eq(&self, other: &Self) -> bool {
    self.ptr_eq(other)
  }
}

impl Eq for Job {}

impl Job {
  pub fn builder() -> JobBuilder {
    JobBuilder::new()
  }

  /// True if both handles refer to the same job.
  pub fn ptr_eq(&self, other: &Job) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }

  pub fn id(&self) -> Option<JobId> {
    self.0.identity.read().id()
  }

  pub fn identity(&self) -> JobIdentity {
    *self.0.identity.read()
  }

  pub fn has_id(&self) -> bool {
    self.id().is_some()
  }

  pub fn status(&self) -> JobStatus {
    self.0.state.lock().status
  }

  pub fn resource_key(&self) -> Option<&str> {
    self.0.resource_key.as_deref()
  }

  pub fn description(&self) -> Option<&str> {
    self.0.description.as_deref()
  }

  pub fn options(&self) -> JobOptions {
    self.0.options
  }

  pub fn created_at(&self) -> DateTime<Utc> {
    self.0.created_at
  }

  pub fn started_at(&self) -> Option<DateTime<Utc>> {
    self.0.state.lock().started_at
  }

  pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
    self.0.state.lock().stopped_at
  }

  pub fn is_started(&self) -> bool {
    self.started_at().is_some()
  }

  pub fn is_finished(&self) -> bool {
    self.stopped_at().is_some()
  }

  pub fn is_running(&self) -> bool {
    let state = self.0.state.lock();
    state.started_at.is_some() && state.stopped_at.is_none()
  }

  pub fn has_error(&self) -> bool {
    self.0.state.lock().error.is_some()
  }

  /// The error captured from a failed action, if any.
  ///
  /// Use `downcast_ref` to recover the concrete error type. Panics are captured
  /// as [`ActionPanicked`](crate::error::ActionPanicked) and timeouts as
  /// [`ActionTimedOut`](crate::error::ActionTimedOut).
  pub fn error(&self) -> Option<Arc<anyhow::Error>> {
    self.0.state.lock().error.clone()
  }

  /// Point-in-time copy of the job's observable fields.
  pub fn snapshot(&self) -> JobSnapshot {
    let identity = self.identity();
    let state = self.0.state.lock();
    JobSnapshot {
      id: identity.id(),
      resource_key: self.0.resource_key.clone(),
      description: self.0.description.clone(),
      status: state.status,
      created_at: self.0.created_at,
      started_at: state.started_at,
      stopped_at: state.stopped_at,
      error: state.error.as_ref().map(|e| format!("{:#}", e)),
    }
  }

  // --- Callback registration ---

  pub fn append_on_success<F>(&self, callback: F)
  where
    F: Fn(&Job) + Send + Sync + 'static,
  {
    self.0.callbacks.lock().on_success.append(Arc::new(callback));
  }

  pub fn append_on_error<F>(&self, callback: F)
  where
    F: Fn(&Job, &anyhow::Error) + Send + Sync + 'static,
  {
    self.0.callbacks.lock().on_error.append(Arc::new(callback));
  }

  /// Places an error handler in front of every handler registered so far.
  pub fn prepend_on_error<F>(&self, callback: F)
  where
    F: Fn(&Job, &anyhow::Error) + Send + Sync + 'static,
  {
    self.0.callbacks.lock().on_error.prepend(Arc::new(callback));
  }

  pub fn append_on_finalize<F>(&self, callback: F)
  where
    F: Fn(&Job) + Send + Sync + 'static,
  {
    self.0.callbacks.lock().on_finalize.append(Arc::new(callback));
  }

  pub fn append_on_status_change<F>(&self, callback: F)
  where
    F: Fn(&Job) + Send + Sync + 'static,
  {
    self
      .0
      .callbacks
      .lock()
      .on_status_change
      .append(Arc::new(callback));
  }

  pub(crate) fn prepend_on_error_arc(&self, callback: Arc<OnErrorFn>) {
    self.0.callbacks.lock().on_error.prepend(callback);
  }

  pub(crate) fn prepend_on_status_change<F>(&self, callback: F)
  where
    F: Fn(&Job) + Send + Sync + 'static,
  {
    self
      .0
      .callbacks
      .lock()
      .on_status_change
      .prepend(Arc::new(callback));
  }

  pub(crate) fn callbacks(&self) -> Callbacks {
    self.0.callbacks.lock().clone()
  }

  // --- Identifier assignment ---

  /// Assigns the identifier of a job built in deferred-ID mode, making it
  /// visible to its queue and eligible for scheduling.
  ///
  /// # Errors
  ///
  /// - [`JobStateError::InvalidJobState`]: the job was not submitted, or is not
  ///   `WaitingForId`.
  /// - [`JobStateError::JobIdAlreadyExists`]: the queue already stores a job
  ///   under `id`.
  pub fn assign_id(&self, id: JobId) -> Result<(), JobStateError> {
    let hook = self.0.id_hook.lock().clone();
    match hook {
      Some(hook) => hook(self, id),
      None => Err(JobStateError::InvalidJobState(format!(
        "cannot assign ID {} to a job in status {} that is not queued for deferred assignment",
        id,
        self.status()
      ))),
    }
  }

  /// Records the identifier chosen by a storage backend for a job that had
  /// none. Returns `false` if the job already has an identifier or is
  /// waiting for an external assignment.
  pub fn assign_generated_id(&self, id: JobId) -> bool {
    let mut identity = self.0.identity.write();
    if *identity == JobIdentity::Unassigned {
      *identity = JobIdentity::Assigned(id);
      true
    } else {
      false
    }
  }

  pub(crate) fn install_id_hook(&self, hook: IdAssignmentHook) {
    *self.0.id_hook.lock() = Some(hook);
  }

  /// Completes a deferred assignment: `WaitingForId -> Initialized`.
  pub(crate) fn commit_deferred_id(&self, id: JobId) -> Result<(), JobStateError> {
    {
      let mut identity = self.0.identity.write();
      let status = self.status();
      if *identity != JobIdentity::AwaitingAssignment || status != JobStatus::WaitingForId {
        return Err(JobStateError::InvalidJobState(format!(
          "cannot assign ID {} to a job in status {}",
          id, status
        )));
      }
      *identity = JobIdentity::Assigned(id);
    }
    self.0.id_hook.lock().take();
    self.set_status(JobStatus::Initialized);
    Ok(())
  }

  // --- Lifecycle (crate-internal) ---

  /// Marks the job as handed to a queue. Returns `false` if it already was.
  pub(crate) fn mark_submitted(&self) -> bool {
    !self.0.submitted.swap(true, AtomicOrdering::SeqCst)
  }

  pub(crate) fn is_submitted(&self) -> bool {
    self.0.submitted.load(AtomicOrdering::SeqCst)
  }

  /// Applies a status transition and fires the status-change chain once.
  ///
  /// Returns `false` (and notifies nobody) for a same-status write or a
  /// transition the state machine does not allow.
  pub(crate) fn set_status(&self, next: JobStatus) -> bool {
    let _ordered = self.0.transition_lock.lock();
    {
      let mut state = self.0.state.lock();
      if !state.status.can_transition_to(next) {
        trace!(job_id = ?self.id(), from = %state.status, to = %next, "Ignoring status write.");
        return false;
      }
      state.status = next;
    }
    let listeners = self.0.callbacks.lock().on_status_change.clone();
    for listener in listeners.iter() {
      contain(self, "on_status_change", || listener(self));
    }
    true
  }

  /// The single-start guard for a direct start: records the start time and
  /// enters `RunningAction`, at most once per job.
  pub(crate) fn begin(&self) -> Result<(), JobStateError> {
    self.enter_running(true)
  }

  /// Admission into the running category. The start time is recorded later,
  /// by [`Job::mark_started`], when the action actually begins.
  pub(crate) fn claim(&self) -> Result<(), JobStateError> {
    self.enter_running(false)
  }

  fn enter_running(&self, record_start: bool) -> Result<(), JobStateError> {
    self.ensure_not_started()?;
    let _guard = self.0.start_lock.lock();
    self.ensure_not_started()?;
    {
      let mut state = self.0.state.lock();
      if !state.status.can_transition_to(JobStatus::RunningAction) {
        return Err(JobStateError::InvalidJobState(format!(
          "cannot start a job in status {}",
          state.status
        )));
      }
      if record_start {
        state.started_at = Some(Utc::now());
      }
    }
    if self.set_status(JobStatus::RunningAction) {
      Ok(())
    } else {
      Err(JobStateError::InvalidJobState(format!(
        "job left its pending status before it could start ({})",
        self.status()
      )))
    }
  }

  /// Records the start time unless a direct start already did.
  pub(crate) fn mark_started(&self) {
    let mut state = self.0.state.lock();
    if state.started_at.is_none() {
      state.started_at = Some(Utc::now());
    }
  }

  fn ensure_not_started(&self) -> Result<(), JobStateError> {
    match self.started_at() {
      Some(started_at) => Err(JobStateError::AlreadyStarted { started_at }),
      None => Ok(()),
    }
  }

  /// Records the stop time once. Returns `false` if it was already set.
  pub(crate) fn mark_stopped(&self) -> bool {
    let mut state = self.0.state.lock();
    if state.stopped_at.is_some() {
      return false;
    }
    state.stopped_at = Some(Utc::now());
    true
  }

  pub(crate) fn capture_error(&self, error: anyhow::Error) -> Arc<anyhow::Error> {
    let error = Arc::new(error);
    self.0.state.lock().error = Some(error.clone());
    error
  }

  pub(crate) fn action(&self) -> BoxedAction {
    self.0.action.clone()
  }
}

/// Snapshot of a job's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobSnapshot {
  pub id: Option<JobId>,
  pub resource_key: Option<String>,
  pub description: Option<String>,
  pub status: JobStatus,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub stopped_at: Option<DateTime<Utc>>,
  /// Rendered captured error, including its cause chain.
  pub error: Option<String>,
}

/// Builder for [`Job`].
///
/// A job without an action runs a no-op.
pub struct JobBuilder {
  action: Option<BoxedAction>,
  resource_key: Option<String>,
  description: Option<String>,
  identity: JobIdentity,
  options: JobOptions,
  callbacks: Callbacks,
}

impl fmt::Debug for JobBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobBuilder")
      .field("resource_key", &self.resource_key)
      .field("description", &self.description)
      .field("identity", &self.identity)
      .field("options", &self.options)
      .field("callbacks", &self.callbacks)
      .finish()
  }
}

impl Default for JobBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl JobBuilder {
  pub fn new() -> Self {
    Self {
      action: None,
      resource_key: None,
      description: None,
      identity: JobIdentity::Unassigned,
      options: JobOptions::default(),
      callbacks: Callbacks::default(),
    }
  }

  /// Sets the async action. It receives a handle to the job being run.
  pub fn action<F, Fut>(mut self, action: F) -> Self
  where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.action = Some(Arc::new(move |job: Job| Box::pin(action(job)) as ActionFuture));
    self
  }

  /// Sets an already boxed action, e.g. one produced by [`job_action!`](crate::job_action).
  pub fn boxed_action(mut self, action: BoxedAction) -> Self {
    self.action = Some(action);
    self
  }

  /// Jobs sharing a resource key never run concurrently.
  pub fn resource_key(mut self, key: impl Into<String>) -> Self {
    self.resource_key = Some(key.into());
    self
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  /// Uses a caller-chosen identifier instead of a generated one.
  pub fn job_id(mut self, id: JobId) -> Self {
    self.identity = JobIdentity::Assigned(id);
    self
  }

  /// Deferred-ID mode: the job starts in `WaitingForId` and is ignored by its
  /// queue until [`Job::assign_id`] is called.
  pub fn defer_id(mut self) -> Self {
    self.identity = JobIdentity::AwaitingAssignment;
    self
  }

  pub fn timeout(mut self, timeout: StdDuration) -> Self {
    self.options.timeout = Some(timeout);
    self
  }

  pub fn options(mut self, options: JobOptions) -> Self {
    self.options = options;
    self
  }

  pub fn on_success<F>(mut self, callback: F) -> Self
  where
    F: Fn(&Job) + Send + Sync + 'static,
  {
    self.callbacks.on_success.append(Arc::new(callback));
    self
  }

  pub fn on_error<F>(mut self, callback: F) -> Self
  where
    F: Fn(&Job, &anyhow::Error) + Send + Sync + 'static,
  {
    self.callbacks.on_error.append(Arc::new(callback));
    self
  }

  pub fn on_finalize<F>(mut self, callback: F) -> Self
  where
    F: Fn(&Job) + Send + Sync + 'static,
  {
    self.callbacks.on_finalize.append(Arc::new(callback));
    self
  }

  pub fn on_status_change<F>(mut self, callback: F) -> Self
  where
    F: Fn(&Job) + Send + Sync + 'static,
  {
    self.callbacks.on_status_change.append(Arc::new(callback));
    self
  }

  pub fn build(self) -> Job {
    let action = self
      .action
      .unwrap_or_else(|| Arc::new(|_job: Job| Box::pin(async { Ok::<(), anyhow::Error>(()) }) as ActionFuture));
    let deferred = self.identity == JobIdentity::AwaitingAssignment;

    let job = Job(Arc::new(JobInner {
      identity: RwLock::new(self.identity),
      resource_key: self.resource_key,
      description: self.description,
      options: self.options,
      created_at: Utc::now(),
      action,
      state: Mutex::new(JobState {
        status: JobStatus::Created,
        started_at: None,
        stopped_at: None,
        error: None,
      }),
      callbacks: Mutex::new(self.callbacks),
      transition_lock: ReentrantMutex::new(()),
      start_lock: Mutex::new(()),
      submitted: AtomicBool::new(false),
      id_hook: Mutex::new(None),
    }));

    if deferred {
      job.set_status(JobStatus::WaitingForId);
    }
    job
  }
}
