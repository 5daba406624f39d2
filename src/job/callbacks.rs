use super::Job;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

/// Runs after the action succeeded.
pub type OnSuccessFn = dyn Fn(&Job) + Send + Sync + 'static;
/// Runs after the action failed, with the captured error.
pub type OnErrorFn = dyn Fn(&Job, &anyhow::Error) + Send + Sync + 'static;
/// Always runs once execution ends.
pub type OnFinalizeFn = dyn Fn(&Job) + Send + Sync + 'static;
/// Runs on every status transition.
pub type OnStatusChangeFn = dyn Fn(&Job) + Send + Sync + 'static;

/// Ordered, append-only list of callbacks. `prepend` is the only way to jump
/// the queue.
pub struct CallbackChain<F: ?Sized> {
  entries: Vec<Arc<F>>,
}

impl<F: ?Sized> Default for CallbackChain<F> {
  fn default() -> Self {
    Self { entries: Vec::new() }
  }
}

impl<F: ?Sized> Clone for CallbackChain<F> {
  fn clone(&self) -> Self {
    Self {
      entries: self.entries.clone(),
    }
  }
}

impl<F: ?Sized> fmt::Debug for CallbackChain<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "CallbackChain({} entries)", self.entries.len())
  }
}

impl<F: ?Sized> CallbackChain<F> {
  pub fn append(&mut self, callback: Arc<F>) {
    self.entries.push(callback);
  }

  pub fn prepend(&mut self, callback: Arc<F>) {
    self.entries.insert(0, callback);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<F>> {
    self.entries.iter()
  }
}

/// The four chains owned by a job's execution wrapper.
#[derive(Debug, Default, Clone)]
pub(crate) struct Callbacks {
  pub on_success: CallbackChain<OnSuccessFn>,
  pub on_error: CallbackChain<OnErrorFn>,
  pub on_finalize: CallbackChain<OnFinalizeFn>,
  pub on_status_change: CallbackChain<OnStatusChangeFn>,
}

/// Invokes `f`, logging instead of unwinding if the callback panics.
/// Returns `false` when the callback panicked.
pub(crate) fn contain<R>(job: &Job, chain: &'static str, f: impl FnOnce() -> R) -> bool {
  match catch_unwind(AssertUnwindSafe(f)) {
    Ok(_) => true,
    Err(payload) => {
      error!(
        job_id = ?job.id(),
        chain,
        panic = %panic_message(payload.as_ref()),
        "Callback panicked; continuing with the rest of the chain."
      );
      false
    }
  }
}

/// Best-effort rendering of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "<non-string panic payload>".to_string()
  }
}
