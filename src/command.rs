/// Numeric identifier of an executor, used for logging and tracing spans.
pub type WorkerId = usize;

/// Requested queue shutdown mode, broadcast over a `watch` channel.
/// `None` on the channel means the queue accepts work normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Admit nothing new from callers; in-flight jobs and the resource chains
  /// they unblock still run to completion.
  Graceful,
  /// Abort in-flight actions, cancel running jobs and admit nothing.
  Force,
}

/// Who is running an admission pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchContext {
  /// `submit`, `start`, identifier assignment, cancellation or a timeout.
  Caller,
  /// An executor that has just completed a job and may run the next one inline.
  Worker(WorkerId),
}

impl DispatchContext {
  pub fn is_worker(self) -> bool {
    matches!(self, DispatchContext::Worker(_))
  }
}
