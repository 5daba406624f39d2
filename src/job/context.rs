use super::JobId;

/// Information about the job whose action is currently executing.
///
/// Available inside an action through [`try_get_current_job_context`] or the
/// `job_context!()` macro when the `job_context` feature is enabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobContext {
  /// `None` only for a job started directly, outside any queue, without an ID.
  pub job_id: Option<JobId>,
  pub resource_key: Option<String>,
  pub description: Option<String>,
}

tokio::task_local! {
    /// Set by the execution wrapper around every action it drives.
    pub static CURRENT_JOB_CONTEXT: JobContext;
}

/// Returns the context of the executing job, or `None` outside an action.
pub fn try_get_current_job_context() -> Option<JobContext> {
  CURRENT_JOB_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Retrieves the current `JobContext`.
///
/// # Panics
/// Panics when called outside a job action.
#[macro_export]
macro_rules! job_context {
  () => {
    $crate::job::context::CURRENT_JOB_CONTEXT.with(|ctx| ctx.clone())
  };
}
