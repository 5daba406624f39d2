use std::fmt;

/// Lifecycle state of a job.
///
/// ```text
/// CREATED ─┬─────────────────────► INITIALIZED ⇄ WAITING_FOR_RESOURCE
///          └► WAITING_FOR_ID ──────┘      │               │
///                                         └──► RUNNING_ACTION ◄┘
///                                                 │
///                        RUNNING_CALLBACK ◄──────┤
///                              │                  │
///                           FINISHED           FAILED
/// ```
///
/// Any non-terminal state may move to `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobStatus {
  Created,
  WaitingForId,
  Initialized,
  WaitingForResource,
  RunningAction,
  RunningCallback,
  Finished,
  Failed,
  Canceled,
}

impl JobStatus {
  /// Submitted (or about to be) but not yet running.
  pub fn is_pending(self) -> bool {
    self == JobStatus::WaitingForId || self.is_pending_and_ready()
  }

  /// Visible to the admission pass.
  pub fn is_pending_and_ready(self) -> bool {
    matches!(self, JobStatus::Initialized | JobStatus::WaitingForResource)
  }

  pub fn is_waiting_for_id(self) -> bool {
    self == JobStatus::WaitingForId
  }

  pub fn is_running(self) -> bool {
    matches!(self, JobStatus::RunningAction | JobStatus::RunningCallback)
  }

  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      JobStatus::Finished | JobStatus::Failed | JobStatus::Canceled
    )
  }

  /// Whether the state machine allows moving from `self` to `next`.
  ///
  /// Setting the same status again is not a transition and returns `false`.
  pub fn can_transition_to(self, next: JobStatus) -> bool {
    use JobStatus::*;
    if self == next || self.is_terminal() {
      return false;
    }
    match (self, next) {
      (_, Canceled) => true,
      (Created, WaitingForId) | (Created, Initialized) => true,
      (WaitingForId, Initialized) => true,
      (Initialized, WaitingForResource) | (WaitingForResource, Initialized) => true,
      (Initialized, RunningAction) | (WaitingForResource, RunningAction) => true,
      // `Job::start` may run a job that was never submitted.
      (Created, RunningAction) => true,
      (RunningAction, RunningCallback) | (RunningAction, Failed) => true,
      (RunningCallback, Finished) => true,
      _ => false,
    }
  }

  /// Storage partition for a job in this state. Jobs that are not yet
  /// submitted, or still waiting for an identifier, are not storable.
  pub fn category(self) -> Option<JobCategory> {
    match self {
      JobStatus::Created | JobStatus::WaitingForId => None,
      JobStatus::Initialized | JobStatus::WaitingForResource => Some(JobCategory::Pending),
      JobStatus::RunningAction | JobStatus::RunningCallback => Some(JobCategory::Running),
      JobStatus::Finished | JobStatus::Failed | JobStatus::Canceled => Some(JobCategory::Finished),
    }
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      JobStatus::Created => "CREATED",
      JobStatus::WaitingForId => "WAITING_FOR_ID",
      JobStatus::Initialized => "INITIALIZED",
      JobStatus::WaitingForResource => "WAITING_FOR_RESOURCE",
      JobStatus::RunningAction => "RUNNING_ACTION",
      JobStatus::RunningCallback => "RUNNING_CALLBACK",
      JobStatus::Finished => "FINISHED",
      JobStatus::Failed => "FAILED",
      JobStatus::Canceled => "CANCELED",
    };
    f.write_str(name)
  }
}

/// The partition a stored job currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobCategory {
  Pending,
  Running,
  Finished,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_states_never_transition() {
    for terminal in [JobStatus::Finished, JobStatus::Failed, JobStatus::Canceled] {
      assert!(!terminal.can_transition_to(JobStatus::Canceled));
      assert!(!terminal.can_transition_to(JobStatus::Initialized));
    }
  }

  #[test]
  fn same_status_is_not_a_transition() {
    assert!(!JobStatus::Initialized.can_transition_to(JobStatus::Initialized));
  }

  #[test]
  fn failure_skips_callback_phase() {
    assert!(JobStatus::RunningAction.can_transition_to(JobStatus::Failed));
    assert!(!JobStatus::RunningCallback.can_transition_to(JobStatus::Failed));
    assert!(!JobStatus::RunningAction.can_transition_to(JobStatus::Finished));
  }

  #[test]
  fn waiting_for_id_only_leads_to_initialized() {
    assert!(JobStatus::WaitingForId.can_transition_to(JobStatus::Initialized));
    assert!(!JobStatus::WaitingForId.can_transition_to(JobStatus::RunningAction));
    assert!(JobStatus::WaitingForId.can_transition_to(JobStatus::Canceled));
  }

  #[test]
  fn categories_follow_status() {
    assert_eq!(JobStatus::WaitingForId.category(), None);
    assert_eq!(JobStatus::WaitingForResource.category(), Some(JobCategory::Pending));
    assert_eq!(JobStatus::RunningCallback.category(), Some(JobCategory::Running));
    assert_eq!(JobStatus::Canceled.category(), Some(JobCategory::Finished));
  }
}
