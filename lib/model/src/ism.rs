use bson::Document;
use serde::{Deserialize, Serialize};

use crate::common::{JobInfo, SeqNoPrimaryTerm, Timestamp};

/// A named action inside a state, declared in policy order. Declared order
/// is the tie-break rule when more than one action's preconditions hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyActionConfig {
  pub name: String,
  #[serde(default)]
  pub config: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyState {
  pub name: String,
  pub actions: Vec<PolicyActionConfig>,
  /// States this state may transition into. Empty means terminal.
  #[serde(default)]
  pub transitions: Vec<String>,
}

/// A policy: a named state machine of states -> actions -> steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
  pub id: String,
  pub default_state: String,
  pub states: Vec<PolicyState>,
  #[serde(flatten)]
  pub handle: SeqNoPrimaryTerm,
}

impl Policy {
  pub fn state(&self, name: &str) -> Option<&PolicyState> {
    self.states.iter().find(|s| s.name == name)
  }
}

/// A pending request to move a managed index onto a different policy,
/// optionally jumping straight to a named state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePolicyRequest {
  pub policy_id: String,
  pub state: Option<String>,
}

/// Source of truth for *what* an ISM job should do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
  pub id: String,
  pub index_name: String,
  pub index_uuid: String,
  pub policy_id: String,
  pub policy: Option<Policy>,
  pub change_policy: Option<ChangePolicyRequest>,
  pub enabled: bool,
  pub job_enabled_time: Timestamp,
  pub schedule_interval_ms: u64,
  #[serde(flatten)]
  pub handle: SeqNoPrimaryTerm,
}

impl JobConfig {
  pub fn new(
    id: impl Into<String>,
    index_name: impl Into<String>,
    index_uuid: impl Into<String>,
    policy_id: impl Into<String>,
    now: Timestamp,
    schedule_interval_ms: u64,
  ) -> Self {
    Self {
      id: id.into(),
      index_name: index_name.into(),
      index_uuid: index_uuid.into(),
      policy_id: policy_id.into(),
      policy: None,
      change_policy: None,
      enabled: true,
      job_enabled_time: now,
      schedule_interval_ms,
      handle: SeqNoPrimaryTerm::unset(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
  Starting,
  Completed,
  Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetaData {
  pub name: String,
  pub start_time: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMetaData {
  pub name: String,
  pub start_time: Timestamp,
  pub index: u32,
  pub failed: bool,
  pub consumed_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetaData {
  pub name: String,
  pub start_time: Timestamp,
  pub status: StepStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRetryInfo {
  pub failed: bool,
  pub consumed_retries: u32,
}

/// Source of truth for *where a managed index is* in its policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
  pub job_id: String,
  pub state: Option<StateMetaData>,
  pub action: Option<ActionMetaData>,
  pub step: Option<StepMetaData>,
  pub policy_retry_info: PolicyRetryInfo,
  pub policy_completed: bool,
  pub transition_to: Option<String>,
  pub info: JobInfo,
  /// seq_no/primary_term of the `Policy` this metadata was bound against,
  /// not of this metadata document itself (see `handle` for that).
  pub policy_seq_no: Option<u64>,
  pub policy_primary_term: Option<u64>,
  pub rolled_over: bool,
  pub was_read_only: bool,
  #[serde(flatten)]
  pub handle: SeqNoPrimaryTerm,
}

impl JobMetadata {
  pub fn fresh(job_id: impl Into<String>) -> Self {
    Self {
      job_id: job_id.into(),
      state: None,
      action: None,
      step: None,
      policy_retry_info: PolicyRetryInfo::default(),
      policy_completed: false,
      transition_to: None,
      info: JobInfo::default(),
      policy_seq_no: None,
      policy_primary_term: None,
      rolled_over: false,
      was_read_only: false,
      handle: SeqNoPrimaryTerm::unset(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn job_metadata_round_trips_through_bson() {
    let mut meta = JobMetadata::fresh("job-1");
    meta.state = Some(StateMetaData { name: "warm".into(), start_time: 10 });
    meta.action = Some(ActionMetaData {
      name: "rollover".into(),
      start_time: 20,
      index: 2,
      failed: true,
      consumed_retries: 1,
    });
    meta.step = Some(StepMetaData { name: "attempt_rollover".into(), start_time: 30, status: StepStatus::Failed });
    meta.policy_retry_info = PolicyRetryInfo { failed: true, consumed_retries: 2 };
    meta.transition_to = Some("cold".into());
    meta.info = JobInfo::new("rolled over due to size");
    meta.policy_seq_no = Some(3);
    meta.policy_primary_term = Some(1);
    meta.rolled_over = true;
    meta.was_read_only = true;
    meta.handle = SeqNoPrimaryTerm::new(4, 1);

    let document = bson::to_document(&meta).expect("serialise");
    let round_tripped: JobMetadata = bson::from_document(document).expect("deserialise");

    assert_eq!(round_tripped.job_id, meta.job_id);
    assert_eq!(round_tripped.state.unwrap().name, "warm");
    let action = round_tripped.action.unwrap();
    assert_eq!(action.name, "rollover");
    assert_eq!(action.index, 2);
    assert!(action.failed);
    assert_eq!(action.consumed_retries, 1);
    let step = round_tripped.step.unwrap();
    assert_eq!(step.name, "attempt_rollover");
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(round_tripped.policy_retry_info.failed, meta.policy_retry_info.failed);
    assert_eq!(round_tripped.policy_retry_info.consumed_retries, meta.policy_retry_info.consumed_retries);
    assert_eq!(round_tripped.transition_to, meta.transition_to);
    assert_eq!(round_tripped.info.message, meta.info.message);
    assert_eq!(round_tripped.policy_seq_no, meta.policy_seq_no);
    assert_eq!(round_tripped.policy_primary_term, meta.policy_primary_term);
    assert_eq!(round_tripped.rolled_over, meta.rolled_over);
    assert_eq!(round_tripped.was_read_only, meta.was_read_only);
    assert_eq!(round_tripped.handle, meta.handle);
  }
}
