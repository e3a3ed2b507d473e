use model::{JobInfo, JobMetadata, Policy, PolicyRetryInfo, StateMetaData, Timestamp};

/// Initial-metadata decision table from `spec.md` §4.F. Pure so the five
/// rows are each independently testable without a store.
pub fn decide_initial_metadata(
  existing: Option<JobMetadata>,
  policy: Option<&Policy>,
  job_id: &str,
  policy_id: &str,
  now_ms: Timestamp,
) -> JobMetadata {
  match (existing, policy) {
    // No existing metadata.
    (None, policy) => {
      let mut meta = JobMetadata::fresh(job_id);
      meta.policy_retry_info = PolicyRetryInfo { failed: policy.is_none(), consumed_retries: 0 };
      match policy {
        Some(policy) => {
          meta.state = Some(StateMetaData { name: policy.default_state.clone(), start_time: now_ms });
          meta.policy_seq_no = Some(policy.handle.seq_no);
          meta.policy_primary_term = Some(policy.handle.primary_term);
          meta.info = JobInfo::new(format!("Successfully initialized policy: {policy_id}"));
        }
        None => {
          meta.info = JobInfo::new(format!("Fail to load policy: {policy_id}"));
        }
      }
      meta
    }

    // Policy could not be loaded: preserve existing fields, mark retry-failed.
    (Some(mut existing), None) => {
      existing.policy_retry_info = PolicyRetryInfo {
        failed: true,
        consumed_retries: existing.policy_retry_info.consumed_retries,
      };
      existing.info = JobInfo::new(format!("Fail to load policy: {policy_id}"));
      existing
    }

    // Existing seq/term null: first bind.
    (Some(mut existing), Some(policy))
      if existing.policy_seq_no.is_none() || existing.policy_primary_term.is_none() =>
    {
      existing.policy_seq_no = Some(policy.handle.seq_no);
      existing.policy_primary_term = Some(policy.handle.primary_term);
      if existing.state.is_none() {
        existing.state = Some(StateMetaData { name: policy.default_state.clone(), start_time: now_ms });
      }
      existing.policy_retry_info = PolicyRetryInfo { failed: false, consumed_retries: 0 };
      existing.info = JobInfo::new(format!("Successfully initialized policy: {policy_id}"));
      existing
    }

    // Existing seq/term equal policy's: no-op success.
    (Some(existing), Some(policy))
      if existing.policy_seq_no == Some(policy.handle.seq_no)
        && existing.policy_primary_term == Some(policy.handle.primary_term) =>
    {
      existing
    }

    // Existing seq/term differ from policy's: invariant 3, mark retry-failed.
    (Some(mut existing), Some(_policy)) => {
      existing.policy_retry_info = PolicyRetryInfo {
        failed: true,
        consumed_retries: existing.policy_retry_info.consumed_retries,
      };
      existing.info = JobInfo::new(format!(
        "Fail to load policy: {policy_id} | stored policy identifiers diverged from the embedded policy"
      ));
      existing
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use model::{PolicyState, SeqNoPrimaryTerm};

  fn policy(seq_no: u64, primary_term: u64) -> Policy {
    Policy {
      id: "p1".into(),
      default_state: "ingest".into(),
      states: vec![PolicyState { name: "ingest".into(), actions: vec![], transitions: vec![] }],
      handle: SeqNoPrimaryTerm::new(seq_no, primary_term),
    }
  }

  #[test]
  fn fresh_initialization_s1() {
    let meta = decide_initial_metadata(None, Some(&policy(7, 2)), "job-1", "p1", 1_000);
    assert_eq!(meta.state.unwrap().name, "ingest");
    assert!(!meta.policy_retry_info.failed);
    assert_eq!(meta.info.message, "Successfully initialized policy: p1");
    assert_eq!(meta.policy_seq_no, Some(7));
    assert_eq!(meta.policy_primary_term, Some(2));
  }

  #[test]
  fn divergent_policy_s2() {
    let mut existing = JobMetadata::fresh("job-1");
    existing.policy_seq_no = Some(5);
    existing.policy_primary_term = Some(1);
    let meta = decide_initial_metadata(Some(existing), Some(&policy(7, 2)), "job-1", "p1", 1_000);
    assert!(meta.policy_retry_info.failed);
    assert!(meta.info.message.starts_with("Fail to load policy"));
  }

  #[test]
  fn policy_unresolvable_preserves_existing() {
    let mut existing = JobMetadata::fresh("job-1");
    existing.rolled_over = true;
    let meta = decide_initial_metadata(Some(existing), None, "job-1", "p1", 1_000);
    assert!(meta.policy_retry_info.failed);
    assert!(meta.rolled_over);
  }

  #[test]
  fn matching_handles_is_a_no_op() {
    let mut existing = JobMetadata::fresh("job-1");
    existing.policy_seq_no = Some(7);
    existing.policy_primary_term = Some(2);
    existing.info = JobInfo::new("unchanged");
    let meta = decide_initial_metadata(Some(existing), Some(&policy(7, 2)), "job-1", "p1", 1_000);
    assert_eq!(meta.info.message, "unchanged");
    assert!(!meta.policy_retry_info.failed);
  }
}
