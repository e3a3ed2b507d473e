use std::sync::Arc;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use model::{ActionMetaData, JobMetadata, Timestamp};

/// The side effect a step performs, against the one index it targets.
/// Real action implementations (open/close/rollover/delete/…) are the
/// out-of-scope action catalog (`spec.md` §1); this crate only consumes
/// them through this contract.
pub struct StepContext {
  pub job_id: String,
  pub index_name: String,
  pub now_ms: Timestamp,
}

/// The smallest executable unit. `execute` may suspend (it performs the
/// real side effect); `get_updated_managed_index_metadata` is pure and
/// just folds the outcome into a new `JobMetadata`.
#[async_trait]
pub trait Step: Send + Sync {
  fn name(&self) -> &str;

  async fn execute(&self, ctx: &StepContext) -> anyhow::Result<()>;

  fn get_updated_managed_index_metadata(
    &self,
    current: &JobMetadata,
    now_ms: Timestamp,
    result: &anyhow::Result<()>,
  ) -> JobMetadata;

  /// Whether a successful run of this step terminates the metadata
  /// lineage (invariant 5: a successful delete issues no further
  /// metadata write, since the target index no longer exists).
  fn is_successful_delete(&self, _result: &anyhow::Result<()>) -> bool {
    false
  }
}

/// A capability set, not a base class: one implementation per action kind
/// (open/close/rollover/…), resolved by name out of the policy's action
/// config.
pub trait Action: Send + Sync {
  fn name(&self) -> &str;

  /// The step to run next given the current metadata, or `None` once the
  /// action has nothing left to do this tick and its preconditions no
  /// longer hold — in which case the caller moves on to the next action
  /// in declared order.
  fn get_step_to_execute(&self, meta: &JobMetadata) -> Option<Arc<dyn Step>>;

  /// Per `spec.md` §9 open question: this is evaluated by the runner only
  /// when an action was actually resolved for this tick; when state/action
  /// resolution itself fails (terminal error path), backoff is skipped
  /// entirely rather than calling this with synthetic input.
  fn should_backoff(
    &self,
    action_meta: &ActionMetaData,
    retry_cfg: &ExponentialBackoff,
    now_ms: Timestamp,
  ) -> (bool, Option<i64>) {
    retry_cfg.should_backoff(
      action_meta.consumed_retries,
      action_meta.start_time,
      now_ms,
    )
  }
}

/// Resolves a policy's declared action name to the behaviour behind it.
/// Declared order in `PolicyState::actions` is the tie-break rule: the
/// first action whose resolved step is non-`None` wins.
pub trait ActionCatalog: Send + Sync {
  fn resolve(&self, action_name: &str) -> Option<Arc<dyn Action>>;
}
