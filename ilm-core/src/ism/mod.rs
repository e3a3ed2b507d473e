mod decision;

use std::sync::Arc;

use backoff::ExponentialBackoff;
use model::{
  ActionMetaData, JobConfig, JobInfo, JobMetadata, Policy, PolicyActionConfig,
  PolicyState, StateMetaData, StepMetaData, StepStatus, Timestamp,
};
use store::MetadataStore;
use tracing::instrument;

use crate::{
  cluster::ClusterStateView,
  error::ControllerError,
  registry::PolicyRegistry,
  step::{Action, ActionCatalog, Step, StepContext},
};

use self::decision::decide_initial_metadata;

/// ISM Runner (component F): the per-tick orchestrator for managed-index
/// jobs. Built once with its collaborators as `Arc`s and handed to the
/// external scheduler — no process-wide singleton, no mutation after
/// construction (`spec.md` §9 redesign note).
pub struct IsmRunner {
  store: Arc<dyn MetadataStore>,
  cluster: Arc<dyn ClusterStateView>,
  catalog: Arc<dyn ActionCatalog>,
  registry: PolicyRegistry,
  backoff: ExponentialBackoff,
}

struct ResolvedStep {
  state_name: String,
  action_name: String,
  action: Arc<dyn Action>,
  step: Arc<dyn Step>,
}

impl IsmRunner {
  pub fn new(
    store: Arc<dyn MetadataStore>,
    cluster: Arc<dyn ClusterStateView>,
    catalog: Arc<dyn ActionCatalog>,
  ) -> Self {
    Self {
      registry: PolicyRegistry::new(store.clone()),
      store,
      cluster,
      catalog,
      backoff: backoff::DEFAULT,
    }
  }

  pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
    self.backoff = backoff;
    self
  }

  /// Scheduler entry point: run one tick for `job_id`. A missing job
  /// config is not an error — the job may have been deleted by the user
  /// between schedule registration and this tick.
  #[instrument(skip(self), fields(job_id))]
  pub async fn tick(
    &self,
    job_id: &str,
    now_ms: Timestamp,
  ) -> Result<(), ControllerError> {
    let Some(cfg) = self.store.get_job_config(job_id).await? else {
      tracing::info!("job config for {job_id} no longer exists, skipping");
      return Ok(());
    };
    if !cfg.enabled {
      return Ok(());
    }

    // 1. Resolve index.
    if self.cluster.index(&cfg.index_name).is_none() {
      tracing::info!(
        "index {} for job {job_id} no longer exists, nothing to do",
        cfg.index_name
      );
      return Ok(());
    }

    let existing_meta = self.store.get_job_metadata(job_id).await?;

    // 2. Initialise if needed.
    if cfg.policy.is_none() || existing_meta.is_none() {
      return self.init_managed_index(&cfg, existing_meta, now_ms).await;
    }
    let mut metadata = existing_meta.expect("checked above");

    // 3. Self-heal policy-id setting. Best-effort: logged, never blocks.
    if let Some(index) = self.cluster.index(&cfg.index_name) {
      let current_setting = index.settings.get("policy_id").map(String::as_str);
      if current_setting != Some(cfg.policy_id.as_str()) {
        if let Err(e) = self
          .store
          .update_index_setting(&cfg.index_name, "policy_id", &cfg.policy_id)
          .await
        {
          tracing::warn!("self-heal of policy_id setting failed: {e}");
        }
      }
    }

    // 4. Change-policy gate.
    if should_change_policy(&cfg, &metadata) {
      return self.init_change_policy(&cfg, &metadata, now_ms).await;
    }

    // 5. Terminal gate.
    if metadata.policy_completed || is_failed(&metadata) {
      return self.disable_managed_index_config(&cfg).await;
    }

    let policy = cfg.policy.as_ref().expect("checked above");
    let resolved = resolve_step(policy, &metadata, self.catalog.as_ref());

    // 6. Backoff gate — only evaluated when an action was actually
    // resolved this tick. When resolution itself fails (terminal error
    // path below), backoff is skipped entirely; this is the observed
    // behaviour called out as an open question in `spec.md` §9.
    if let (Some(resolved), Some(action_meta)) = (&resolved, &metadata.action) {
      let (should_wait, remaining_ms) =
        resolved.action.should_backoff(action_meta, &self.backoff, now_ms);
      if should_wait {
        tracing::info!(
          "job {job_id} backing off action {}, {remaining_ms:?}ms remaining",
          resolved.action_name
        );
        return Ok(());
      }
    }

    // 7. Starting-state recovery (invariant 4).
    if matches!(metadata.step.as_ref().map(|s| s.status), Some(StepStatus::Starting)) {
      metadata.policy_retry_info.failed = true;
      metadata.policy_retry_info.consumed_retries = 0;
      self.store.put_job_metadata(&metadata).await?;
      return Ok(());
    }

    // 8. Advance.
    let Some(resolved) = resolved else {
      let error_meta = build_error_metadata(
        &metadata,
        format!("No state/action/step available to execute for policy {}", policy.id),
      );
      self.store.put_job_metadata(&error_meta).await?;
      return Ok(());
    };

    let starting = build_starting_metadata(&metadata, &resolved, now_ms);
    let persisted_starting = self.store.put_job_metadata(&starting).await?;

    let ctx =
      StepContext { job_id: job_id.to_string(), index_name: cfg.index_name.clone(), now_ms };
    let result = resolved.step.execute(&ctx).await;

    if resolved.step.is_successful_delete(&result) {
      // Invariant 5: no post-execute metadata write against a removed index.
      return Ok(());
    }

    let executed = resolved.step.get_updated_managed_index_metadata(
      &persisted_starting,
      now_ms,
      &result,
    );
    self.store.put_job_metadata(&executed).await?;
    Ok(())
  }

  async fn init_managed_index(
    &self,
    cfg: &JobConfig,
    existing_meta: Option<JobMetadata>,
    now_ms: Timestamp,
  ) -> Result<(), ControllerError> {
    let policy_id = cfg
      .change_policy
      .as_ref()
      .map(|cp| cp.policy_id.clone())
      .unwrap_or_else(|| cfg.policy_id.clone());

    let policy = self.registry.resolve(&policy_id).await?;

    if let (Some(policy), true) = (&policy, cfg.policy.is_none()) {
      let mut new_cfg = cfg.clone();
      new_cfg.policy = Some(policy.clone());
      if self.put_job_config_with_retry(&new_cfg).await.is_err() {
        // Abort tick: no metadata write against an unpersisted config.
        return Ok(());
      }
    }

    let metadata = decide_initial_metadata(existing_meta, policy.as_ref(), &cfg.id, &policy_id, now_ms);
    self.store.put_job_metadata(&metadata).await?;
    Ok(())
  }

  async fn init_change_policy(
    &self,
    cfg: &JobConfig,
    metadata: &JobMetadata,
    now_ms: Timestamp,
  ) -> Result<(), ControllerError> {
    let change = cfg
      .change_policy
      .clone()
      .ok_or_else(|| ControllerError::InvariantViolation("change_policy gate fired without a pending request".into()))?;

    let policy = self
      .registry
      .resolve(&change.policy_id)
      .await?
      .ok_or_else(|| ControllerError::Semantic(format!("unknown policy id: {}", change.policy_id)))?;

    let mut new_meta = metadata.clone();
    new_meta.policy_seq_no = Some(policy.handle.seq_no);
    new_meta.policy_primary_term = Some(policy.handle.primary_term);
    new_meta.transition_to =
      Some(change.state.clone().unwrap_or_else(|| policy.default_state.clone()));
    new_meta.step = None;
    new_meta.policy_completed = false;
    new_meta.info = JobInfo::new(format!("Attempting to change policy to {}", change.policy_id));

    // Step 2: JobMetadata first. If this fails, the next tick retries from
    // scratch with the original config — no JobConfig write is attempted.
    self.store.put_job_metadata(&new_meta).await?;

    // Step 3: only now swap the embedded policy and clear change_policy.
    let mut new_cfg = cfg.clone();
    new_cfg.policy = Some(policy.clone());
    new_cfg.policy_id = change.policy_id.clone();
    new_cfg.change_policy = None;
    if self.put_job_config_with_retry(&new_cfg).await.is_err() {
      // Step 3 failed: invariant 2's self-heal reconverges on a later tick.
      tracing::warn!("change-policy config swap failed for job {}, self-heal will retry", cfg.id);
    } else {
      // Step 4: best-effort index setting update.
      if let Err(e) = self
        .store
        .update_index_setting(&cfg.index_name, "policy_id", &change.policy_id)
        .await
      {
        tracing::warn!("self-heal of policy_id setting failed during change-policy: {e}");
      }
    }
    Ok(())
  }

  async fn disable_managed_index_config(
    &self,
    cfg: &JobConfig,
  ) -> Result<(), ControllerError> {
    if !cfg.enabled {
      return Ok(());
    }
    let mut disabled = cfg.clone();
    disabled.enabled = false;
    self.put_job_config_with_retry(&disabled).await?;
    Ok(())
  }

  async fn put_job_config_with_retry(
    &self,
    cfg: &JobConfig,
  ) -> Result<JobConfig, ControllerError> {
    backoff::retry(&self.backoff, || self.store.put_job_config(cfg))
      .await
      .map_err(ControllerError::from)
  }
}

fn is_failed(meta: &JobMetadata) -> bool {
  meta.policy_retry_info.failed || meta.action.as_ref().is_some_and(|a| a.failed)
}

fn should_change_policy(cfg: &JobConfig, meta: &JobMetadata) -> bool {
  let step_completed_or_absent = match &meta.step {
    Some(s) => matches!(s.status, StepStatus::Completed),
    None => true,
  };
  cfg.change_policy.is_some() && step_completed_or_absent
}

fn resolve_step(
  policy: &Policy,
  metadata: &JobMetadata,
  catalog: &dyn ActionCatalog,
) -> Option<ResolvedStep> {
  let state = resolve_state(policy, metadata)?;
  resolve_action_and_step(state, metadata, catalog)
}

fn resolve_state<'p>(
  policy: &'p Policy,
  metadata: &JobMetadata,
) -> Option<&'p PolicyState> {
  let name = metadata
    .transition_to
    .clone()
    .or_else(|| metadata.state.as_ref().map(|s| s.name.clone()))
    .unwrap_or_else(|| policy.default_state.clone());
  policy.state(&name)
}

/// Tie-break rule: the first action in declared order whose resolved
/// implementation still has a step to run wins.
fn resolve_action_and_step(
  state: &PolicyState,
  metadata: &JobMetadata,
  catalog: &dyn ActionCatalog,
) -> Option<ResolvedStep> {
  for action_cfg in &state.actions {
    let PolicyActionConfig { name, .. } = action_cfg;
    if let Some(action) = catalog.resolve(name) {
      if let Some(step) = action.get_step_to_execute(metadata) {
        return Some(ResolvedStep {
          state_name: state.name.clone(),
          action_name: name.clone(),
          action,
          step,
        });
      }
    }
  }
  None
}

fn build_starting_metadata(
  current: &JobMetadata,
  resolved: &ResolvedStep,
  now_ms: Timestamp,
) -> JobMetadata {
  let mut next = current.clone();

  let state_continues = current.state.as_ref().is_some_and(|s| s.name == resolved.state_name);
  next.state = Some(StateMetaData {
    name: resolved.state_name.clone(),
    start_time: if state_continues {
      current.state.as_ref().unwrap().start_time
    } else {
      now_ms
    },
  });

  let action_continues = current.action.as_ref().is_some_and(|a| a.name == resolved.action_name);
  next.action = Some(ActionMetaData {
    name: resolved.action_name.clone(),
    start_time: if action_continues {
      current.action.as_ref().unwrap().start_time
    } else {
      now_ms
    },
    index: current.action.as_ref().map(|a| a.index).unwrap_or(0),
    failed: false,
    consumed_retries: if action_continues {
      current.action.as_ref().unwrap().consumed_retries
    } else {
      0
    },
  });

  next.step = Some(StepMetaData {
    name: resolved.step.name().to_string(),
    start_time: now_ms,
    status: StepStatus::Starting,
  });

  next
}

fn build_error_metadata(current: &JobMetadata, message: String) -> JobMetadata {
  let mut next = current.clone();
  next.policy_retry_info.failed = true;
  next.info = JobInfo::new(message);
  next
}
