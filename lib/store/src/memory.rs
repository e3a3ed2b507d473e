use std::collections::HashMap;

use async_trait::async_trait;
use model::{
  JobConfig, JobMetadata, Policy, RollupJobConfig, RollupMetadata,
  SeqNoPrimaryTerm,
};
use tokio::sync::Mutex;

use crate::{error::StoreError, MetadataStore, StoreResult};

/// In-memory `MetadataStore` used by tests and by any caller that wants
/// the controller's decision logic exercised without a live database.
/// Mirrors the CAS semantics of [`crate::MongoStore`] exactly, so tests
/// written against it also hold against the real store.
#[derive(Default)]
pub struct InMemoryStore {
  policies: Mutex<HashMap<String, Policy>>,
  job_configs: Mutex<HashMap<String, JobConfig>>,
  job_metadata: Mutex<HashMap<String, JobMetadata>>,
  rollup_job_configs: Mutex<HashMap<String, RollupJobConfig>>,
  rollup_metadata: Mutex<HashMap<String, RollupMetadata>>,
  index_settings: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn seed_policy(&self, policy: Policy) {
    self.policies.lock().await.insert(policy.id.clone(), policy);
  }

  pub async fn seed_job_config(&self, cfg: JobConfig) {
    self.job_configs.lock().await.insert(cfg.id.clone(), cfg);
  }

  pub async fn seed_job_metadata(&self, meta: JobMetadata) {
    self.job_metadata.lock().await.insert(meta.job_id.clone(), meta);
  }

  pub async fn seed_rollup_job_config(&self, cfg: RollupJobConfig) {
    self.rollup_job_configs.lock().await.insert(cfg.id.clone(), cfg);
  }
}

/// Shared CAS-put logic: accept the write only if the existing entry's
/// handle matches the incoming document's handle (or there is no existing
/// entry and the incoming handle is unset), then bump seq_no.
fn cas_put<T: Clone>(
  map: &mut HashMap<String, T>,
  key: String,
  mut value: T,
  handle_of: impl Fn(&T) -> SeqNoPrimaryTerm,
  set_handle: impl Fn(&mut T, SeqNoPrimaryTerm),
) -> StoreResult<T> {
  let incoming_handle = handle_of(&value);
  match map.get(&key) {
    Some(existing) if handle_of(existing) != incoming_handle => {
      Err(StoreError::CasConflict)
    }
    _ => {
      let new_handle = SeqNoPrimaryTerm::new(incoming_handle.seq_no + 1, 1);
      set_handle(&mut value, new_handle);
      map.insert(key, value.clone());
      Ok(value)
    }
  }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
  async fn get_policy(&self, id: &str) -> StoreResult<Option<Policy>> {
    Ok(self.policies.lock().await.get(id).cloned())
  }

  async fn get_job_config(&self, id: &str) -> StoreResult<Option<JobConfig>> {
    Ok(self.job_configs.lock().await.get(id).cloned())
  }

  async fn get_job_metadata(&self, id: &str) -> StoreResult<Option<JobMetadata>> {
    Ok(self.job_metadata.lock().await.get(id).cloned())
  }

  async fn put_job_config(&self, cfg: &JobConfig) -> StoreResult<JobConfig> {
    let mut map = self.job_configs.lock().await;
    cas_put(
      &mut map,
      cfg.id.clone(),
      cfg.clone(),
      |c| c.handle,
      |c, h| c.handle = h,
    )
  }

  async fn put_job_metadata(&self, meta: &JobMetadata) -> StoreResult<JobMetadata> {
    let mut map = self.job_metadata.lock().await;
    cas_put(
      &mut map,
      meta.job_id.clone(),
      meta.clone(),
      |m| m.handle,
      |m, h| m.handle = h,
    )
  }

  async fn update_index_setting(
    &self,
    index: &str,
    key: &str,
    value: &str,
  ) -> StoreResult<()> {
    self
      .index_settings
      .lock()
      .await
      .insert((index.to_string(), key.to_string()), value.to_string());
    Ok(())
  }

  async fn get_rollup_metadata(&self, id: &str) -> StoreResult<Option<RollupMetadata>> {
    Ok(self.rollup_metadata.lock().await.get(id).cloned())
  }

  async fn put_rollup_metadata(
    &self,
    meta: &RollupMetadata,
  ) -> StoreResult<RollupMetadata> {
    let mut map = self.rollup_metadata.lock().await;
    cas_put(
      &mut map,
      meta.job_id.clone(),
      meta.clone(),
      |m| m.handle,
      |m, h| m.handle = h,
    )
  }

  async fn get_rollup_job_config(
    &self,
    id: &str,
  ) -> StoreResult<Option<RollupJobConfig>> {
    Ok(self.rollup_job_configs.lock().await.get(id).cloned())
  }

  async fn put_rollup_job_config(
    &self,
    cfg: &RollupJobConfig,
  ) -> StoreResult<RollupJobConfig> {
    let mut map = self.rollup_job_configs.lock().await;
    cas_put(
      &mut map,
      cfg.id.clone(),
      cfg.clone(),
      |c| c.handle,
      |c, h| c.handle = h,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn cas_rejects_stale_handle() {
    let store = InMemoryStore::new();
    let mut cfg = JobConfig::new("j1", "idx", "uuid", "p1", 0, 1000);
    let first = store.put_job_config(&cfg).await.unwrap();
    assert_eq!(first.handle.seq_no, 1);

    // Replaying the original (now-stale) handle must be rejected.
    let err = store.put_job_config(&cfg).await.unwrap_err();
    assert!(matches!(err, StoreError::CasConflict));

    // Writing again with the freshest handle succeeds.
    cfg.handle = first.handle;
    let second = store.put_job_config(&cfg).await.unwrap();
    assert_eq!(second.handle.seq_no, 2);
  }
}
