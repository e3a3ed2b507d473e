use std::sync::Arc;

use backoff::ExponentialBackoff;
use lease::LockService;
use model::{RollupMetadata, RollupStatus, Timestamp};
use store::MetadataStore;
use tracing::instrument;

use crate::error::ControllerError;

use super::{
  metadata::{RollupMetadataResult, RollupMetadataService},
  search::RollupSearchService,
};

/// Rollup Runner (component G): the per-tick orchestrator for continuous
/// and one-shot rollup jobs. Mirrors `IsmRunner`'s shape — built once with
/// `Arc` collaborators, no mutable state across ticks — but adds the
/// cluster-wide lease (component A) around the paging loop, since a
/// rollup page that double-applies corrupts the target index in a way a
/// CAS-rejected metadata write alone can't prevent.
pub struct RollupRunner {
  store: Arc<dyn MetadataStore>,
  lock: Arc<dyn LockService>,
  search: Arc<dyn RollupSearchService>,
  metadata: RollupMetadataService,
  backoff: ExponentialBackoff,
  max_page_failures: u32,
}

impl RollupRunner {
  pub fn new(
    store: Arc<dyn MetadataStore>,
    lock: Arc<dyn LockService>,
    search: Arc<dyn RollupSearchService>,
  ) -> Self {
    Self {
      metadata: RollupMetadataService::new(store.clone()),
      store,
      lock,
      search,
      backoff: backoff::DEFAULT,
      max_page_failures: 5,
    }
  }

  pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
    self.backoff = backoff;
    self
  }

  pub fn with_max_page_failures(mut self, max_page_failures: u32) -> Self {
    self.max_page_failures = max_page_failures;
    self
  }

  #[instrument(skip(self), fields(job_id))]
  pub async fn tick(&self, job_id: &str, now_ms: Timestamp) -> Result<(), ControllerError> {
    let Some(cfg) = self.store.get_rollup_job_config(job_id).await? else {
      tracing::info!("rollup job config for {job_id} no longer exists, skipping");
      return Ok(());
    };
    if !cfg.enabled {
      return Ok(());
    }

    let existing_meta = match cfg.metadata_id.as_deref() {
      Some(id) => self.store.get_rollup_metadata(id).await?,
      None => None,
    };

    if !self.search.should_process(&cfg, existing_meta.as_ref(), now_ms) {
      return Ok(());
    }

    // Acquire lease with backoff-driven retry; giving up for this tick is
    // not an error, just deferred work.
    let mut lease = None;
    for attempt in 0..self.backoff.max_attempts {
      if attempt > 0 {
        tokio::time::sleep(self.backoff.delay_for(attempt - 1)).await;
      }
      match self.lock.acquire(job_id).await {
        Ok(Some(l)) => {
          lease = Some(l);
          break;
        }
        Ok(None) => continue,
        Err(e) => return Err(ControllerError::Transient(e)),
      }
    }
    let Some(lease) = lease else {
      tracing::info!("could not acquire lease for rollup job {job_id}, deferring");
      return Ok(());
    };

    let result = self.run_rollup_job(job_id, &cfg, existing_meta, now_ms).await;
    if let Err(e) = self.lock.release(lease).await {
      tracing::warn!("failed to release lease for rollup job {job_id}: {e}");
    }
    result
  }

  async fn run_rollup_job(
    &self,
    job_id: &str,
    cfg: &model::RollupJobConfig,
    existing_meta: Option<RollupMetadata>,
    now_ms: Timestamp,
  ) -> Result<(), ControllerError> {
    let had_existing_metadata = existing_meta.is_some();

    let mut meta = match self.metadata.init(job_id, cfg.metadata_id.as_deref(), now_ms).await {
      RollupMetadataResult::Success(meta) => meta,
      RollupMetadataResult::NoMetadata => return Ok(()),
      RollupMetadataResult::Failure(msg) => {
        return Err(ControllerError::Fatal(anyhow::anyhow!(msg)));
      }
    };

    if cfg.metadata_id.is_none() {
      let mut new_cfg = cfg.clone();
      new_cfg.metadata_id = Some(meta.job_id.clone());
      backoff::retry(&self.backoff, || self.store.put_rollup_job_config(&new_cfg))
        .await
        .map_err(ControllerError::from)?;
    }

    if meta.status == RollupStatus::Failed {
      return self.disable_job(cfg).await;
    }

    if !self.search.source_index_exists(&cfg.spec.source_index) {
      return self
        .fail_and_disable(cfg, Some(meta), "source index does not exist".into())
        .await;
    }
    if had_existing_metadata && !self.search.target_index_valid(&cfg.spec.target_index, job_id) {
      return self
        .fail_and_disable(cfg, Some(meta), "target index is not a valid rollup index".into())
        .await;
    }

    if let Err(e) = self.search.init_target_mapping(&cfg.spec.target_index).await {
      return self
        .fail_and_disable(cfg, Some(meta), format!("failed to initialise target mapping: {e:#}"))
        .await;
    }

    if meta.status == RollupStatus::Init {
      meta.status = RollupStatus::Started;
    }

    loop {
      let page = match self.search.search_page(&cfg.spec, meta.after_key.as_ref()).await {
        Ok(page) => page,
        Err(e) => {
          meta.consecutive_page_failures += 1;
          tracing::warn!(
            "rollup job {job_id} page failed ({}/{}): {e:#}",
            meta.consecutive_page_failures,
            self.max_page_failures
          );
          if meta.consecutive_page_failures >= self.max_page_failures {
            self
              .metadata
              .set_failed(&meta, format!("exceeded max page failures: {e:#}"), &self.backoff)
              .await?;
            return self.disable_job(cfg).await;
          }
          meta = self.persist_progress(meta).await?;
          continue;
        }
      };

      let indexed = self
        .search
        .index_documents(&cfg.spec.target_index, page.summary_documents)
        .await
        .map_err(|e| ControllerError::Transient(e))?;

      meta.stats.merge_page(page.documents_processed, indexed);
      meta.after_key = page.after_key.clone();
      meta.consecutive_page_failures = 0;
      meta = self.persist_progress(meta).await?;

      if page.after_key.is_none() {
        break;
      }
    }

    if !cfg.spec.continuous {
      meta.status = RollupStatus::Finished;
      meta = self.persist_progress(meta).await?;
      self.disable_job(cfg).await?;
    } else {
      meta.status = RollupStatus::Started;
      self.persist_progress(meta).await?;
    }
    Ok(())
  }

  async fn persist_progress(&self, meta: RollupMetadata) -> Result<RollupMetadata, ControllerError> {
    match self.metadata.update(&meta).await {
      RollupMetadataResult::Success(updated) => Ok(updated),
      RollupMetadataResult::NoMetadata => {
        Err(ControllerError::InvariantViolation(
          "rollup metadata disappeared mid-tick".into(),
        ))
      }
      RollupMetadataResult::Failure(msg) => Err(ControllerError::Transient(anyhow::anyhow!(msg))),
    }
  }

  async fn fail_and_disable(
    &self,
    cfg: &model::RollupJobConfig,
    meta: Option<RollupMetadata>,
    reason: String,
  ) -> Result<(), ControllerError> {
    if let Some(meta) = meta {
      self.metadata.set_failed(&meta, reason, &self.backoff).await?;
    } else {
      tracing::warn!("rollup job {} failing before any metadata existed: {reason}", cfg.id);
    }
    self.disable_job(cfg).await
  }

  async fn disable_job(&self, cfg: &model::RollupJobConfig) -> Result<(), ControllerError> {
    if !cfg.enabled {
      return Ok(());
    }
    let mut disabled = cfg.clone();
    disabled.enabled = false;
    backoff::retry(&self.backoff, || self.store.put_rollup_job_config(&disabled))
      .await
      .map_err(ControllerError::from)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bson::doc;
  use lease::InMemoryLockService;
  use model::{RollupJobConfig, RollupSpec};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex as StdMutex;
  use store::InMemoryStore;

  struct FakeSearch {
    pages: StdMutex<Vec<super::super::search::CompositePage>>,
    source_exists: bool,
  }

  #[async_trait::async_trait]
  impl RollupSearchService for FakeSearch {
    fn should_process(
      &self,
      _cfg: &RollupJobConfig,
      metadata: Option<&RollupMetadata>,
      _now_ms: Timestamp,
    ) -> bool {
      !metadata.is_some_and(|m| m.is_terminal())
    }

    fn source_index_exists(&self, _index: &str) -> bool {
      self.source_exists
    }

    fn target_index_valid(&self, _index: &str, _job_id: &str) -> bool {
      true
    }

    async fn init_target_mapping(&self, _target_index: &str) -> anyhow::Result<()> {
      Ok(())
    }

    async fn search_page(
      &self,
      _spec: &RollupSpec,
      _after_key: Option<&bson::Document>,
    ) -> anyhow::Result<super::super::search::CompositePage> {
      let mut pages = self.pages.lock().unwrap();
      if pages.is_empty() {
        return Ok(super::super::search::CompositePage {
          after_key: None,
          documents_processed: 0,
          summary_documents: vec![],
        });
      }
      Ok(pages.remove(0))
    }

    async fn index_documents(
      &self,
      _target_index: &str,
      documents: Vec<bson::Document>,
    ) -> anyhow::Result<u64> {
      Ok(documents.len() as u64)
    }
  }

  fn spec() -> RollupSpec {
    RollupSpec {
      source_index: "src".into(),
      target_index: "tgt".into(),
      continuous: false,
      page_size: 100,
      aggregation: doc! {},
    }
  }

  #[tokio::test]
  async fn paging_runs_until_after_key_is_none_s5() {
    let store = Arc::new(InMemoryStore::new());
    let cfg = RollupJobConfig::new("job-1", spec(), 1_000, 5_000);
    store.seed_rollup_job_config(cfg.clone()).await;

    let search = Arc::new(FakeSearch {
      source_exists: true,
      pages: StdMutex::new(vec![
        super::super::search::CompositePage {
          after_key: Some(doc! { "k": 1 }),
          documents_processed: 10,
          summary_documents: vec![doc! {}, doc! {}],
        },
        super::super::search::CompositePage {
          after_key: None,
          documents_processed: 3,
          summary_documents: vec![doc! {}],
        },
      ]),
    });
    let lock = Arc::new(InMemoryLockService::new(std::time::Duration::from_secs(30)));
    let runner = RollupRunner::new(store.clone(), lock, search);

    runner.tick("job-1", 1_000).await.unwrap();

    let updated_cfg = store.get_rollup_job_config("job-1").await.unwrap().unwrap();
    assert!(!updated_cfg.enabled, "non-continuous job disables once finished");
    let meta = store.get_rollup_metadata(&updated_cfg.metadata_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(meta.status, RollupStatus::Finished);
    assert_eq!(meta.stats.pages_processed, 2);
    assert_eq!(meta.stats.documents_processed, 13);
    assert_eq!(meta.stats.documents_indexed, 3);
  }

  #[tokio::test]
  async fn missing_source_index_fails_and_disables() {
    let store = Arc::new(InMemoryStore::new());
    let cfg = RollupJobConfig::new("job-1", spec(), 1_000, 5_000);
    store.seed_rollup_job_config(cfg).await;

    let search = Arc::new(FakeSearch { source_exists: false, pages: StdMutex::new(vec![]) });
    let lock = Arc::new(InMemoryLockService::new(std::time::Duration::from_secs(30)));
    let runner = RollupRunner::new(store.clone(), lock, search);

    runner.tick("job-1", 1_000).await.unwrap();

    let updated_cfg = store.get_rollup_job_config("job-1").await.unwrap().unwrap();
    assert!(!updated_cfg.enabled);
    let meta = store.get_rollup_metadata(&updated_cfg.metadata_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(meta.status, RollupStatus::Failed);
  }

  struct FailingSearch {
    failures: AtomicU32,
  }

  #[async_trait::async_trait]
  impl RollupSearchService for FailingSearch {
    fn should_process(
      &self,
      _cfg: &RollupJobConfig,
      metadata: Option<&RollupMetadata>,
      _now_ms: Timestamp,
    ) -> bool {
      !metadata.is_some_and(|m| m.is_terminal())
    }
    fn source_index_exists(&self, _index: &str) -> bool {
      true
    }
    fn target_index_valid(&self, _index: &str, _job_id: &str) -> bool {
      true
    }
    async fn init_target_mapping(&self, _target_index: &str) -> anyhow::Result<()> {
      Ok(())
    }
    async fn search_page(
      &self,
      _spec: &RollupSpec,
      _after_key: Option<&bson::Document>,
    ) -> anyhow::Result<super::super::search::CompositePage> {
      self.failures.fetch_add(1, Ordering::SeqCst);
      Err(anyhow::anyhow!("transient search failure"))
    }
    async fn index_documents(
      &self,
      _target_index: &str,
      documents: Vec<bson::Document>,
    ) -> anyhow::Result<u64> {
      Ok(documents.len() as u64)
    }
  }

  #[tokio::test]
  async fn bounded_page_failures_trip_failed_status() {
    let store = Arc::new(InMemoryStore::new());
    let cfg = RollupJobConfig::new("job-1", spec(), 1_000, 5_000);
    store.seed_rollup_job_config(cfg).await;

    let search = Arc::new(FailingSearch { failures: AtomicU32::new(0) });
    let lock = Arc::new(InMemoryLockService::new(std::time::Duration::from_secs(30)));
    let runner = RollupRunner::new(store.clone(), lock, search.clone())
      .with_max_page_failures(3);

    runner.tick("job-1", 1_000).await.unwrap();

    assert_eq!(search.failures.load(Ordering::SeqCst), 3);
    let updated_cfg = store.get_rollup_job_config("job-1").await.unwrap().unwrap();
    assert!(!updated_cfg.enabled);
    let meta = store.get_rollup_metadata(&updated_cfg.metadata_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(meta.status, RollupStatus::Failed);
  }
}
