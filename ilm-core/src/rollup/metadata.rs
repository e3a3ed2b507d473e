use std::sync::Arc;

use backoff::ExponentialBackoff;
use model::{RollupMetadata, RollupStatus, Timestamp};
use store::MetadataStore;

use crate::error::ControllerError;

/// Rollup Metadata Service (component H). Three-valued result type rather
/// than `Result<Option<T>, E>` because callers treat "no metadata yet" and
/// "metadata exists but init failed" as genuinely different outcomes: the
/// former is a deferred, silent retry next tick; the latter aborts the
/// tick with an error.
pub enum RollupMetadataResult<T> {
  Success(T),
  NoMetadata,
  Failure(String),
}

/// Owns the CAS discipline around `RollupMetadata`. `set_failed` is the
/// only path to `RollupStatus::Failed` and is the one operation here that
/// must not silently give up: a rollup job whose failure can't even be
/// recorded is stuck retrying forever, so exhausting its retry budget is
/// promoted to `ControllerError::Fatal`.
pub struct RollupMetadataService {
  store: Arc<dyn MetadataStore>,
}

impl RollupMetadataService {
  pub fn new(store: Arc<dyn MetadataStore>) -> Self {
    Self { store }
  }

  /// Loads the job's metadata by id if one is already bound, or creates
  /// and persists a fresh `Init` document on first run.
  pub async fn init(
    &self,
    job_id: &str,
    metadata_id: Option<&str>,
    now_ms: Timestamp,
  ) -> RollupMetadataResult<RollupMetadata> {
    let _ = now_ms;
    if let Some(id) = metadata_id {
      return match self.store.get_rollup_metadata(id).await {
        Ok(Some(meta)) => RollupMetadataResult::Success(meta),
        Ok(None) => RollupMetadataResult::NoMetadata,
        Err(e) => RollupMetadataResult::Failure(format!("failed to load rollup metadata: {e}")),
      };
    }

    let fresh = RollupMetadata::fresh(job_id);
    match self.store.put_rollup_metadata(&fresh).await {
      Ok(meta) => RollupMetadataResult::Success(meta),
      Err(e) => RollupMetadataResult::Failure(format!("failed to persist fresh rollup metadata: {e}")),
    }
  }

  /// Persists an in-progress update (page results, status transitions
  /// other than `Failed`). A CAS conflict here is surfaced as `Failure`
  /// rather than retried blind — the caller re-reads on its next tick.
  pub async fn update(&self, meta: &RollupMetadata) -> RollupMetadataResult<RollupMetadata> {
    match self.store.put_rollup_metadata(meta).await {
      Ok(updated) => RollupMetadataResult::Success(updated),
      Err(e) => RollupMetadataResult::Failure(format!("failed to persist rollup metadata: {e}")),
    }
  }

  pub async fn set_failed(
    &self,
    meta: &RollupMetadata,
    reason: String,
    backoff: &ExponentialBackoff,
  ) -> Result<RollupMetadata, ControllerError> {
    let mut failed = meta.clone();
    failed.status = RollupStatus::Failed;
    failed.failure_reason = Some(reason);

    backoff::retry(backoff, || self.store.put_rollup_metadata(&failed))
      .await
      .map_err(|e| {
        ControllerError::Fatal(anyhow::anyhow!(
          "could not persist FAILED rollup metadata for job {}: {e}",
          meta.job_id
        ))
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use store::InMemoryStore;

  #[tokio::test]
  async fn init_creates_fresh_metadata_on_first_run() {
    let store = Arc::new(InMemoryStore::new());
    let service = RollupMetadataService::new(store);
    match service.init("job-1", None, 1_000).await {
      RollupMetadataResult::Success(meta) => assert_eq!(meta.status, RollupStatus::Init),
      _ => panic!("expected Success"),
    }
  }

  #[tokio::test]
  async fn init_reports_no_metadata_for_dangling_id() {
    let store = Arc::new(InMemoryStore::new());
    let service = RollupMetadataService::new(store);
    match service.init("job-1", Some("missing-id"), 1_000).await {
      RollupMetadataResult::NoMetadata => {}
      _ => panic!("expected NoMetadata"),
    }
  }

  #[tokio::test]
  async fn set_failed_marks_terminal_status() {
    let store = Arc::new(InMemoryStore::new());
    let service = RollupMetadataService::new(store);
    let fresh = match service.init("job-1", None, 1_000).await {
      RollupMetadataResult::Success(meta) => meta,
      _ => panic!("expected Success"),
    };
    let failed = service
      .set_failed(&fresh, "source index missing".into(), &backoff::DEFAULT)
      .await
      .unwrap();
    assert_eq!(failed.status, RollupStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("source index missing"));
  }
}
