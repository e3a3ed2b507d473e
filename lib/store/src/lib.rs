//! Metadata Store Client (component B): CAS read/write of job-config and
//! job-metadata documents against the dedicated management index.

mod error;
mod memory;
mod mongo;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use model::{JobConfig, JobMetadata, Policy, RollupJobConfig, RollupMetadata};

pub type StoreResult<T> = Result<T, StoreError>;

/// All writes are idempotent when replayed with the same *intent*: a
/// lost-ack retry that re-sends a write whose CAS handle has since moved
/// on because the original write actually landed returns `CasConflict`
/// rather than silently double-applying, so callers recover by re-reading
/// rather than by trusting their own retry.
#[async_trait]
pub trait MetadataStore: Send + Sync {
  async fn get_policy(&self, id: &str) -> StoreResult<Option<Policy>>;
  async fn get_job_config(&self, id: &str) -> StoreResult<Option<JobConfig>>;
  async fn get_job_metadata(&self, id: &str) -> StoreResult<Option<JobMetadata>>;

  /// CAS write: succeeds only if the stored document's handle still
  /// matches `cfg.handle`; returns the document with its bumped handle.
  async fn put_job_config(&self, cfg: &JobConfig) -> StoreResult<JobConfig>;
  /// CAS write via a cluster-state update action in the source system;
  /// here, the same CAS discipline applied to the metadata collection.
  async fn put_job_metadata(&self, meta: &JobMetadata) -> StoreResult<JobMetadata>;

  /// Self-heal path for the `policy_id` index setting; not CAS-guarded,
  /// best-effort per `spec.md` invariant 2.
  async fn update_index_setting(
    &self,
    index: &str,
    key: &str,
    value: &str,
  ) -> StoreResult<()>;

  async fn get_rollup_metadata(&self, id: &str) -> StoreResult<Option<RollupMetadata>>;
  async fn put_rollup_metadata(&self, meta: &RollupMetadata) -> StoreResult<RollupMetadata>;
  async fn get_rollup_job_config(&self, id: &str) -> StoreResult<Option<RollupJobConfig>>;
  async fn put_rollup_job_config(
    &self,
    cfg: &RollupJobConfig,
  ) -> StoreResult<RollupJobConfig>;
}
