use async_trait::async_trait;
use bson::Document;
use model::{RollupJobConfig, RollupMetadata, RollupSpec, Timestamp};

/// One page of a composite aggregation: the out-of-scope aggregation
/// executor's result, handed back through this narrow interface
/// (`spec.md` §1).
pub struct CompositePage {
  pub after_key: Option<Document>,
  pub documents_processed: u64,
  pub summary_documents: Vec<Document>,
}

/// The rollup runner's only window onto the aggregation engine,
/// index-existence checks, and scheduling decision. Real deployments
/// implement this against the composite-aggregation executor and the
/// cluster's index catalogue; this crate only consumes the trait.
#[async_trait]
pub trait RollupSearchService: Send + Sync {
  /// Schedule/continuity/status-driven decision of whether this job is
  /// due for work right now.
  fn should_process(
    &self,
    cfg: &RollupJobConfig,
    metadata: Option<&RollupMetadata>,
    now_ms: Timestamp,
  ) -> bool;

  fn source_index_exists(&self, index: &str) -> bool;

  /// True iff `index` exists, is flagged as a rollup index, and already
  /// contains this job's summary-document mapping.
  fn target_index_valid(&self, index: &str, job_id: &str) -> bool;

  async fn init_target_mapping(&self, target_index: &str) -> anyhow::Result<()>;

  async fn search_page(
    &self,
    spec: &RollupSpec,
    after_key: Option<&Document>,
  ) -> anyhow::Result<CompositePage>;

  /// Indexes the page's summary documents into the target index; returns
  /// how many were actually indexed.
  async fn index_documents(
    &self,
    target_index: &str,
    documents: Vec<Document>,
  ) -> anyhow::Result<u64>;
}
