use bson::Document;
use serde::{Deserialize, Serialize};

use crate::common::{SeqNoPrimaryTerm, Timestamp};

/// A dimension or metric to aggregate over, handed verbatim to the
/// out-of-scope composite-aggregation executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupSpec {
  pub source_index: String,
  pub target_index: String,
  pub continuous: bool,
  pub page_size: u32,
  /// Composite-aggregation request body; opaque to this crate.
  pub aggregation: Document,
}

/// Source of truth for *what* a rollup job should do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupJobConfig {
  pub id: String,
  pub spec: RollupSpec,
  pub metadata_id: Option<String>,
  pub enabled: bool,
  pub job_enabled_time: Timestamp,
  pub schedule_interval_ms: u64,
  #[serde(flatten)]
  pub handle: SeqNoPrimaryTerm,
}

impl RollupJobConfig {
  pub fn new(
    id: impl Into<String>,
    spec: RollupSpec,
    now: Timestamp,
    schedule_interval_ms: u64,
  ) -> Self {
    Self {
      id: id.into(),
      spec,
      metadata_id: None,
      enabled: true,
      job_enabled_time: now,
      schedule_interval_ms,
      handle: SeqNoPrimaryTerm::unset(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollupStatus {
  Init,
  Started,
  Stopped,
  Finished,
  Failed,
  Retry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollupStats {
  pub pages_processed: u64,
  pub documents_processed: u64,
  pub documents_indexed: u64,
}

impl RollupStats {
  pub fn merge_page(&mut self, documents_processed: u64, documents_indexed: u64) {
    self.pages_processed += 1;
    self.documents_processed += documents_processed;
    self.documents_indexed += documents_indexed;
  }
}

/// Source of truth for *where a rollup job is*.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupMetadata {
  pub job_id: String,
  pub status: RollupStatus,
  pub after_key: Option<Document>,
  pub stats: RollupStats,
  pub failure_reason: Option<String>,
  /// Consecutive page failures since the last successful page; drives the
  /// bounded failure counter (see SPEC_FULL.md §4.G).
  pub consecutive_page_failures: u32,
  #[serde(flatten)]
  pub handle: SeqNoPrimaryTerm,
}

impl RollupMetadata {
  pub fn fresh(job_id: impl Into<String>) -> Self {
    Self {
      job_id: job_id.into(),
      status: RollupStatus::Init,
      after_key: None,
      stats: RollupStats::default(),
      failure_reason: None,
      consecutive_page_failures: 0,
      handle: SeqNoPrimaryTerm::unset(),
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self.status,
      RollupStatus::Finished | RollupStatus::Failed | RollupStatus::Stopped
    )
  }
}
