use anyhow::Context;
use async_trait::async_trait;
use bson::{doc, to_document};
use model::{
  JobConfig, JobMetadata, Policy, RollupJobConfig, RollupMetadata,
  SeqNoPrimaryTerm,
};
use mongodb::{
  Collection, Database,
  options::{FindOneAndUpdateOptions, ReturnDocument},
};
use serde::de::DeserializeOwned;

use crate::{error::StoreError, MetadataStore, StoreResult};

/// Metadata Store Client backed by the cluster's document store. All
/// documents for this controller live in a single management index /
/// database, one collection per document type, matching the source
/// system's "dedicated management index" layout (`spec.md` §6).
pub struct MongoStore {
  policies: Collection<Policy>,
  job_configs: Collection<JobConfig>,
  job_metadata: Collection<JobMetadata>,
  rollup_job_configs: Collection<RollupJobConfig>,
  rollup_metadata: Collection<RollupMetadata>,
  index_settings: Collection<bson::Document>,
  /// This process's incarnation. Stands in for the source system's
  /// primary-term (which tracks primary-shard reallocation); bumped by
  /// the caller whenever this store client is re-created against a newly
  /// elected primary.
  primary_term: u64,
}

impl MongoStore {
  pub fn new(db: &Database, primary_term: u64) -> Self {
    Self {
      policies: db.collection("ism_policies"),
      job_configs: db.collection("ism_job_configs"),
      job_metadata: db.collection("ism_job_metadata"),
      rollup_job_configs: db.collection("rollup_job_configs"),
      rollup_metadata: db.collection("rollup_metadata"),
      index_settings: db.collection("index_settings"),
      primary_term,
    }
  }
}

async fn get_by_id<T: DeserializeOwned + Unpin + Send + Sync>(
  coll: &Collection<T>,
  id: &str,
) -> StoreResult<Option<T>> {
  coll
    .find_one(doc! { "_id": id })
    .await
    .map_err(|e| StoreError::Transient(anyhow::Error::new(e)))
}

/// CAS write shared by every document type, generated per model type below
/// so each call site stays strongly typed on its id field. The filter
/// matches on id plus the incoming document's current handle (or
/// "document does not exist yet" when the handle is unset); the update
/// bumps `seq_no` while fixing `primary_term` to this store's incarnation.
macro_rules! impl_cas_put_with_handle {
  ($fn_name:ident, $ty:ty, $id_field:ident) => {
    async fn $fn_name(
      coll: &Collection<$ty>,
      primary_term: u64,
      mut value: $ty,
    ) -> StoreResult<$ty> {
      let id = value.$id_field.clone();
      let handle = value.handle;
      value.handle = SeqNoPrimaryTerm::new(handle.seq_no + 1, primary_term);
      let mut body = to_document(&value)
        .context("failed to serialize document for CAS write")?;
      body.insert("_id", &id);

      let filter = if handle == SeqNoPrimaryTerm::unset() {
        doc! { "_id": &id, "seq_no": { "$exists": false } }
      } else {
        doc! { "_id": &id, "seq_no": handle.seq_no as i64, "primary_term": handle.primary_term as i64 }
      };

      let opts = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();

      coll
        .find_one_and_update(filter, doc! { "$set": body })
        .with_options(opts)
        .await
        .map_err(|e| StoreError::Transient(anyhow::Error::new(e)))?
        .ok_or(StoreError::CasConflict)
    }
  };
}

impl_cas_put_with_handle!(put_job_config_cas, JobConfig, id);
impl_cas_put_with_handle!(put_job_metadata_cas, JobMetadata, job_id);
impl_cas_put_with_handle!(put_rollup_job_config_cas, RollupJobConfig, id);
impl_cas_put_with_handle!(put_rollup_metadata_cas, RollupMetadata, job_id);

#[async_trait]
impl MetadataStore for MongoStore {
  async fn get_policy(&self, id: &str) -> StoreResult<Option<Policy>> {
    get_by_id(&self.policies, id).await
  }

  async fn get_job_config(&self, id: &str) -> StoreResult<Option<JobConfig>> {
    get_by_id(&self.job_configs, id).await
  }

  async fn get_job_metadata(&self, id: &str) -> StoreResult<Option<JobMetadata>> {
    get_by_id(&self.job_metadata, id).await
  }

  async fn put_job_config(&self, cfg: &JobConfig) -> StoreResult<JobConfig> {
    put_job_config_cas(&self.job_configs, self.primary_term, cfg.clone()).await
  }

  async fn put_job_metadata(&self, meta: &JobMetadata) -> StoreResult<JobMetadata> {
    put_job_metadata_cas(&self.job_metadata, self.primary_term, meta.clone()).await
  }

  async fn update_index_setting(
    &self,
    index: &str,
    key: &str,
    value: &str,
  ) -> StoreResult<()> {
    self
      .index_settings
      .update_one(
        doc! { "_id": index },
        doc! { "$set": { key: value } },
      )
      .upsert(true)
      .await
      .map_err(|e| {
        tracing::warn!("cluster blocked updating index setting: {e:#}");
        StoreError::ClusterBlocked(e.to_string())
      })?;
    Ok(())
  }

  async fn get_rollup_metadata(&self, id: &str) -> StoreResult<Option<RollupMetadata>> {
    get_by_id(&self.rollup_metadata, id).await
  }

  async fn put_rollup_metadata(
    &self,
    meta: &RollupMetadata,
  ) -> StoreResult<RollupMetadata> {
    put_rollup_metadata_cas(&self.rollup_metadata, self.primary_term, meta.clone())
      .await
  }

  async fn get_rollup_job_config(
    &self,
    id: &str,
  ) -> StoreResult<Option<RollupJobConfig>> {
    get_by_id(&self.rollup_job_configs, id).await
  }

  async fn put_rollup_job_config(
    &self,
    cfg: &RollupJobConfig,
  ) -> StoreResult<RollupJobConfig> {
    put_rollup_job_config_cas(&self.rollup_job_configs, self.primary_term, cfg.clone())
      .await
  }
}
