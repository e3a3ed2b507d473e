use std::time::Duration;

use async_trait::async_trait;
use bson::doc;
use mongodb::{
  Collection, Database,
  options::{FindOneAndUpdateOptions, ReturnDocument},
};
use uuid::Uuid;

use crate::{Lease, LockService};

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
  matches!(
    e.kind.as_ref(),
    mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(we))
      if we.code == 11000
  )
}

fn now_ms() -> i64 {
  // Caller-visible time source kept in one place so it can be swapped for
  // a fake clock in integration tests without touching the CAS logic.
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .expect("system clock before epoch")
    .as_millis() as i64
}

/// `LockService` backed by a dedicated `leases` collection. Acquisition is
/// a single `find_one_and_update` that only succeeds when no lease is
/// held or the held lease has expired, so at most one live lease exists
/// cluster-wide per job (`spec.md` invariant 1) regardless of how many
/// nodes race to acquire it.
pub struct MongoLockService {
  leases: Collection<bson::Document>,
  ttl: Duration,
}

impl MongoLockService {
  pub fn new(db: &Database, ttl: Duration) -> Self {
    Self { leases: db.collection("ism_leases"), ttl }
  }
}

#[async_trait]
impl LockService for MongoLockService {
  async fn acquire(&self, job_id: &str) -> anyhow::Result<Option<Lease>> {
    let now = now_ms();
    let token = Uuid::new_v4().to_string();
    let held_until = now + self.ttl.as_millis() as i64;

    let filter = doc! {
      "_id": job_id,
      "$or": [
        { "held_until": { "$lte": now } },
        { "held_until": { "$exists": false } },
      ],
    };
    let update = doc! {
      "$set": { "token": &token, "held_until": held_until },
    };
    let opts = FindOneAndUpdateOptions::builder()
      .upsert(true)
      .return_document(ReturnDocument::After)
      .build();

    let result = match self
      .leases
      .find_one_and_update(filter, update)
      .with_options(opts)
      .await
    {
      Ok(result) => result,
      // Two acquires raced: the loser's upsert tried to insert a document
      // whose _id the winner already holds. That is a lost race, not an
      // error.
      Err(e) if is_duplicate_key(&e) => return Ok(None),
      Err(e) => return Err(e.into()),
    };

    match result {
      Some(doc) if doc.get_str("token").ok() == Some(token.as_str()) => {
        Ok(Some(Lease { job_id: job_id.to_string(), token, ttl: self.ttl }))
      }
      // Upsert raced with a concurrent holder and lost; lock is busy.
      _ => Ok(None),
    }
  }

  async fn release(&self, lease: Lease) -> anyhow::Result<bool> {
    let result = self
      .leases
      .delete_one(doc! { "_id": &lease.job_id, "token": &lease.token })
      .await?;
    Ok(result.deleted_count == 1)
  }
}
