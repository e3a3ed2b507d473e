use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Lease, LockService};

struct Held {
  token: String,
  expires_at: std::time::Instant,
}

/// In-memory `LockService` for tests: one node's worth of exclusivity.
/// Used to exercise the "two concurrent ticks, exactly one wins" property
/// (`spec.md` §8 S6) without a live lock store.
#[derive(Default)]
pub struct InMemoryLockService {
  held: Mutex<HashMap<String, Held>>,
  ttl: Duration,
}

impl InMemoryLockService {
  pub fn new(ttl: Duration) -> Self {
    Self { held: Mutex::default(), ttl }
  }
}

#[async_trait]
impl LockService for InMemoryLockService {
  async fn acquire(&self, job_id: &str) -> anyhow::Result<Option<Lease>> {
    let mut held = self.held.lock().await;
    let now = std::time::Instant::now();
    if let Some(existing) = held.get(job_id) {
      if existing.expires_at > now {
        return Ok(None);
      }
    }
    let token = Uuid::new_v4().to_string();
    held.insert(
      job_id.to_string(),
      Held { token: token.clone(), expires_at: now + self.ttl },
    );
    Ok(Some(Lease { job_id: job_id.to_string(), token, ttl: self.ttl }))
  }

  async fn release(&self, lease: Lease) -> anyhow::Result<bool> {
    let mut held = self.held.lock().await;
    match held.get(&lease.job_id) {
      Some(existing) if existing.token == lease.token => {
        held.remove(&lease.job_id);
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test]
  async fn only_one_concurrent_acquire_wins() {
    let service = Arc::new(InMemoryLockService::new(Duration::from_secs(30)));
    let a = service.clone().acquire("job-1").await.unwrap();
    let b = service.clone().acquire("job-1").await.unwrap();
    assert!(a.is_some());
    assert!(b.is_none());
  }

  #[tokio::test]
  async fn release_allows_reacquire() {
    let service = InMemoryLockService::new(Duration::from_secs(30));
    let lease = service.acquire("job-1").await.unwrap().unwrap();
    assert!(service.release(lease).await.unwrap());
    assert!(service.acquire("job-1").await.unwrap().is_some());
  }
}
