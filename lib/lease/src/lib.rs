//! Lock Service Client (component A): acquire/release per-job
//! cluster-wide leases with a TTL. Cluster-wide exclusivity is enforced
//! here, not by any in-process lock — the runner assumes zero
//! intra-process contention (`spec.md` §5).

mod memory;
mod mongo;

pub use memory::InMemoryLockService;
pub use mongo::MongoLockService;

use async_trait::async_trait;
use std::time::Duration;

/// A held, TTL-bounded mutual-exclusion token for one job. The caller is
/// expected to complete its tick well within `ttl`; there is no renewal
/// API because a tick's lease is never held across more than one tick.
#[derive(Debug, Clone)]
pub struct Lease {
  pub job_id: String,
  pub token: String,
  pub ttl: Duration,
}

/// A failed acquire is not an error — it's a signal to skip this tick,
/// so `acquire` returns `Option`, never an `Err`, for the "lock busy"
/// case. Only a genuine I/O failure against the lock store is an `Err`.
#[async_trait]
pub trait LockService: Send + Sync {
  async fn acquire(&self, job_id: &str) -> anyhow::Result<Option<Lease>>;
  async fn release(&self, lease: Lease) -> anyhow::Result<bool>;
}
