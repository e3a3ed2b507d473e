use backoff::Retryable;

/// Error surface for every metadata-store operation (component B).
///
/// `Transient` and `ClusterBlocked` are retried by [`backoff::retry`];
/// `NotFound` and `CasConflict` are semantic and must not be blindly
/// retried — the caller (the runner) decides what a missing document or a
/// lost CAS race means.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("document not found")]
  NotFound,
  #[error("CAS write rejected: stored document has moved on")]
  CasConflict,
  #[error("cluster-state update blocked: {0}")]
  ClusterBlocked(String),
  #[error("transient store error: {0:#}")]
  Transient(anyhow::Error),
}

impl Retryable for StoreError {
  fn is_transient(&self) -> bool {
    matches!(self, StoreError::Transient(_) | StoreError::ClusterBlocked(_))
  }
}
