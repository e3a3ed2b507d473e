/// Typed classification of a tick's failure, per `spec.md` §7. The
/// backoff policy (component C) and the runners match on `kind()` rather
/// than on message text.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
  #[error("transient store error: {0:#}")]
  Transient(#[source] anyhow::Error),
  #[error("cluster-state update blocked: {0}")]
  ClusterBlocked(String),
  #[error("semantic failure: {0}")]
  Semantic(String),
  #[error("invariant violated: {0}")]
  InvariantViolation(String),
  #[error("fatal: could not even record failure: {0:#}")]
  Fatal(#[source] anyhow::Error),
}

impl From<store::StoreError> for ControllerError {
  fn from(e: store::StoreError) -> Self {
    match e {
      store::StoreError::NotFound => {
        ControllerError::Semantic("document not found".into())
      }
      store::StoreError::CasConflict => {
        ControllerError::Semantic("CAS write rejected".into())
      }
      store::StoreError::ClusterBlocked(msg) => {
        ControllerError::ClusterBlocked(msg)
      }
      store::StoreError::Transient(e) => ControllerError::Transient(e),
    }
  }
}
