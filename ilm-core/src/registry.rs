use std::sync::Arc;

use model::Policy;
use store::MetadataStore;

use crate::error::ControllerError;

/// Policy/Job Registry (component D): resolves a policy id to its typed
/// definition and threads its `(seq_no, primary_term)` through for
/// invariant 3 (a mutated policy must not be silently re-bound).
pub struct PolicyRegistry {
  store: Arc<dyn MetadataStore>,
}

impl PolicyRegistry {
  pub fn new(store: Arc<dyn MetadataStore>) -> Self {
    Self { store }
  }

  pub async fn resolve(
    &self,
    policy_id: &str,
  ) -> Result<Option<Policy>, ControllerError> {
    self.store.get_policy(policy_id).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use model::{Policy, PolicyState, SeqNoPrimaryTerm};
  use store::InMemoryStore;

  fn policy(id: &str, seq_no: u64) -> Policy {
    Policy {
      id: id.to_string(),
      default_state: "ingest".to_string(),
      states: vec![PolicyState {
        name: "ingest".to_string(),
        actions: vec![],
        transitions: vec![],
      }],
      handle: SeqNoPrimaryTerm::new(seq_no, 1),
    }
  }

  #[tokio::test]
  async fn resolve_returns_policy_with_handle() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_policy(policy("p1", 7)).await;
    let registry = PolicyRegistry::new(store);

    let resolved = registry.resolve("p1").await.unwrap().unwrap();
    assert_eq!(resolved.handle.seq_no, 7);
  }

  #[tokio::test]
  async fn resolve_missing_policy_returns_none() {
    let store = Arc::new(InMemoryStore::new());
    let registry = PolicyRegistry::new(store);
    assert!(registry.resolve("missing").await.unwrap().is_none());
  }
}
