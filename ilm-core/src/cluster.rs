use std::collections::HashMap;

/// Read-only snapshot of cluster state, narrowed to the one lookup the
/// runner needs (`spec.md` §6).
pub trait ClusterStateView: Send + Sync {
  fn index(&self, name: &str) -> Option<IndexMetaData>;
}

#[derive(Debug, Clone)]
pub struct IndexMetaData {
  pub name: String,
  pub uuid: String,
  pub settings: HashMap<String, String>,
}

/// Test/demo `ClusterStateView` backed by an in-memory map. Production
/// deployments plug in the real cluster-state snapshot; this crate only
/// consumes the trait.
#[derive(Default)]
pub struct StaticClusterState {
  indices: HashMap<String, IndexMetaData>,
}

impl StaticClusterState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_index(mut self, meta: IndexMetaData) -> Self {
    self.indices.insert(meta.name.clone(), meta);
    self
  }
}

impl ClusterStateView for StaticClusterState {
  fn index(&self, name: &str) -> Option<IndexMetaData> {
    self.indices.get(name).cloned()
  }
}
