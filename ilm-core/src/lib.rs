//! Index Lifecycle Controller core: the runner logic (components E-H)
//! that sits between the document-store/lock clients (components A-B)
//! and the action/aggregation engines the cluster embeds (out of scope,
//! consumed only through the [`step`] and [`rollup::search`] traits).

pub mod cluster;
pub mod error;
pub mod ism;
pub mod registry;
pub mod rollup;
pub mod step;

pub use cluster::{ClusterStateView, IndexMetaData, StaticClusterState};
pub use error::ControllerError;
pub use ism::IsmRunner;
pub use registry::PolicyRegistry;
pub use rollup::{RollupMetadataResult, RollupMetadataService, RollupRunner, RollupSearchService};
pub use step::{Action, ActionCatalog, Step, StepContext};
