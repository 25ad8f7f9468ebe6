//! Common re-exports for binaries and tests.

pub use crate::autoscaler::reconciler::{Autoscaler, AutoscalerOptions};
pub use crate::autoscaler::status::{DebugSink, InMemoryDebugSink};
pub use crate::config::refresher::{ConfigRefresher, ProviderFactory};
pub use crate::error::{AutoscalerError, ConfigError, ProviderError, Result};
pub use crate::model::{ClusterConfig, NodeId, NodeSnapshot, NodeTags, NodeTypeConfig, ResourceBundle};
pub use crate::provider::memory::MemoryNodeProvider;
pub use crate::provider::NodeProvider;
pub use crate::scheduler::{ResourceDemandScheduler, SimpleResourceDemandScheduler};
pub use crate::updater::{NoopUpdater, ShellCommandUpdater, Updater};
