//! Autoscaler: reconciler, launch pool, update tracker, node-tag predicates,
//! load metrics, and status reporting. The public control API (`update`,
//! `request_resources`, `kill_workers`) lives directly on
//! [`reconciler::Autoscaler`].

pub mod launch_pool;
pub mod load_metrics;
pub mod predicates;
pub mod reconciler;
pub mod status;
pub mod update_tracker;

pub use reconciler::{Autoscaler, AutoscalerOptions};
