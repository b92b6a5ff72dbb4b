//! dflow-core — a component-based execution runtime for real-time and
//! streaming dataflow applications.
//!
//! Applications are assembled from named task instances connected by
//! policy-parameterized channels and scheduled onto OS threads by
//! activities. See [`assembly::build_application`] for the entry point
//! most callers want; [`registry::Registry`] and the `engine` module
//! hold the lower-level building blocks.

pub mod assembly;
pub mod attribute;
pub mod component;
pub mod connection;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod operation;
pub mod perf;
pub mod plugin;
pub mod port;
pub mod registry;

pub use assembly::{build_application, Application, Descriptor};
pub use component::{Component, ComponentSpec};
pub use connection::{Connection, DataPolicy, LockPolicy, Policy};
pub use engine::{ActivityHandle, ExecutionEngine, ParallelActivity, Service, SequentialActivity, Task, TaskState};
pub use error::{Result, RuntimeError};
pub use perf::PerfMetrics;
pub use port::{InputPort, OutputPort};
pub use registry::Registry;

use tracing::info;

/// Initializes the process-wide tracing subscriber. `filter` follows
/// `tracing_subscriber::EnvFilter` syntax (e.g. `"dflow_core=debug,info"`);
/// pass `None` to default to `RUST_LOG`, falling back to `info`.
pub fn init(filter: Option<&str>) {
    let env_filter = match filter {
        Some(f) => tracing_subscriber::EnvFilter::new(f),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "dflow-core initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_and_assembly_are_reexported_at_crate_root() {
        let registry = std::sync::Arc::new(Registry::new());
        let descriptor = Descriptor {
            libraries: vec![],
            components: vec![],
            connections: vec![],
            activities: vec![],
        };
        let app = build_application(&registry, &descriptor).unwrap();
        assert_eq!(app.tasks().count(), 0);
    }
}
