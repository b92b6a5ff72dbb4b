//! Component — the lifecycle hooks a task's user-defined behavior
//! implements.
//!
//! A `Component` is plugged into a [`crate::engine::task::Task`] at
//! construction time and driven exclusively by that task's
//! `ExecutionEngine`: `init()` once on the assembly thread before any
//! activity starts, `on_config()` once per activity start (drives the
//! `INIT -> STOPPED`/`FATAL` transition), `on_update()` once per engine
//! step while running, and `on_aborted()` when `on_config` fails.

use std::sync::Arc;

use crate::engine::task::Task;

/// Lifecycle hooks implemented by a task's behavior. All four are
/// optional — a component that only needs `on_update` can leave the
/// rest at their no-op defaults.
pub trait Component: Send + Sync {
    /// Runs once, on the assembly thread, before the owning task's
    /// activity is started. Good place to validate attributes that
    /// don't depend on other tasks being wired up yet.
    fn init(&mut self) {}

    /// Runs once per activity start, on the activity thread, before the
    /// first `on_update`. An `Err` is fatal for the owning task.
    fn on_config(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Runs once per engine step while the task is `RUNNING`.
    fn on_update(&mut self) {}

    /// Runs once if `on_config` failed.
    fn on_aborted(&mut self) {}
}

/// A named factory producing a fully-formed [`Task`] for one component
/// type. The factory itself takes the instance name so the task's ports
/// can be built with their qualified names already resolved.
pub struct ComponentSpec {
    type_name: String,
    factory: Box<dyn Fn(&str) -> Task + Send + Sync>,
}

impl ComponentSpec {
    pub fn new<F>(type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Task + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            factory: Box::new(factory),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn create(&self, instance_name: &str) -> Arc<Task> {
        Arc::new((self.factory)(instance_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Component for Noop {}

    #[test]
    fn factory_builds_task_named_after_instance() {
        let spec = ComponentSpec::new("echo", |instance| Task::new("echo", instance, Box::new(Noop)));
        let task = spec.create("echo1");
        assert_eq!(task.instance_name(), "echo1");
        assert_eq!(task.type_name(), "echo");
    }

    #[test]
    fn on_config_default_succeeds() {
        let mut c = Noop;
        assert!(c.on_config().is_ok());
    }
}
