//! Execution engine — the per-task step driver an activity calls into.
//!
//! `init()` runs the bound task's `on_config` exactly once; `step()`
//! drains deferred operation calls then invokes `on_update` exactly once
//! if the task is running; `finalize()` is currently a no-op hook
//! reserved for cleanup.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::engine::task::{Task, TaskState};
use crate::error::Result;
use crate::perf::{PerfMetrics, ScopedTimer, TimerType};

pub struct ExecutionEngine {
    task: Arc<Task>,
}

impl ExecutionEngine {
    pub fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn init(&self) -> Result<()> {
        self.task.run_component_init();
        self.task.run_on_config();
        Ok(())
    }

    pub fn step(&self) -> Result<()> {
        if self.task.state() == TaskState::Running {
            let metrics = PerfMetrics::global();
            let start = Instant::now();
            {
                let _timer = ScopedTimer::new(&metrics, TimerType::EngineStep);
                self.task.run_step();
            }
            debug!(
                task = self.task.instance_name(),
                step_ns = start.elapsed().as_nanos() as u64,
                "engine step"
            );
        }
        Ok(())
    }

    pub fn finalize(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingComponent {
        updates: Arc<AtomicU32>,
    }

    impl Component for CountingComponent {
        fn on_update(&mut self) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn step_is_a_noop_until_running() {
        let updates = Arc::new(AtomicU32::new(0));
        let task = Arc::new(Task::new(
            "counter",
            "c1",
            Box::new(CountingComponent { updates: updates.clone() }),
        ));
        let engine = ExecutionEngine::new(task.clone());
        engine.init().unwrap();
        engine.step().unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn step_drains_pending_ops_before_on_update() {
        use crate::operation::{OpValue, Operation};
        let updates = Arc::new(AtomicU32::new(0));
        let task = Arc::new(Task::new(
            "counter",
            "c1",
            Box::new(CountingComponent { updates: updates.clone() }),
        ));
        task.service().add_operation(Arc::new(Operation::new("bump", {
            let updates = updates.clone();
            move |_: &[OpValue]| {
                updates.fetch_add(10, Ordering::SeqCst);
                Ok(OpValue::Unit)
            }
        })));
        let engine = ExecutionEngine::new(task.clone());
        engine.init().unwrap();
        task.set_state_for_test(TaskState::Running);
        task.enqueue_operation("bump", vec![]);
        engine.step().unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 11);
    }
}
