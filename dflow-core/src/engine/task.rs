//! Task — a named component instance: identity, namespace, lifecycle.
//!
//! Lifecycle state machine:
//! `INIT --on_config ok--> STOPPED --start--> RUNNING --stop--> STOPPED`,
//! with `any state --on_config/runtime error--> FATAL` (terminal). A task
//! with no activity bound (including a peer task, which is invoked by its
//! owner's `on_update` rather than scheduled independently) rejects
//! `start`/`stop` with `ActivityNotBound`, logged and ignored by the
//! caller.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{error, warn};

use crate::component::Component;
use crate::engine::activity::ActivityHandle;
use crate::engine::service::Service;
use crate::error::{Result, RuntimeError};
use crate::operation::PendingCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Init,
    Stopped,
    Running,
    Fatal,
}

pub struct Task {
    type_name: String,
    instance_name: String,
    service: Service,
    state: RwLock<TaskState>,
    component: Mutex<Box<dyn Component>>,
    pending: Mutex<VecDeque<PendingCall>>,
    activity: RwLock<Option<Arc<dyn ActivityHandle>>>,
}

impl Task {
    pub fn new(type_name: impl Into<String>, instance_name: impl Into<String>, component: Box<dyn Component>) -> Self {
        let instance_name = instance_name.into();
        Self {
            type_name: type_name.into(),
            service: Service::new(instance_name.clone()),
            instance_name,
            state: RwLock::new(TaskState::Init),
            component: Mutex::new(component),
            pending: Mutex::new(VecDeque::new()),
            activity: RwLock::new(None),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn state(&self) -> TaskState {
        *self.state.read().expect("task state lock poisoned")
    }

    fn set_state(&self, state: TaskState) {
        *self.state.write().expect("task state lock poisoned") = state;
    }

    #[cfg(test)]
    pub fn set_state_for_test(&self, state: TaskState) {
        self.set_state(state);
    }

    /// Binds an assembled activity during application construction. Not
    /// valid after the activity has started.
    pub fn bind_activity(&self, activity: Arc<dyn ActivityHandle>) {
        *self.activity.write().expect("task activity lock poisoned") = Some(activity);
    }

    fn activity(&self) -> Option<Arc<dyn ActivityHandle>> {
        self.activity.read().expect("task activity lock poisoned").clone()
    }

    pub fn has_activity(&self) -> bool {
        self.activity.read().expect("task activity lock poisoned").is_some()
    }

    /// Runs the component's `init()` hook once, before any activity is
    /// started. Called by assembly on its own thread.
    pub fn run_component_init(&self) {
        self.component.lock().expect("component lock poisoned").init();
    }

    /// Runs `on_config` exactly once, transitioning `INIT -> STOPPED` on
    /// success or `INIT -> FATAL` on failure. Idempotent once past INIT.
    pub(crate) fn run_on_config(&self) {
        if self.state() != TaskState::Init {
            return;
        }
        let result = self.component.lock().expect("component lock poisoned").on_config();
        match result {
            Ok(()) => self.set_state(TaskState::Stopped),
            Err(e) => {
                self.set_state(TaskState::Fatal);
                self.component.lock().expect("component lock poisoned").on_aborted();
                error!(task = %self.instance_name, error = %e, "on_config failed, task is fatal");
            }
        }
    }

    pub(crate) fn run_on_update(&self) {
        self.component.lock().expect("component lock poisoned").on_update();
    }

    /// Drains queued operation calls in FIFO order, then runs `on_update`
    /// exactly once.
    pub(crate) fn run_step(&self) {
        loop {
            let call = self.pending.lock().expect("pending lock poisoned").pop_front();
            let Some(call) = call else { break };
            match self.service.get_operation(&call.operation_name) {
                Some(op) => {
                    if let Err(e) = op.call(&call.args) {
                        error!(task = %self.instance_name, operation = %call.operation_name, error = %e, "deferred operation call failed");
                    }
                }
                None => warn!(task = %self.instance_name, operation = %call.operation_name, "deferred call to unknown operation, dropped"),
            }
        }
        self.run_on_update();
    }

    /// Queues `name(args)` for invocation on this task's next engine step.
    pub fn enqueue_operation(&self, name: &str, args: Vec<crate::operation::OpValue>) -> bool {
        if self.service.get_operation(name).is_none() {
            warn!(task = %self.instance_name, operation = name, "enqueue of unknown operation ignored");
            return false;
        }
        self.pending.lock().expect("pending lock poisoned").push_back(PendingCall {
            operation_name: name.to_string(),
            args,
        });
        true
    }

    pub fn trigger_activity(&self) {
        match self.activity() {
            Some(a) => a.trigger(),
            None => warn!(task = %self.instance_name, "trigger on task with no bound activity ignored"),
        }
    }

    /// `STOPPED -> RUNNING`. Logged and ignored if no activity is bound
    /// or the task is already running.
    pub fn start(&self) -> Result<()> {
        let activity = match self.activity() {
            Some(a) => a,
            None => {
                warn!(task = %self.instance_name, "start on task with no bound activity ignored");
                return Err(RuntimeError::ActivityNotBound(self.instance_name.clone()));
            }
        };
        if self.state() == TaskState::Running {
            warn!(task = %self.instance_name, "start on already-running task ignored");
            return Err(RuntimeError::AlreadyRunning(self.instance_name.clone()));
        }
        activity.start()?;
        if self.state() == TaskState::Fatal {
            return Err(RuntimeError::ConfigurationError(
                self.instance_name.clone(),
                "on_config failed".to_string(),
            ));
        }
        self.set_state(TaskState::Running);
        Ok(())
    }

    /// `RUNNING -> STOPPED`. Calling `stop` twice has the same effect as
    /// once.
    pub fn stop(&self) {
        let activity = match self.activity() {
            Some(a) => a,
            None => {
                warn!(task = %self.instance_name, "stop on task with no bound activity ignored");
                return;
            }
        };
        if self.state() != TaskState::Running {
            return;
        }
        self.set_state(TaskState::Stopped);
        activity.stop();
        activity.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    struct NoopComponent;
    impl Component for NoopComponent {}

    struct FailingConfigComponent;
    impl Component for FailingConfigComponent {
        fn on_config(&mut self) -> std::result::Result<(), String> {
            Err("bad config".to_string())
        }
    }

    #[test]
    fn starts_without_activity_is_rejected() {
        let task = Task::new("t", "t1", Box::new(NoopComponent));
        assert!(matches!(task.start(), Err(RuntimeError::ActivityNotBound(_))));
    }

    #[test]
    fn enqueue_of_unknown_operation_is_rejected() {
        let task = Task::new("t", "t1", Box::new(NoopComponent));
        assert!(!task.enqueue_operation("nope", vec![]));
    }

    #[test]
    fn stop_without_having_started_is_a_noop() {
        let task = Task::new("t", "t1", Box::new(NoopComponent));
        task.stop();
        assert_eq!(task.state(), TaskState::Init);
    }

    #[test]
    fn failing_on_config_transitions_to_fatal_without_setting_running() {
        let task = Task::new("t", "t1", Box::new(FailingConfigComponent));
        task.run_on_config();
        assert_eq!(task.state(), TaskState::Fatal);
    }
}
