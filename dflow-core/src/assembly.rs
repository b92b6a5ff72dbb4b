//! Assembly — descriptor-driven application construction.
//!
//! `build_application` turns a [`Descriptor`] into a fully wired
//! [`Application`]: instantiate every component, apply attribute values,
//! wire every connection (validating port types and the `UNSYNC`
//! same-activity invariant), bind every task to its activity, and return
//! without starting anything — starting is a separate, explicit step so
//! assembly failures never leave partially-running activities.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connection::{DataPolicy, LockPolicy, Policy};
use crate::engine::activity::{ActivityHandle, ParallelActivity, SequentialActivity};
use crate::engine::execution::ExecutionEngine;
use crate::engine::task::Task;
use crate::error::{Result, RuntimeError};
use crate::registry::Registry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDecl {
    pub type_name: String,
    pub instance_name: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Instance name of the task this one is a peer of. A peer is never
    /// bound to its own activity (it must not also appear in any
    /// `ActivityDecl.tasks` list); it is invoked by its owner via
    /// `Service::peers()` instead of being scheduled independently.
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecl {
    pub data: DataPolicy,
    pub lock: LockPolicy,
    #[serde(default)]
    pub buffer_size: usize,
}

impl From<PolicyDecl> for Policy {
    fn from(decl: PolicyDecl) -> Self {
        Policy {
            data: decl.data,
            lock: decl.lock,
            transport: crate::connection::Transport::Local,
            buffer_size: decl.buffer_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDecl {
    /// Qualified output port name, e.g. `"producer_out"`.
    pub output: String,
    /// Qualified input port name, e.g. `"consumer_in"`.
    pub input: String,
    pub policy: PolicyDecl,
    #[serde(default)]
    pub event: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDecl {
    pub name: String,
    pub kind: ActivityKind,
    pub tasks: Vec<String>,
    /// Fixed-rate period for a `Sequential` activity. `None` means
    /// purely event-driven (parked until triggered).
    pub period_ms: Option<u64>,
    pub cpu_affinity: Option<usize>,
}

/// A dynamic library to load, named the way `add_library` expects: a
/// bare base name that gets turned into the platform-conventional
/// filename and resolved against `search_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryDecl {
    pub base_name: String,
    #[serde(default = "default_search_path")]
    pub search_path: String,
}

fn default_search_path() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    pub libraries: Vec<LibraryDecl>,
    pub components: Vec<ComponentDecl>,
    #[serde(default)]
    pub connections: Vec<ConnectionDecl>,
    #[serde(default)]
    pub activities: Vec<ActivityDecl>,
}

/// A fully assembled, not-yet-started application.
pub struct Application {
    registry: Arc<Registry>,
    tasks: HashMap<String, Arc<Task>>,
}

impl Application {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn task(&self, instance_name: &str) -> Option<Arc<Task>> {
        self.tasks.get(instance_name).cloned()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.values()
    }

    /// Starts every task with a bound activity. Peer tasks (no bound
    /// activity) are skipped rather than treated as an error.
    ///
    /// Each task is started from its own spawned thread: a task bound to
    /// a `SequentialActivity` blocks inside `start()` until the activity
    /// is stopped, so starting it on the caller's own thread would
    /// prevent every other task from ever starting. This call returns as
    /// soon as the threads are spawned, before any activity has
    /// necessarily begun stepping.
    pub fn start_all(&self) {
        for task in self.tasks.values() {
            if task.has_activity() {
                let task = task.clone();
                thread::spawn(move || {
                    if let Err(e) = task.start() {
                        tracing::error!(task = task.instance_name(), error = %e, "task failed to start");
                    }
                });
            }
        }
    }

    pub fn stop_all(&self) {
        for task in self.tasks.values() {
            if task.has_activity() {
                task.stop();
            }
        }
    }
}

pub fn build_application(registry: &Arc<Registry>, descriptor: &Descriptor) -> Result<Application> {
    for lib in &descriptor.libraries {
        registry.add_library(&lib.base_name, &lib.search_path);
    }

    let mut tasks = HashMap::new();
    for decl in &descriptor.components {
        let task = registry.create(&decl.type_name, &decl.instance_name)?;
        for (name, value) in &decl.attributes {
            let attr = task
                .service()
                .get_attribute(name)
                .ok_or_else(|| RuntimeError::MissingEndpoint(format!("{}.{name}", decl.instance_name)))?;
            attr.set_from_str(value).map_err(|e| RuntimeError::ConfigurationError(decl.instance_name.clone(), e))?;
        }
        tasks.insert(decl.instance_name.clone(), task);
    }

    for decl in &descriptor.components {
        let Some(owner_name) = &decl.owner else { continue };
        let owner = tasks
            .get(owner_name)
            .ok_or_else(|| RuntimeError::MissingEndpoint(owner_name.clone()))?;
        let peer = tasks
            .get(&decl.instance_name)
            .ok_or_else(|| RuntimeError::MissingEndpoint(decl.instance_name.clone()))?;
        owner.service().add_peer(peer.clone());
    }

    let task_activity: HashMap<&str, &str> = descriptor
        .activities
        .iter()
        .flat_map(|a| a.tasks.iter().map(move |t| (t.as_str(), a.name.as_str())))
        .collect();

    let mut wired = HashSet::new();
    for decl in &descriptor.connections {
        if !wired.insert((decl.output.clone(), decl.input.clone())) {
            return Err(RuntimeError::InvalidPolicy(format!(
                "connection {} -> {} is wired more than once",
                decl.output, decl.input
            )));
        }

        let (out_owner, _) = split_qualified(&decl.output)?;
        let (in_owner, _) = split_qualified(&decl.input)?;

        let policy: Policy = decl.policy.clone().into();
        if policy.lock == LockPolicy::Unsync {
            let out_activity = task_activity.get(out_owner.as_str());
            let in_activity = task_activity.get(in_owner.as_str());
            if out_activity.is_none() || out_activity != in_activity {
                return Err(RuntimeError::InvalidPolicy(format!(
                    "UNSYNC connection {} -> {} crosses an activity boundary",
                    decl.output, decl.input
                )));
            }
        }

        let out_task = tasks
            .get(&out_owner)
            .ok_or_else(|| RuntimeError::MissingEndpoint(decl.output.clone()))?;
        let in_task = tasks
            .get(&in_owner)
            .ok_or_else(|| RuntimeError::MissingEndpoint(decl.input.clone()))?;
        let out_port = out_task
            .service()
            .get_port(&decl.output)
            .ok_or_else(|| RuntimeError::MissingEndpoint(decl.output.clone()))?;
        let in_port = in_task
            .service()
            .get_port(&decl.input)
            .ok_or_else(|| RuntimeError::MissingEndpoint(decl.input.clone()))?;
        if out_port.type_tag() != in_port.type_tag() {
            return Err(RuntimeError::PortTypeMismatch(
                out_port.type_name().to_string(),
                in_port.type_name().to_string(),
            ));
        }
        let trigger: Option<crate::connection::TriggerFn> = if decl.event {
            let in_task = in_task.clone();
            Some(Arc::new(move || in_task.trigger_activity()))
        } else {
            None
        };
        out_port.wire(&*in_port, policy, decl.event, trigger)?;
    }

    for activity_decl in &descriptor.activities {
        let engines: Vec<Arc<ExecutionEngine>> = activity_decl
            .tasks
            .iter()
            .map(|name| {
                tasks
                    .get(name)
                    .cloned()
                    .map(ExecutionEngine::new)
                    .map(Arc::new)
                    .ok_or_else(|| RuntimeError::MissingEndpoint(name.clone()))
            })
            .collect::<Result<_>>()?;

        let handle: Arc<dyn ActivityHandle> = match activity_decl.kind {
            ActivityKind::Sequential => Arc::new(SequentialActivity::new(
                engines,
                activity_decl.period_ms.map(Duration::from_millis),
                activity_decl.cpu_affinity,
            )),
            ActivityKind::Parallel => Arc::new(ParallelActivity::new(engines, activity_decl.cpu_affinity)),
        };
        for name in &activity_decl.tasks {
            tasks[name].bind_activity(handle.clone());
        }
        info!(activity = activity_decl.name, tasks = activity_decl.tasks.len(), "activity bound");
    }

    Ok(Application { registry: registry.clone(), tasks })
}

fn split_qualified(qualified_name: &str) -> Result<(String, String)> {
    qualified_name
        .split_once('_')
        .map(|(owner, local)| (owner.to_string(), local.to_string()))
        .ok_or_else(|| RuntimeError::MissingEndpoint(qualified_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentSpec};
    use crate::port::OutputPort;

    struct Producer {
        out: Arc<OutputPort<i32>>,
    }
    impl Component for Producer {
        fn on_update(&mut self) {
            self.out.write(1);
        }
    }

    fn registry_with_producer() -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        registry.register_spec(ComponentSpec::new("producer", |instance| {
            let out = Arc::new(OutputPort::new(instance, "out", false));
            let task = Task::new("producer", instance, Box::new(Producer { out: out.clone() }));
            task.service().add_port(out);
            task
        }));
        registry
    }

    #[test]
    fn builds_a_single_component_with_no_connections() {
        let registry = registry_with_producer();
        let descriptor = Descriptor {
            libraries: vec![],
            components: vec![ComponentDecl {
                type_name: "producer".to_string(),
                instance_name: "p1".to_string(),
                attributes: HashMap::new(),
                owner: None,
            }],
            connections: vec![],
            activities: vec![],
        };
        let app = build_application(&registry, &descriptor).unwrap();
        assert!(app.task("p1").is_some());
    }

    #[test]
    fn rejects_duplicate_wiring_of_the_same_pair() {
        use crate::port::InputPort;

        struct Consumer {
            input: Arc<InputPort<i32>>,
        }
        impl Component for Consumer {
            fn on_update(&mut self) {}
        }

        let registry = registry_with_producer();
        registry.register_spec(ComponentSpec::new("consumer", |instance| {
            let input = Arc::new(InputPort::new(instance, "in", false));
            let task = Task::new("consumer", instance, Box::new(Consumer { input: input.clone() }));
            task.service().add_port(input);
            task
        }));

        let descriptor = Descriptor {
            libraries: vec![],
            components: vec![
                ComponentDecl {
                    type_name: "producer".to_string(),
                    instance_name: "p1".to_string(),
                    attributes: HashMap::new(),
                    owner: None,
                },
                ComponentDecl {
                    type_name: "consumer".to_string(),
                    instance_name: "c1".to_string(),
                    attributes: HashMap::new(),
                    owner: None,
                },
            ],
            connections: vec![
                ConnectionDecl {
                    output: "p1_out".to_string(),
                    input: "c1_in".to_string(),
                    policy: PolicyDecl {
                        data: DataPolicy::Data,
                        lock: LockPolicy::Locked,
                        buffer_size: 1,
                    },
                    event: false,
                },
                ConnectionDecl {
                    output: "p1_out".to_string(),
                    input: "c1_in".to_string(),
                    policy: PolicyDecl {
                        data: DataPolicy::Data,
                        lock: LockPolicy::Locked,
                        buffer_size: 1,
                    },
                    event: false,
                },
            ],
            activities: vec![],
        };
        assert!(matches!(
            build_application(&registry, &descriptor),
            Err(RuntimeError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn unknown_component_type_is_rejected() {
        let registry = Arc::new(Registry::new());
        let descriptor = Descriptor {
            libraries: vec![],
            components: vec![ComponentDecl {
                type_name: "ghost".to_string(),
                instance_name: "g1".to_string(),
                attributes: HashMap::new(),
                owner: None,
            }],
            connections: vec![],
            activities: vec![],
        };
        assert!(matches!(
            build_application(&registry, &descriptor),
            Err(RuntimeError::UnknownComponent(_))
        ));
    }
}
