//! dflow — runs a dataflow application assembled from a JSON descriptor,
//! or a small built-in demo pipeline if none is given.

use std::env;
use std::fs;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use dflow_core::connection::{DataPolicy, LockPolicy, ReadStatus};
use dflow_core::{build_application, Component, ComponentSpec, Descriptor, InputPort, OutputPort, Registry, Task};

fn main() -> Result<()> {
    dflow_core::init(None);
    info!("dflow runtime starting");

    let registry = Arc::new(demo_registry());

    let descriptor = match env::args().nth(1) {
        Some(path) => {
            let text = fs::read_to_string(&path).with_context(|| format!("reading descriptor {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing descriptor {path}"))?
        }
        None => demo_descriptor(),
    };

    let app = build_application(&registry, &descriptor)?;
    app.start_all();

    thread::sleep(Duration::from_millis(200));

    app.stop_all();
    info!("dflow runtime stopped");
    Ok(())
}

struct Counter {
    out: Arc<OutputPort<i64>>,
    value: i64,
}

impl Component for Counter {
    fn on_update(&mut self) {
        self.value += 1;
        self.out.write(self.value);
    }
}

struct Printer {
    input: Arc<InputPort<i64>>,
    total: Arc<AtomicI64>,
}

impl Component for Printer {
    fn on_update(&mut self) {
        let mut slot = None;
        if self.input.read(&mut slot) != ReadStatus::NoData {
            if let Some(v) = slot {
                self.total.store(v, Ordering::Relaxed);
            }
        }
    }
}

fn demo_registry() -> Registry {
    let registry = Registry::new();
    registry.register_spec(ComponentSpec::new("counter", |instance| {
        let out = Arc::new(OutputPort::new(instance, "value", false));
        let task = Task::new("counter", instance, Box::new(Counter { out: out.clone(), value: 0 }));
        task.service().add_port(out);
        task
    }));
    registry.register_spec(ComponentSpec::new("printer", |instance| {
        let input = Arc::new(InputPort::new(instance, "value", false));
        let task = Task::new(
            "printer",
            instance,
            Box::new(Printer { input: input.clone(), total: Arc::new(AtomicI64::new(0)) }),
        );
        task.service().add_port(input);
        task
    }));
    registry
}

fn demo_descriptor() -> Descriptor {
    use dflow_core::assembly::{ActivityDecl, ComponentDecl, ConnectionDecl, PolicyDecl};
    use std::collections::HashMap;

    Descriptor {
        libraries: vec![],
        components: vec![
            ComponentDecl {
                type_name: "counter".to_string(),
                instance_name: "c1".to_string(),
                attributes: HashMap::new(),
                owner: None,
            },
            ComponentDecl {
                type_name: "printer".to_string(),
                instance_name: "p1".to_string(),
                attributes: HashMap::new(),
                owner: None,
            },
        ],
        connections: vec![ConnectionDecl {
            output: "c1_value".to_string(),
            input: "p1_value".to_string(),
            policy: PolicyDecl {
                data: DataPolicy::Data,
                lock: LockPolicy::Locked,
                buffer_size: 1,
            },
            event: false,
        }],
        activities: vec![ActivityDecl {
            name: "main".to_string(),
            kind: dflow_core::assembly::ActivityKind::Sequential,
            tasks: vec!["c1".to_string(), "p1".to_string()],
            period_ms: Some(10),
            cpu_affinity: None,
        }],
    }
}
