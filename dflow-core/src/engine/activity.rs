//! Activity — the scheduler binding tasks to OS threads.
//!
//! A `SequentialActivity` drives one or more engines on the calling
//! thread: `start()` blocks inside the loop, either running periodically
//! (fixed-rate sleep, preemptible by a trigger or stop request) or purely
//! event-driven (parked until triggered), and only returns once `stop()`
//! has flipped it off. It is meant to be started from a process's main
//! thread, or from a thread the caller has spawned for that purpose. A
//! `ParallelActivity` gives each bound engine its own thread instead, and
//! its `start()` returns as soon as those threads are spawned. Both
//! satisfy [`ActivityHandle`], so a task only ever holds a trait object
//! and never needs to know which scheduling strategy it was bound to.
//! Peer tasks (invoked by their owner's `on_update` rather than scheduled
//! independently) simply never have an activity bound.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::engine::execution::ExecutionEngine;

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

/// What an `Activity` schedules engines against.
pub trait ActivityHandle: Send + Sync {
    fn start(&self) -> crate::error::Result<()>;
    fn stop(&self);
    fn join(&self);
    /// Wake a parked periodic/event-driven loop ahead of its next tick.
    fn trigger(&self);
    fn is_active(&self) -> bool;
}

struct Trigger {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl Trigger {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn fire(&self) {
        let mut pending = self.mutex.lock().expect("trigger lock poisoned");
        *pending = true;
        self.condvar.notify_one();
    }

    /// Wait up to `timeout` (or forever if `None`) for a pending trigger,
    /// consuming it. Returns `false` if the wait elapsed with no trigger.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.mutex.lock().expect("trigger lock poisoned");
        if !*pending {
            pending = match timeout {
                Some(d) => {
                    let (guard, _) = self
                        .condvar
                        .wait_timeout_while(pending, d, |p| !*p)
                        .expect("trigger condvar poisoned");
                    guard
                }
                None => self
                    .condvar
                    .wait_while(pending, |p| !*p)
                    .expect("trigger condvar poisoned"),
            };
        }
        let fired = *pending;
        *pending = false;
        fired
    }
}

fn pin_to_cpu(cpu: usize) {
    let mut set = CpuSet::new();
    if set.set(cpu).is_ok() {
        if let Err(e) = sched_setaffinity(Pid::from_raw(0), &set) {
            warn!(cpu, error = %e, "failed to set cpu affinity");
        }
    }
}

/// Drives one or more engines on the thread that calls `start()`.
///
/// `period`: `Some(d)` for a fixed-rate loop, `None` for a purely
/// event-driven loop that only steps when triggered. `start()` blocks
/// inside this loop until `stop()` is called from another thread; it is
/// intended for the process's main thread, matching a launcher that
/// starts one sequential activity and lets it own the thread for the
/// life of the process.
pub struct SequentialActivity {
    engines: Vec<Arc<ExecutionEngine>>,
    period: Option<Duration>,
    cpu_affinity: Option<usize>,
    running: AtomicBool,
    trigger: Trigger,
}

impl SequentialActivity {
    pub fn new(engines: Vec<Arc<ExecutionEngine>>, period: Option<Duration>, cpu_affinity: Option<usize>) -> Self {
        Self {
            engines,
            period,
            cpu_affinity,
            running: AtomicBool::new(false),
            trigger: Trigger::new(),
        }
    }
}

impl ActivityHandle for SequentialActivity {
    /// Blocks on the calling thread until `stop()` is called. Callers
    /// that need `start()` to return promptly must spawn their own
    /// thread and call `start()` from it.
    fn start(&self) -> crate::error::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for engine in &self.engines {
            engine.init()?;
        }
        if let Some(cpu) = self.cpu_affinity {
            pin_to_cpu(cpu);
        }
        let mut next_tick = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            for engine in &self.engines {
                if let Err(e) = engine.step() {
                    error!(error = %e, "engine step failed");
                }
            }
            match self.period {
                Some(d) => {
                    next_tick += d;
                    let now = Instant::now();
                    if next_tick > now {
                        self.trigger.wait(Some(next_tick - now));
                    }
                }
                None => {
                    self.trigger.wait(None);
                }
            }
        }
        for engine in &self.engines {
            engine.finalize();
        }
        Ok(())
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.trigger.fire();
    }

    /// `start()` already runs to completion on the caller's thread, so
    /// there is nothing left to wait on here.
    fn join(&self) {}

    fn trigger(&self) {
        self.trigger.fire();
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Gives each bound engine its own OS thread, event-driven only (no
/// shared period across engines would make "periodic" ambiguous).
pub struct ParallelActivity {
    engines: Vec<Arc<ExecutionEngine>>,
    cpu_affinity: Option<usize>,
    running: Arc<AtomicBool>,
    triggers: Vec<Arc<Trigger>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    active_count: AtomicUsize,
}

impl ParallelActivity {
    pub fn new(engines: Vec<Arc<ExecutionEngine>>, cpu_affinity: Option<usize>) -> Self {
        let triggers = engines.iter().map(|_| Arc::new(Trigger::new())).collect();
        Self {
            engines,
            cpu_affinity,
            running: Arc::new(AtomicBool::new(false)),
            triggers,
            handles: Mutex::new(Vec::new()),
            active_count: AtomicUsize::new(0),
        }
    }
}

impl ActivityHandle for ParallelActivity {
    fn start(&self) -> crate::error::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for engine in &self.engines {
            engine.init()?;
        }
        let mut handles = self.handles.lock().expect("activity handles lock poisoned");
        for (engine, trigger) in self.engines.iter().cloned().zip(self.triggers.iter().cloned()) {
            let cpu_affinity = self.cpu_affinity;
            let running = self.running.clone();
            self.active_count.fetch_add(1, Ordering::SeqCst);
            let join = thread::Builder::new()
                .name("dflow-activity".to_string())
                .spawn(move || {
                    if let Some(cpu) = cpu_affinity {
                        pin_to_cpu(cpu);
                    }
                    while running.load(Ordering::SeqCst) {
                        if let Err(e) = engine.step() {
                            error!(error = %e, "engine step failed");
                        }
                        trigger.wait(None);
                    }
                    engine.finalize();
                    debug!("parallel activity thread exiting");
                })
                .expect("failed to spawn activity thread");
            handles.push(join);
        }
        Ok(())
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for trigger in &self.triggers {
            trigger.fire();
        }
    }

    fn join(&self) {
        let mut handles = self.handles.lock().expect("activity handles lock poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn trigger(&self) {
        for trigger in &self.triggers {
            trigger.fire();
        }
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::engine::task::Task;
    use std::sync::atomic::AtomicU32;

    struct CountingComponent {
        updates: Arc<AtomicU32>,
    }

    impl Component for CountingComponent {
        fn on_update(&mut self) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sequential_activity_steps_until_stopped() {
        let updates = Arc::new(AtomicU32::new(0));
        let task = Arc::new(Task::new(
            "counter",
            "counter1",
            Box::new(CountingComponent { updates: updates.clone() }),
        ));
        task.set_state_for_test(crate::engine::task::TaskState::Stopped);
        let engine = Arc::new(ExecutionEngine::new(task.clone()));
        let activity: Arc<dyn ActivityHandle> = Arc::new(SequentialActivity::new(
            vec![engine],
            Some(Duration::from_millis(5)),
            None,
        ));
        task.bind_activity(activity.clone());

        // start() blocks on the calling thread, so it needs its own thread
        // here the way a real caller would spawn one to keep it non-blocking.
        let runner = {
            let task = task.clone();
            thread::spawn(move || task.start().unwrap())
        };
        thread::sleep(Duration::from_millis(30));
        task.stop();
        runner.join().expect("activity thread panicked");
        assert!(updates.load(Ordering::SeqCst) > 0);
    }
}
