//! Connection — policy-parameterized channel between one output port and
//! one input port.
//!
//! A connection is single-producer/single-consumer by construction (an
//! output port may fan out to many connections, an input port may fan in
//! from many, but each individual connection has exactly one writer and
//! one reader). The `(data, lock)` pair selects a concrete channel
//! implementation once, at construction time — there is no
//! per-operation branch on policy.

use crossbeam_queue::ArrayQueue;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, RuntimeError};

/// Delivery discipline: how a write interacts with what is already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DataPolicy {
    /// Keep-last single slot.
    Data,
    /// Bounded FIFO that rejects new writes once full.
    Buffer,
    /// Bounded FIFO that overwrites the oldest entry once full.
    CircularBuffer,
}

/// Concurrency discipline for the channel backing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LockPolicy {
    /// No synchronization. Caller asserts single-threaded access; assembly
    /// additionally rejects wiring this policy across two ports whose
    /// owning tasks are bound to different activities.
    Unsync,
    /// Mutex-guarded critical sections around all operations.
    Locked,
    /// Bounded lock-free SPSC queue. Only valid for `Buffer` /
    /// `CircularBuffer`.
    LockFree,
}

/// Transport discipline. Reserved — only in-process is in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Transport {
    Local,
}

/// The full policy tuple of a connection.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Policy {
    pub data: DataPolicy,
    pub lock: LockPolicy,
    pub transport: Transport,
    pub buffer_size: usize,
}

impl Policy {
    pub fn data_policy(lock: LockPolicy) -> Self {
        Self {
            data: DataPolicy::Data,
            lock,
            transport: Transport::Local,
            buffer_size: 1,
        }
    }

    pub fn buffer(lock: LockPolicy, buffer_size: usize) -> Self {
        Self {
            data: DataPolicy::Buffer,
            lock,
            transport: Transport::Local,
            buffer_size,
        }
    }

    pub fn circular_buffer(lock: LockPolicy, buffer_size: usize) -> Self {
        Self {
            data: DataPolicy::CircularBuffer,
            lock,
            transport: Transport::Local,
            buffer_size,
        }
    }

    /// Validate the tuple in isolation: buffer variants need
    /// `buffer_size >= 1`; `LOCK_FREE` is only valid with a buffer variant.
    pub fn validate(&self) -> Result<()> {
        match self.data {
            DataPolicy::Data => {
                if self.lock == LockPolicy::LockFree {
                    return Err(RuntimeError::InvalidPolicy(
                        "LOCK_FREE is only valid for BUFFER/CIRCULAR_BUFFER".into(),
                    ));
                }
            }
            DataPolicy::Buffer | DataPolicy::CircularBuffer => {
                if self.buffer_size == 0 {
                    return Err(RuntimeError::InvalidPolicy(
                        "buffer_size must be >= 1 for buffer variants".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of draining an incoming connection via `InputPort::read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The returned item was not previously observed on this port.
    NewData,
    /// `DataPolicy::Data` only: the latest-known value was already
    /// consumed by a prior read.
    OldData,
    NoData,
}

/// Aggregate status returned by `OutputPort::write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    AllOk,
    SomeDropped,
    NoneConnected,
}

/// Per-connection outcome used internally to decide whether to fire the
/// destination's trigger and whether the aggregate write status should
/// report a drop.
enum WriteOutcome {
    Delivered { state_became_fresh: bool },
    Dropped,
}

/// A channel implements exactly one `(DataPolicy, LockPolicy)` combination.
trait Channel<T>: Send + Sync {
    fn write(&self, value: T) -> WriteOutcome;
    fn read(&self) -> (ReadStatus, Option<T>);
}

// ---------------------------------------------------------------------
// DATA policy: single keep-last slot.
// ---------------------------------------------------------------------

struct DataSlotUnsync<T> {
    value: UnsafeCell<Option<T>>,
    fresh: UnsafeCell<bool>,
}

// SAFETY: `UNSYNC` connections are only wired when both endpoints share
// an activity (enforced by assembly), so access is from one thread at a
// time by the caller's own contract.
unsafe impl<T: Send> Send for DataSlotUnsync<T> {}
unsafe impl<T: Send> Sync for DataSlotUnsync<T> {}

impl<T: Clone> Channel<T> for DataSlotUnsync<T> {
    fn write(&self, value: T) -> WriteOutcome {
        unsafe {
            *self.value.get() = Some(value);
            *self.fresh.get() = true;
        }
        WriteOutcome::Delivered {
            state_became_fresh: true,
        }
    }

    fn read(&self) -> (ReadStatus, Option<T>) {
        unsafe {
            let slot = &*self.value.get();
            match slot {
                None => (ReadStatus::NoData, None),
                Some(v) => {
                    let was_fresh = *self.fresh.get();
                    *self.fresh.get() = false;
                    let status = if was_fresh {
                        ReadStatus::NewData
                    } else {
                        ReadStatus::OldData
                    };
                    (status, Some(v.clone()))
                }
            }
        }
    }
}

struct DataSlotLocked<T> {
    inner: Mutex<(Option<T>, bool)>,
}

impl<T: Clone + Send> Channel<T> for DataSlotLocked<T> {
    fn write(&self, value: T) -> WriteOutcome {
        let mut guard = self.inner.lock().expect("data slot lock poisoned");
        guard.0 = Some(value);
        guard.1 = true;
        WriteOutcome::Delivered {
            state_became_fresh: true,
        }
    }

    fn read(&self) -> (ReadStatus, Option<T>) {
        let mut guard = self.inner.lock().expect("data slot lock poisoned");
        match &guard.0 {
            None => (ReadStatus::NoData, None),
            Some(v) => {
                let value = v.clone();
                let status = if guard.1 {
                    ReadStatus::NewData
                } else {
                    ReadStatus::OldData
                };
                guard.1 = false;
                (status, Some(value))
            }
        }
    }
}

// ---------------------------------------------------------------------
// BUFFER / CIRCULAR_BUFFER policy: bounded FIFO.
// ---------------------------------------------------------------------

struct BufferUnsync<T> {
    queue: UnsafeCell<VecDeque<T>>,
    capacity: usize,
    overwrite: bool,
}

unsafe impl<T: Send> Send for BufferUnsync<T> {}
unsafe impl<T: Send> Sync for BufferUnsync<T> {}

impl<T> Channel<T> for BufferUnsync<T> {
    fn write(&self, value: T) -> WriteOutcome {
        unsafe {
            let q = &mut *self.queue.get();
            if q.len() < self.capacity {
                q.push_back(value);
                WriteOutcome::Delivered {
                    state_became_fresh: q.len() == 1,
                }
            } else if self.overwrite {
                q.pop_front();
                q.push_back(value);
                WriteOutcome::Delivered {
                    state_became_fresh: false,
                }
            } else {
                WriteOutcome::Dropped
            }
        }
    }

    fn read(&self) -> (ReadStatus, Option<T>) {
        unsafe {
            let q = &mut *self.queue.get();
            match q.pop_front() {
                Some(v) => (ReadStatus::NewData, Some(v)),
                None => (ReadStatus::NoData, None),
            }
        }
    }
}

struct BufferLocked<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    overwrite: bool,
}

impl<T: Send> Channel<T> for BufferLocked<T> {
    fn write(&self, value: T) -> WriteOutcome {
        let mut q = self.queue.lock().expect("buffer lock poisoned");
        if q.len() < self.capacity {
            q.push_back(value);
            WriteOutcome::Delivered {
                state_became_fresh: q.len() == 1,
            }
        } else if self.overwrite {
            q.pop_front();
            q.push_back(value);
            WriteOutcome::Delivered {
                state_became_fresh: false,
            }
        } else {
            WriteOutcome::Dropped
        }
    }

    fn read(&self) -> (ReadStatus, Option<T>) {
        let mut q = self.queue.lock().expect("buffer lock poisoned");
        match q.pop_front() {
            Some(v) => (ReadStatus::NewData, Some(v)),
            None => (ReadStatus::NoData, None),
        }
    }
}

struct BufferLockFree<T> {
    queue: ArrayQueue<T>,
    overwrite: bool,
    was_empty: AtomicBool,
}

impl<T: Send> Channel<T> for BufferLockFree<T> {
    fn write(&self, value: T) -> WriteOutcome {
        let became_fresh = self.queue.is_empty();
        if self.overwrite {
            // `force_push` evicts the oldest entry when full, matching
            // CIRCULAR_BUFFER's overwrite semantics.
            self.queue.force_push(value);
            WriteOutcome::Delivered {
                state_became_fresh: became_fresh,
            }
        } else {
            match self.queue.push(value) {
                Ok(()) => WriteOutcome::Delivered {
                    state_became_fresh: became_fresh,
                },
                Err(_) => WriteOutcome::Dropped,
            }
        }
    }

    fn read(&self) -> (ReadStatus, Option<T>) {
        match self.queue.pop() {
            Some(v) => {
                self.was_empty.store(self.queue.is_empty(), Ordering::Relaxed);
                (ReadStatus::NewData, Some(v))
            }
            None => (ReadStatus::NoData, None),
        }
    }
}

fn build_channel<T: Clone + Send + Sync + 'static>(policy: &Policy) -> Box<dyn Channel<T>> {
    match (policy.data, policy.lock) {
        (DataPolicy::Data, LockPolicy::Unsync) => Box::new(DataSlotUnsync {
            value: UnsafeCell::new(None),
            fresh: UnsafeCell::new(false),
        }),
        (DataPolicy::Data, LockPolicy::Locked) => Box::new(DataSlotLocked {
            inner: Mutex::new((None, false)),
        }),
        (DataPolicy::Data, LockPolicy::LockFree) => unreachable!("rejected by Policy::validate"),
        (DataPolicy::Buffer, LockPolicy::Unsync) => Box::new(BufferUnsync {
            queue: UnsafeCell::new(VecDeque::with_capacity(policy.buffer_size)),
            capacity: policy.buffer_size,
            overwrite: false,
        }),
        (DataPolicy::Buffer, LockPolicy::Locked) => Box::new(BufferLocked {
            queue: Mutex::new(VecDeque::with_capacity(policy.buffer_size)),
            capacity: policy.buffer_size,
            overwrite: false,
        }),
        (DataPolicy::Buffer, LockPolicy::LockFree) => Box::new(BufferLockFree {
            queue: ArrayQueue::new(policy.buffer_size),
            overwrite: false,
            was_empty: AtomicBool::new(true),
        }),
        (DataPolicy::CircularBuffer, LockPolicy::Unsync) => Box::new(BufferUnsync {
            queue: UnsafeCell::new(VecDeque::with_capacity(policy.buffer_size)),
            capacity: policy.buffer_size,
            overwrite: true,
        }),
        (DataPolicy::CircularBuffer, LockPolicy::Locked) => Box::new(BufferLocked {
            queue: Mutex::new(VecDeque::with_capacity(policy.buffer_size)),
            capacity: policy.buffer_size,
            overwrite: true,
        }),
        (DataPolicy::CircularBuffer, LockPolicy::LockFree) => Box::new(BufferLockFree {
            queue: ArrayQueue::new(policy.buffer_size),
            overwrite: true,
            was_empty: AtomicBool::new(true),
        }),
    }
}

/// A closure the connection calls to wake the destination activity. Set by
/// application assembly once the destination task's activity binding is
/// known.
pub type TriggerFn = Arc<dyn Fn() + Send + Sync>;

/// The channel between exactly one output port and one input port.
pub struct Connection<T> {
    output_qualified_name: String,
    input_qualified_name: String,
    policy: Policy,
    event: bool,
    channel: Box<dyn Channel<T>>,
    trigger: Option<TriggerFn>,
}

impl<T: Clone + Send + Sync + 'static> Connection<T> {
    pub fn new(
        output_qualified_name: impl Into<String>,
        input_qualified_name: impl Into<String>,
        policy: Policy,
        event: bool,
        trigger: Option<TriggerFn>,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            output_qualified_name: output_qualified_name.into(),
            input_qualified_name: input_qualified_name.into(),
            channel: build_channel(&policy),
            policy,
            event,
            trigger,
        })
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn is_event(&self) -> bool {
        self.event
    }

    pub fn output_qualified_name(&self) -> &str {
        &self.output_qualified_name
    }

    pub fn input_qualified_name(&self) -> &str {
        &self.input_qualified_name
    }

    /// Whether the task named `name` owns either endpoint of this
    /// connection (used for assembly-time diagnostics).
    pub fn touches(&self, task_instance_name: &str) -> bool {
        self.output_qualified_name
            .starts_with(&format!("{task_instance_name}_"))
            || self
                .input_qualified_name
                .starts_with(&format!("{task_instance_name}_"))
    }

    pub(crate) fn write(&self, value: T) -> bool {
        match self.channel.write(value) {
            WriteOutcome::Delivered { state_became_fresh } => {
                if self.event && state_became_fresh {
                    if let Some(trigger) = &self.trigger {
                        trigger();
                    }
                }
                true
            }
            WriteOutcome::Dropped => false,
        }
    }

    pub(crate) fn read(&self) -> (ReadStatus, Option<T>) {
        self.channel.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(policy: Policy) -> Connection<i32> {
        Connection::new("src_out", "dst_in", policy, false, None).unwrap()
    }

    #[test]
    fn data_policy_keeps_last_then_goes_stale() {
        // S1: one output writes 1, 2, 3; first read is NEW_DATA(3), then OLD_DATA.
        let c = conn(Policy::data_policy(LockPolicy::Unsync));
        assert!(c.write(1));
        assert!(c.write(2));
        assert!(c.write(3));
        assert_eq!(c.read(), (ReadStatus::NewData, Some(3)));
        assert_eq!(c.read(), (ReadStatus::OldData, Some(3)));
    }

    #[test]
    fn buffer_drops_once_full() {
        // S2: BUFFER(3) fed 1..5; writes ok,ok,ok,dropped,dropped; reads 1,2,3,NoData.
        let c = conn(Policy::buffer(LockPolicy::Locked, 3));
        let writes: Vec<bool> = (1..=5).map(|v| c.write(v)).collect();
        assert_eq!(writes, vec![true, true, true, false, false]);
        assert_eq!(c.read(), (ReadStatus::NewData, Some(1)));
        assert_eq!(c.read(), (ReadStatus::NewData, Some(2)));
        assert_eq!(c.read(), (ReadStatus::NewData, Some(3)));
        assert_eq!(c.read(), (ReadStatus::NoData, None));
    }

    #[test]
    fn circular_buffer_overwrites_oldest() {
        // S3: CIRCULAR_BUFFER(3) fed 1..5; reads yield 3,4,5.
        let c = conn(Policy::circular_buffer(LockPolicy::Locked, 3));
        for v in 1..=5 {
            c.write(v);
        }
        assert_eq!(c.read(), (ReadStatus::NewData, Some(3)));
        assert_eq!(c.read(), (ReadStatus::NewData, Some(4)));
        assert_eq!(c.read(), (ReadStatus::NewData, Some(5)));
        assert_eq!(c.read(), (ReadStatus::NoData, None));
    }

    #[test]
    fn buffer_lock_free_drops_once_full() {
        let c = conn(Policy::buffer(LockPolicy::LockFree, 2));
        assert!(c.write(1));
        assert!(c.write(2));
        assert!(!c.write(3));
        assert_eq!(c.read(), (ReadStatus::NewData, Some(1)));
        assert_eq!(c.read(), (ReadStatus::NewData, Some(2)));
    }

    #[test]
    fn circular_buffer_lock_free_overwrites() {
        let c = conn(Policy::circular_buffer(LockPolicy::LockFree, 2));
        for v in 1..=4 {
            c.write(v);
        }
        assert_eq!(c.read(), (ReadStatus::NewData, Some(3)));
        assert_eq!(c.read(), (ReadStatus::NewData, Some(4)));
    }

    #[test]
    fn data_lock_free_is_rejected() {
        let policy = Policy::data_policy(LockPolicy::LockFree);
        assert!(Connection::<i32>::new("a_o", "b_i", policy, false, None).is_err());
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let policy = Policy::buffer(LockPolicy::Locked, 0);
        assert!(Connection::<i32>::new("a_o", "b_i", policy, false, None).is_err());
    }

    #[test]
    fn event_trigger_fires_on_state_becoming_fresh() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let trigger: TriggerFn = Arc::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        let c = Connection::new(
            "a_o",
            "b_i",
            Policy::buffer(LockPolicy::Locked, 4),
            true,
            Some(trigger),
        )
        .unwrap();
        c.write(1); // empty -> non-empty, triggers
        c.write(2); // already non-empty, no trigger
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn touches_matches_owning_task() {
        let c = conn(Policy::data_policy(LockPolicy::Unsync));
        assert!(c.touches("src"));
        assert!(c.touches("dst"));
        assert!(!c.touches("other"));
    }
}
