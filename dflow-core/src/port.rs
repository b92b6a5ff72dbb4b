//! Port — typed directional endpoint owned by a task.
//!
//! `qualified_name = owner_instance_name + "_" + local_name`; this is the
//! identity used for wiring. Resolved via monomorphization
//! (`OutputPort<T>` / `InputPort<T>`) plus a narrow trait-object seam
//! (`PortHandle`) so a `Service`'s port table can hold ports of different
//! element types side by side.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::connection::{Connection, Policy, ReadStatus, TriggerFn, WriteStatus};
use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Type-erased handle stored in a [`crate::service::Service`]'s port
/// table. Carries only identity and metadata — reads/writes go through
/// the strongly typed `InputPort<T>`/`OutputPort<T>` directly.
pub trait PortHandle: Send + Sync {
    fn qualified_name(&self) -> &str;
    fn direction(&self) -> Direction;
    fn is_event(&self) -> bool;
    fn type_tag(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;

    /// Wires `self` (must be an output port) to `input` with `policy`,
    /// building the connection and registering it on both ends. `trigger`
    /// wakes the destination's activity on empty-to-non-empty transitions
    /// when `event` is set. Used by assembly to connect two type-erased
    /// port handles without the caller ever naming the element type `T`.
    fn wire(&self, _input: &dyn PortHandle, _policy: Policy, _event: bool, _trigger: Option<TriggerFn>) -> Result<()> {
        Err(RuntimeError::PortTypeMismatch(
            "input port".to_string(),
            "cannot wire an input port as a source".to_string(),
        ))
    }
}

fn qualify(owner_instance_name: &str, local_name: &str) -> String {
    format!("{owner_instance_name}_{local_name}")
}

/// An output port of element type `T`. Fans out to zero or more outgoing
/// connections.
pub struct OutputPort<T> {
    qualified_name: String,
    is_event: bool,
    connections: RwLock<Vec<Arc<Connection<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> OutputPort<T> {
    pub fn new(owner_instance_name: &str, local_name: &str, is_event: bool) -> Self {
        Self {
            qualified_name: qualify(owner_instance_name, local_name),
            is_event,
            connections: RwLock::new(Vec::new()),
        }
    }

    /// Add an outgoing connection during assembly. Not valid after
    /// `start`.
    pub fn add_connection(&self, connection: Arc<Connection<T>>) {
        self.connections
            .write()
            .expect("output port connections lock poisoned")
            .push(connection);
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .expect("output port connections lock poisoned")
            .len()
    }

    /// Deliver `value` into every outgoing connection. Each connection
    /// applies its policy independently; non-blocking.
    pub fn write(&self, value: T) -> WriteStatus {
        let connections = self
            .connections
            .read()
            .expect("output port connections lock poisoned");
        if connections.is_empty() {
            return WriteStatus::NoneConnected;
        }
        let mut any_dropped = false;
        for conn in connections.iter() {
            let delivered = conn.write(value.clone());
            any_dropped |= !delivered;
        }
        if any_dropped {
            WriteStatus::SomeDropped
        } else {
            WriteStatus::AllOk
        }
    }
}

impl<T: Send + Sync + 'static> PortHandle for OutputPort<T> {
    fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    fn direction(&self) -> Direction {
        Direction::Output
    }

    fn is_event(&self) -> bool {
        self.is_event
    }

    fn type_tag(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn wire(&self, input: &dyn PortHandle, policy: Policy, event: bool, trigger: Option<TriggerFn>) -> Result<()> {
        let input = input
            .as_any()
            .downcast_ref::<InputPort<T>>()
            .ok_or_else(|| RuntimeError::PortTypeMismatch(self.type_name().to_string(), input.type_name().to_string()))?;
        let conn = Arc::new(Connection::new(
            self.qualified_name().to_string(),
            input.qualified_name().to_string(),
            policy,
            event,
            trigger,
        )?);
        self.add_connection(conn.clone());
        input.add_connection(conn);
        Ok(())
    }
}

/// An input port of element type `T`. Fans in from zero or more incoming
/// connections, drained in round-robin order.
pub struct InputPort<T> {
    qualified_name: String,
    is_event: bool,
    connections: RwLock<Vec<Arc<Connection<T>>>>,
    cursor: AtomicUsize,
}

impl<T: Clone + Send + Sync + 'static> InputPort<T> {
    pub fn new(owner_instance_name: &str, local_name: &str, is_event: bool) -> Self {
        Self {
            qualified_name: qualify(owner_instance_name, local_name),
            is_event,
            connections: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn add_connection(&self, connection: Arc<Connection<T>>) {
        self.connections
            .write()
            .expect("input port connections lock poisoned")
            .push(connection);
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .expect("input port connections lock poisoned")
            .len()
    }

    /// Drain from incoming connections in round-robin order until one
    /// yields data.
    pub fn read(&self, out: &mut Option<T>) -> ReadStatus {
        let connections = self
            .connections
            .read()
            .expect("input port connections lock poisoned");
        let n = connections.len();
        if n == 0 {
            *out = None;
            return ReadStatus::NoData;
        }
        let start = self.cursor.load(Ordering::Relaxed) % n;
        for offset in 0..n {
            let idx = (start + offset) % n;
            let (status, value) = connections[idx].read();
            if status != ReadStatus::NoData {
                self.cursor.store((idx + 1) % n, Ordering::Relaxed);
                *out = value;
                return status;
            }
        }
        *out = None;
        ReadStatus::NoData
    }

    /// Drain every incoming connection once, appending each non-empty
    /// result — fan-in without collapsing.
    pub fn read_all(&self, sink: &mut Vec<T>) {
        let connections = self
            .connections
            .read()
            .expect("input port connections lock poisoned");
        for conn in connections.iter() {
            let (status, value) = conn.read();
            if status != ReadStatus::NoData {
                if let Some(v) = value {
                    sink.push(v);
                }
            }
        }
    }
}

impl<T: Send + Sync + 'static> PortHandle for InputPort<T> {
    fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    fn direction(&self) -> Direction {
        Direction::Input
    }

    fn is_event(&self) -> bool {
        self.is_event
    }

    fn type_tag(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{LockPolicy, Policy};

    #[test]
    fn qualified_name_joins_owner_and_local() {
        let p: OutputPort<i32> = OutputPort::new("task1", "v", false);
        assert_eq!(p.qualified_name(), "task1_v");
    }

    #[test]
    fn write_with_no_connections_reports_none_connected() {
        let p: OutputPort<i32> = OutputPort::new("task1", "v", false);
        assert_eq!(p.write(1), WriteStatus::NoneConnected);
    }

    #[test]
    fn fan_out_delivers_to_every_connection() {
        let out: OutputPort<i32> = OutputPort::new("t1", "v", false);
        let in1: InputPort<i32> = InputPort::new("t2", "v", false);
        let in2: InputPort<i32> = InputPort::new("t3", "v", false);
        let c1 = Arc::new(
            Connection::new(
                out.qualified_name().to_string(),
                in1.qualified_name().to_string(),
                Policy::data_policy(LockPolicy::Locked),
                false,
                None,
            )
            .unwrap(),
        );
        let c2 = Arc::new(
            Connection::new(
                out.qualified_name().to_string(),
                in2.qualified_name().to_string(),
                Policy::data_policy(LockPolicy::Locked),
                false,
                None,
            )
            .unwrap(),
        );
        out.add_connection(c1.clone());
        out.add_connection(c2.clone());
        in1.add_connection(c1);
        in2.add_connection(c2);

        assert_eq!(out.write(42), WriteStatus::AllOk);
        let mut slot = None;
        assert_eq!(in1.read(&mut slot), ReadStatus::NewData);
        assert_eq!(slot, Some(42));
        let mut slot2 = None;
        assert_eq!(in2.read(&mut slot2), ReadStatus::NewData);
        assert_eq!(slot2, Some(42));
    }

    #[test]
    fn fan_in_round_robins_across_connections() {
        let in1: InputPort<i32> = InputPort::new("t2", "v", false);
        let c_a = Arc::new(
            Connection::new("ta_v", "t2_v", Policy::buffer(LockPolicy::Locked, 4), false, None).unwrap(),
        );
        let c_b = Arc::new(
            Connection::new("tb_v", "t2_v", Policy::buffer(LockPolicy::Locked, 4), false, None).unwrap(),
        );
        in1.add_connection(c_a.clone());
        in1.add_connection(c_b.clone());
        c_a.write(1);
        c_b.write(2);

        let mut slot = None;
        assert_eq!(in1.read(&mut slot), ReadStatus::NewData);
        assert_eq!(slot, Some(1));
        let mut slot2 = None;
        assert_eq!(in1.read(&mut slot2), ReadStatus::NewData);
        assert_eq!(slot2, Some(2));
    }

    #[test]
    fn read_all_collects_every_incoming_connection_once() {
        let in1: InputPort<i32> = InputPort::new("t2", "v", false);
        let c_a = Arc::new(
            Connection::new("ta_v", "t2_v", Policy::buffer(LockPolicy::Locked, 4), false, None).unwrap(),
        );
        let c_b = Arc::new(
            Connection::new("tb_v", "t2_v", Policy::buffer(LockPolicy::Locked, 4), false, None).unwrap(),
        );
        in1.add_connection(c_a.clone());
        in1.add_connection(c_b.clone());
        c_a.write(1);
        c_b.write(2);

        let mut sink = Vec::new();
        in1.read_all(&mut sink);
        assert_eq!(sink, vec![1, 2]);
    }
}
