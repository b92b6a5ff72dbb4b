//! Service — the inner namespace shared by every task.
//!
//! Holds the `name → Attribute`, `name → Operation`, `name → Port` tables,
//! the peer list, and optional nested sub-services for attribute/operation
//! grouping. Ports stay flat on the owning task since wiring is by
//! qualified port name.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::attribute::AttributeBase;
use crate::engine::task::Task;
use crate::operation::OperationBase;
use crate::port::PortHandle;

#[derive(Default)]
pub struct Service {
    name: String,
    attributes: RwLock<HashMap<String, Arc<dyn AttributeBase>>>,
    operations: RwLock<HashMap<String, Arc<dyn OperationBase>>>,
    ports: RwLock<HashMap<String, Arc<dyn PortHandle>>>,
    peers: RwLock<Vec<Arc<Task>>>,
    subservices: RwLock<HashMap<String, Arc<Service>>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reject on duplicate name (names in each category are pairwise
    /// distinct within a task); logs and returns `false` rather than a
    /// hard error, since a `DuplicateName` is non-fatal.
    pub fn add_attribute(&self, attr: Arc<dyn AttributeBase>) -> bool {
        let mut attrs = self.attributes.write().expect("attributes lock poisoned");
        if attrs.contains_key(attr.name()) {
            warn!(name = attr.name(), "duplicate attribute name, keeping existing");
            return false;
        }
        attrs.insert(attr.name().to_string(), attr);
        true
    }

    pub fn add_operation(&self, op: Arc<dyn OperationBase>) -> bool {
        let mut ops = self.operations.write().expect("operations lock poisoned");
        if ops.contains_key(op.name()) {
            warn!(name = op.name(), "duplicate operation name, keeping existing");
            return false;
        }
        ops.insert(op.name().to_string(), op);
        true
    }

    pub fn add_port(&self, port: Arc<dyn PortHandle>) -> bool {
        let mut ports = self.ports.write().expect("ports lock poisoned");
        if ports.contains_key(port.qualified_name()) {
            warn!(name = port.qualified_name(), "duplicate port name, keeping existing");
            return false;
        }
        ports.insert(port.qualified_name().to_string(), port);
        true
    }

    pub fn add_peer(&self, peer: Arc<Task>) {
        self.peers.write().expect("peers lock poisoned").push(peer);
    }

    pub fn get_attribute(&self, name: &str) -> Option<Arc<dyn AttributeBase>> {
        self.attributes
            .read()
            .expect("attributes lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn get_operation(&self, name: &str) -> Option<Arc<dyn OperationBase>> {
        self.operations
            .read()
            .expect("operations lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn get_port(&self, name: &str) -> Option<Arc<dyn PortHandle>> {
        self.ports.read().expect("ports lock poisoned").get(name).cloned()
    }

    pub fn peers(&self) -> Vec<Arc<Task>> {
        self.peers.read().expect("peers lock poisoned").clone()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes
            .read()
            .expect("attributes lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn operation_names(&self) -> Vec<String> {
        self.operations
            .read()
            .expect("operations lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn port_names(&self) -> Vec<String> {
        self.ports.read().expect("ports lock poisoned").keys().cloned().collect()
    }

    /// A nested namespace scoped to attribute/operation grouping, created
    /// lazily on first request.
    pub fn provides(&self, name: &str) -> Arc<Service> {
        let mut subservices = self.subservices.write().expect("subservices lock poisoned");
        subservices
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Service::new(name)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::operation::{OpValue, Operation};

    #[test]
    fn rejects_duplicate_attribute_names() {
        let svc = Service::new("root");
        let a: Arc<dyn AttributeBase> = Arc::new(Attribute::<i64>::new("x"));
        let b: Arc<dyn AttributeBase> = Arc::new(Attribute::<i64>::with_value("x", 5));
        assert!(svc.add_attribute(a));
        assert!(!svc.add_attribute(b));
        assert_eq!(svc.get_attribute("x").unwrap().value_string(), "0");
    }

    #[test]
    fn rejects_duplicate_operation_names() {
        let svc = Service::new("root");
        let op1: Arc<dyn OperationBase> =
            Arc::new(Operation::new("hello", |_: &[OpValue]| Ok(OpValue::Unit)));
        let op2: Arc<dyn OperationBase> =
            Arc::new(Operation::new("hello", |_: &[OpValue]| Ok(OpValue::Unit)));
        assert!(svc.add_operation(op1));
        assert!(!svc.add_operation(op2));
    }

    #[test]
    fn subservices_are_created_lazily_and_reused() {
        let svc = Service::new("root");
        let a = svc.provides("diagnostics");
        let b = svc.provides("diagnostics");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
