//! Operation — `(name, typed callable)`
//!
//! An operation may be invoked synchronously from any thread via
//! [`OperationBase::call`], or enqueued on the owning task for deferred
//! invocation inside that task's execution engine step
//! (`Task::enqueue_operation`).

use std::fmt;

/// A small dynamically typed value used for operation arguments and
/// return values. The framework carries no general serialization (see
/// spec Non-goals); this is just enough of a tagged union for
/// in-process operation calls.
#[derive(Debug, Clone, PartialEq)]
pub enum OpValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for OpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpValue::Unit => write!(f, "()"),
            OpValue::Bool(b) => write!(f, "{b}"),
            OpValue::Int(i) => write!(f, "{i}"),
            OpValue::Float(v) => write!(f, "{v}"),
            OpValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for OpValue {
    fn from(v: i64) -> Self {
        OpValue::Int(v)
    }
}

impl From<&str> for OpValue {
    fn from(v: &str) -> Self {
        OpValue::Str(v.to_string())
    }
}

/// Type-erased handle stored in a [`crate::service::Service`]'s operation
/// table.
pub trait OperationBase: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke the operation synchronously on the calling thread.
    fn call(&self, args: &[OpValue]) -> Result<OpValue, String>;
}

/// A named callable taking a slice of [`OpValue`] and returning one.
pub struct Operation<F>
where
    F: Fn(&[OpValue]) -> Result<OpValue, String> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> Operation<F>
where
    F: Fn(&[OpValue]) -> Result<OpValue, String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> OperationBase for Operation<F>
where
    F: Fn(&[OpValue]) -> Result<OpValue, String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: &[OpValue]) -> Result<OpValue, String> {
        (self.func)(args)
    }
}

/// A queued invocation awaiting the target task's next engine step.
pub struct PendingCall {
    pub operation_name: String,
    pub args: Vec<OpValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invokes_synchronously() {
        let op = Operation::new("double", |args: &[OpValue]| match args {
            [OpValue::Int(n)] => Ok(OpValue::Int(n * 2)),
            _ => Err("expected one int arg".to_string()),
        });
        assert_eq!(op.call(&[OpValue::Int(21)]), Ok(OpValue::Int(42)));
    }

    #[test]
    fn reports_argument_errors() {
        let op = Operation::new("double", |args: &[OpValue]| match args {
            [OpValue::Int(n)] => Ok(OpValue::Int(n * 2)),
            _ => Err("expected one int arg".to_string()),
        });
        assert!(op.call(&[]).is_err());
    }
}
