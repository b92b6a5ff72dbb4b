//! Attribute — `(name, typed storage)` with a string-parse setter
//!
//! Attributes are configured from the application descriptor during
//! assembly (`on_config`) and are read-mostly afterward; the runtime does
//! not itself enforce the "read-mostly once running" half of that
//! contract, it is the component's responsibility, same as the original
//! `AttributeBase`.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::RwLock;

/// Type-erased handle stored in a [`crate::service::Service`]'s attribute
/// table so attributes of different `T` can share one name→handle map.
pub trait AttributeBase: Send + Sync {
    fn name(&self) -> &str;

    /// Parse `raw` and store it. Used by application assembly when
    /// applying the descriptor's `(name, value)` attribute list.
    fn set_from_str(&self, raw: &str) -> Result<(), String>;

    fn value_string(&self) -> String;
}

/// A strongly typed attribute.
pub struct Attribute<T> {
    name: String,
    value: RwLock<T>,
}

impl<T> Attribute<T>
where
    T: Clone + Default + Send + Sync,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(T::default()),
        }
    }

    pub fn with_value(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.value.read().expect("attribute lock poisoned").clone()
    }

    pub fn set(&self, value: T) {
        *self.value.write().expect("attribute lock poisoned") = value;
    }
}

impl<T> AttributeBase for Attribute<T>
where
    T: FromStr + Clone + Default + Send + Sync,
    T::Err: Display,
    T: Display,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn set_from_str(&self, raw: &str) -> Result<(), String> {
        let parsed = raw.parse::<T>().map_err(|e| e.to_string())?;
        self.set(parsed);
        Ok(())
    }

    fn value_string(&self) -> String {
        self.get().to_string()
    }
}
