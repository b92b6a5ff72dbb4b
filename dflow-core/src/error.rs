//! Error kinds for the dataflow runtime
//!
//! This module defines the closed, matchable error surface described by
//! the framework's error-handling design: assembly-phase errors are fatal
//! and bubble up to the caller, per-task duplicate-name errors are
//! non-fatal and only logged, and policy outcomes like a full `BUFFER`
//! channel are never represented here (see [`crate::connection::WriteStatus`]).

use thiserror::Error;

/// Errors raised by the runtime's core operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `Registry::create` was asked to instantiate a type name that has no
    /// registered [`crate::component::ComponentSpec`].
    #[error("unknown component type '{0}'")]
    UnknownComponent(String),

    /// A shared library could not be opened, or did not export the
    /// well-known registry-accessor symbol.
    #[error("failed to load library '{0}': {1}")]
    LibraryLoadError(String, String),

    /// An `add_attribute` / `add_port` / `add_operation` call collided with
    /// an existing name within the same task. Non-fatal by design: the
    /// task still constructs without the duplicate.
    #[error("duplicate name '{0}' in {1}")]
    DuplicateName(String, &'static str),

    /// The output and input port of a connection have different type
    /// tags.
    #[error("port type mismatch: output port carries {0}, input port carries {1}")]
    PortTypeMismatch(String, String),

    /// A connection, activity binding, or descriptor reference named a
    /// task or port that does not exist in the assembled graph.
    #[error("missing endpoint: {0}")]
    MissingEndpoint(String),

    /// A connection policy violates an invariant: `buffer_size == 0` for a
    /// buffer variant, `LOCK_FREE` combined with `DATA`, `UNSYNC` crossing
    /// an activity boundary, or re-wiring an `(output, input)` pair that
    /// already has a connection.
    #[error("invalid connection policy: {0}")]
    InvalidPolicy(String),

    /// A task's activity binding was never set before `start`/`stop`.
    #[error("no activity bound to task '{0}'")]
    ActivityNotBound(String),

    /// `start` was called on an activity that is already running.
    #[error("activity for '{0}' is already running")]
    AlreadyRunning(String),

    /// `on_config` raised an error; the task transitions to `FATAL` and its
    /// activity is never started.
    #[error("configuration error in task '{0}': {1}")]
    ConfigurationError(String, String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
