//! # Kiln Core Kernel Errors
//!
//! Defines error types shared by the whole scheduler.
//!
//! [`Error`] is the crate-wide error that wraps each subsystem error, and
//! [`LifecycleError`] enumerates the authoring violations the registry and the
//! component state machine refuse to continue past. Those violations are not
//! recoverable: they travel through [`fatal`], which logs them and aborts the
//! current thread with the error text.
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::config::error::ConfigError;
use crate::kernel::component::ComponentState;
use crate::resource_pool::error::ResourcePoolError;

/// Crate-wide error type
#[derive(Debug, ThisError)]
pub enum Error {
    /// Component lifecycle or graph authoring error
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Worker resource pool error
    #[error("Resource pool error: {0}")]
    ResourcePool(#[from] ResourcePoolError),

    /// Launch configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Diagnostics rendering failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message, mostly returned by component bodies
    #[error("Error: {0}")]
    Other(String),
}

/// Violations of the component lifecycle and dependency graph rules.
#[derive(Debug, ThisError)]
pub enum LifecycleError {
    #[error("Illegal transition for component '{component}': {from} -> {to}")]
    IllegalTransition {
        component: String,
        from: ComponentState,
        to: ComponentState,
    },

    #[error("Component '{component}' is already registered")]
    DuplicateRegistration { component: String },

    #[error("Component '{component}' declared a dependency on '{dependency}', which is not registered")]
    UnknownDependency { component: String, dependency: String },

    #[error("No component is registered under id #{id}")]
    UnknownComponent { id: usize },

    #[error("Component '{component}' is not registered")]
    NotRegistered { component: String },

    #[error("Component '{component}' cannot depend on itself")]
    SelfDependency { component: String },

    #[error("Component '{component}' declared a dependency while {state}; dependencies may only be declared while DeclaringRequirements")]
    DeclarationOutOfPhase {
        component: String,
        state: ComponentState,
    },

    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("Scheduler cannot make progress; no component is ready and none is initializing:\n{report}")]
    NoProgress { report: String },

    #[error("Operation '{operation}' must run on the designated thread")]
    WrongThread { operation: &'static str },

    #[error("Registry has already been launched")]
    AlreadyLaunched,

    #[error("Cannot register component '{component}' after launch")]
    RegistrationClosed { component: String },

    #[error("Cannot unregister component '{component}' while {state}; it must be Constructed or Deinitialized")]
    UnregisterOutOfPhase {
        component: String,
        state: ComponentState,
    },

    #[error("Cannot unregister component '{component}'; live dependents remain: {dependents:?}")]
    StillReferenced {
        component: String,
        dependents: Vec<String>,
    },

    #[error("Failed to spawn scheduler worker #{index}: {source}")]
    WorkerSpawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Component '{component}' failed during {phase}: {source}")]
    ComponentFailed {
        component: String,
        phase: ComponentState,
        #[source]
        source: Box<Error>,
    },

    #[error("Launch aborted: {reason}")]
    LaunchAborted { reason: String },
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

/// Logs an unrecoverable authoring error and aborts the calling thread.
///
/// Continuing after one of these would mean scheduling against a corrupted
/// graph, so there is no way back. The panic payload is the error's display
/// text, which names the offending component and the violated rule.
#[track_caller]
pub fn fatal(err: impl Into<Error>) -> ! {
    let err = err.into();
    log::error!("{}", err);
    panic!("{}", err)
}
