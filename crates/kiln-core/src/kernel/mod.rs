//! # Kiln Core Kernel
//!
//! The `kernel` module holds the pieces every other module builds on.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Component Lifecycle**: the nine-state [`ComponentState`] machine and the
//!   [`Component`] node with its dependency bookkeeping, plus the
//!   [`ComponentBody`] trait components implement, all in the `component`
//!   submodule.
//! - **Thread Identity**: [`ThreadToken`] and [`ThreadRole`] in the `thread`
//!   submodule, used to partition work between the designated thread and
//!   workers.
//! - **Core Constants**: thread caps and defaults via the `constants` submodule.
//! - **Error Handling**: [`Error`], [`LifecycleError`], the `Result` alias and
//!   the [`fatal`](error::fatal) abort path in the `error` submodule.
pub mod component;
pub mod constants;
pub mod error;
pub mod thread;

pub use component::{
    Component, ComponentBody, ComponentId, ComponentState, InitContext, NoopBody, Requirements,
};
pub use error::{Error, LifecycleError, Result};
pub use thread::{ThreadRole, ThreadToken};

// Test module declaration
#[cfg(test)]
mod tests;
