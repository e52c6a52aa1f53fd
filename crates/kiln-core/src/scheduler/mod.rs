//! # Kiln Core Scheduler
//!
//! The [`Registry`] owns every component and drains the dependency graph
//! during startup:
//!
//! 1. components are registered in any order;
//! 2. `launch` runs a single-threaded declare phase that turns each
//!    component's requested names into graph edges;
//! 3. the graph is drained in dependency order, serially on the designated
//!    thread or in parallel: `launch` starts worker threads and returns, so
//!    the host can provision the resource pool while they run; workers
//!    borrow pool entries around resource-bound bodies;
//! 4. `wait_until_complete` runs the designated thread's share and returns
//!    once everything is Ready (other threads, or the async form, only
//!    wait).
//!
//! Simultaneously ready components may run in any order; the only ordering
//! guarantee is the dependency partial order.
mod graph;
mod launch;
pub mod registry;

pub use graph::{ComponentReport, LaunchProgress};
pub use registry::Registry;

// Test module declaration
#[cfg(test)]
mod tests;
