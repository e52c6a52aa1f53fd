//! # Kiln Core Resource Pool
//!
//! A bounded pool of exclusive, thread-affine resources (think rendering
//! contexts) handed to worker threads during parallel startup.
//!
//! The designated thread owns its own resource for the process lifetime and
//! never draws from the pool. Worker threads block in
//! [`ResourcePool::acquire`] until an entry is free, and hand it back with
//! [`ResourcePool::release`] or, preferably, by dropping a [`PoolGuard`].
pub mod error;
pub mod guard;
pub mod pool;

pub use error::ResourcePoolError;
pub use guard::PoolGuard;
pub use pool::{PoolEntry, PoolToken, ResourcePool};

/// A resource owned by exactly one thread at a time.
pub trait HandoffResource: Send + 'static {
    /// Bind the resource to the calling thread
    fn make_current(&self);

    /// Unbind the resource from the calling thread
    fn clear_current(&self);

    /// Invalidate thread-local caches tied to this resource before it leaves
    /// the calling thread.
    fn on_thread_release(&self) {}
}

/// Owner of the designated thread's own resource.
///
/// Creating new resource instances may require the designated thread to let
/// go of its own one first; provisioning brackets creation with these calls.
pub trait PrimaryResourceHost {
    fn suspend_primary(&self);
    fn resume_primary(&self);
}

/// Host for backends whose resources can be created while the designated
/// thread keeps its own one bound.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl PrimaryResourceHost for DetachedHost {
    fn suspend_primary(&self) {}
    fn resume_primary(&self) {}
}

// Test module declaration
#[cfg(test)]
mod tests;
