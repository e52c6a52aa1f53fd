//! Thread identity tokens.
//!
//! The scheduler never reads "which thread is designated" from global state.
//! Every readiness check and every pool operation compares an explicit
//! [`ThreadToken`] against the designated one it was handed at construction.
use std::fmt;
use std::thread::{self, ThreadId};

use crate::kernel::constants::MAX_WORKER_THREADS;

/// Comparable identity of an OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(ThreadId);

impl ThreadToken {
    /// Token of the calling thread
    pub fn current() -> Self {
        Self(thread::current().id())
    }

    pub fn id(&self) -> ThreadId {
        self.0
    }

    /// Role this token plays relative to the designated thread
    pub fn role(&self, designated: ThreadToken) -> ThreadRole {
        if *self == designated {
            ThreadRole::Designated
        } else {
            ThreadRole::Worker
        }
    }
}

/// Which side of the designated/worker partition a thread is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadRole {
    /// The single thread that owns its own resource for the process lifetime
    Designated,
    /// Any other thread; needs a pool entry for resource-bound work
    Worker,
}

impl ThreadRole {
    pub fn is_designated(self) -> bool {
        matches!(self, ThreadRole::Designated)
    }
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadRole::Designated => write!(f, "designated thread"),
            ThreadRole::Worker => write!(f, "worker thread"),
        }
    }
}

/// Number of hardware threads, falling back to 1 when it cannot be queried.
pub fn hardware_concurrency() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// `min(hardware_concurrency, MAX_WORKER_THREADS)`
pub fn default_worker_capacity() -> usize {
    hardware_concurrency().min(MAX_WORKER_THREADS)
}
