use std::fmt;

use crate::resource_pool::pool::{PoolToken, ResourcePool};
use crate::resource_pool::HandoffResource;

/// Ties one [`ResourcePool::acquire`] to one [`ResourcePool::release`].
///
/// The token is released when the guard drops, including while unwinding out
/// of a failed component body.
pub struct PoolGuard<'a> {
    pool: &'a ResourcePool,
    token: Option<PoolToken>,
}

impl<'a> PoolGuard<'a> {
    /// Acquire from `pool`, blocking on worker threads
    pub fn acquire(pool: &'a ResourcePool) -> Self {
        let token = pool.acquire();
        Self {
            pool,
            token: Some(token),
        }
    }

    /// Acquire from `pool` unless it sealed without entries
    pub fn acquire_available(pool: &'a ResourcePool) -> Option<Self> {
        let token = pool.acquire_available()?;
        Some(Self {
            pool,
            token: Some(token),
        })
    }

    pub fn token(&self) -> Option<&PoolToken> {
        self.token.as_ref()
    }

    pub fn index(&self) -> Option<usize> {
        self.token.as_ref().and_then(PoolToken::index)
    }

    pub fn resource(&self) -> Option<&dyn HandoffResource> {
        self.token.as_ref().and_then(PoolToken::resource)
    }
}

impl fmt::Debug for PoolGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolGuard").field("token", &self.token).finish()
    }
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.pool.release(token);
        }
    }
}

impl ResourcePool {
    /// Acquire an entry for the duration of the returned guard
    pub fn scoped(&self) -> PoolGuard<'_> {
        PoolGuard::acquire(self)
    }
}
