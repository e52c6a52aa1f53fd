use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::LaunchConfig;
use crate::kernel::constants::MAX_WORKER_THREADS;
use crate::kernel::error::fatal;
use crate::kernel::thread::{default_worker_capacity, ThreadToken};
use crate::resource_pool::error::ResourcePoolError;
use crate::resource_pool::{HandoffResource, PrimaryResourceHost};

/// One resource instance tracked by the pool.
///
/// An entry with no owner is Provisioned (queued); an entry with an owner is
/// Active on that thread.
pub struct PoolEntry {
    index: usize,
    resource: Box<dyn HandoffResource>,
    owner: Option<ThreadToken>,
}

impl PoolEntry {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn resource(&self) -> &dyn HandoffResource {
        self.resource.as_ref()
    }

    pub fn owner(&self) -> Option<ThreadToken> {
        self.owner
    }

    pub fn is_active(&self) -> bool {
        self.owner.is_some()
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("index", &self.index)
            .field("owner", &self.owner)
            .finish()
    }
}

/// What [`ResourcePool::acquire`] hands out.
#[derive(Debug)]
#[must_use = "a pool token must be released, or use PoolGuard"]
pub enum PoolToken {
    /// Empty token for the designated thread, which keeps its own resource
    Designated,
    /// A pool entry now current on the calling worker
    Entry(PoolEntry),
}

impl PoolToken {
    pub fn is_designated(&self) -> bool {
        matches!(self, PoolToken::Designated)
    }

    pub fn entry(&self) -> Option<&PoolEntry> {
        match self {
            PoolToken::Designated => None,
            PoolToken::Entry(entry) => Some(entry),
        }
    }

    pub fn index(&self) -> Option<usize> {
        self.entry().map(PoolEntry::index)
    }

    pub fn resource(&self) -> Option<&dyn HandoffResource> {
        self.entry().map(PoolEntry::resource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolPhase {
    Unprovisioned,
    Provisioning,
    Sealed,
}

struct PoolState {
    phase: PoolPhase,
    queue: VecDeque<PoolEntry>,
    active: HashMap<usize, ThreadToken>,
    created: usize,
}

/// Fixed-capacity pool of worker resources.
pub struct ResourcePool {
    designated: ThreadToken,
    capacity: usize,
    state: Mutex<PoolState>,
    /// Doorbell only; waiters always re-check the queue
    doorbell: Condvar,
}

impl fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourcePool")
            .field("designated", &self.designated)
            .field("capacity", &self.capacity)
            .field("phase", &state.phase)
            .field("available", &state.queue.len())
            .field("active", &state.active.len())
            .finish()
    }
}

/// Resumes the designated thread's own resource on every exit path.
struct ResumePrimary<'a, H: PrimaryResourceHost + ?Sized>(&'a H);

impl<H: PrimaryResourceHost + ?Sized> Drop for ResumePrimary<'_, H> {
    fn drop(&mut self) {
        self.0.resume_primary();
    }
}

impl ResourcePool {
    /// Pool for `designated` with capacity `min(hardware_concurrency, 8)`
    pub fn new(designated: ThreadToken) -> Self {
        Self::with_capacity(designated, default_worker_capacity())
    }

    /// Pool with an explicit capacity, clamped to the hard cap of 8
    pub fn with_capacity(designated: ThreadToken, capacity: usize) -> Self {
        let capacity = capacity.min(MAX_WORKER_THREADS);
        Self {
            designated,
            capacity,
            state: Mutex::new(PoolState {
                phase: PoolPhase::Unprovisioned,
                queue: VecDeque::with_capacity(capacity),
                active: HashMap::with_capacity(capacity),
                created: 0,
            }),
            doorbell: Condvar::new(),
        }
    }

    /// Pool sized by [`LaunchConfig::effective_pool_capacity`]
    pub fn with_config(designated: ThreadToken, config: &LaunchConfig) -> Self {
        Self::with_capacity(designated, config.effective_pool_capacity())
    }

    pub fn designated(&self) -> ThreadToken {
        self.designated
    }

    /// Upper bound on entries this pool will ever create
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries actually created by provisioning
    pub fn provisioned_entries(&self) -> usize {
        self.state.lock().created
    }

    /// Entries currently queued
    pub fn available(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Entries currently held by worker threads
    pub fn active(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_provisioned(&self) -> bool {
        self.state.lock().phase == PoolPhase::Sealed
    }

    /// Create the pool's entries. Runs once, on the designated thread.
    ///
    /// The designated thread's own resource is suspended through `host` for
    /// the duration and resumed on every exit path. Before each creation
    /// `still_needed` is consulted; once it answers false no further entries
    /// are created, but the ones already enqueued stay valid. A factory error
    /// stops provisioning the same way and is returned.
    ///
    /// Returns the number of entries created.
    pub fn provision<H, F, R, E, P>(
        &self,
        host: &H,
        mut factory: F,
        mut still_needed: P,
    ) -> Result<usize, ResourcePoolError>
    where
        H: PrimaryResourceHost + ?Sized,
        F: FnMut(usize) -> Result<R, E>,
        R: HandoffResource,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
        P: FnMut() -> bool,
    {
        if ThreadToken::current() != self.designated {
            fatal(ResourcePoolError::NotDesignatedThread {
                operation: "provision",
            });
        }
        let already = {
            let mut state = self.state.lock();
            if state.phase == PoolPhase::Unprovisioned {
                state.phase = PoolPhase::Provisioning;
                None
            } else {
                Some(state.created)
            }
        };
        if let Some(entries) = already {
            fatal(ResourcePoolError::AlreadyProvisioned { entries });
        }

        log::info!("Provisioning up to {} worker resources", self.capacity);
        let result = {
            host.suspend_primary();
            let _resume = ResumePrimary(host);
            self.create_entries(&mut factory, &mut still_needed)
        };

        let created = {
            let mut state = self.state.lock();
            state.phase = PoolPhase::Sealed;
            state.created
        };
        // Blocked workers re-check whether an empty pool is now final.
        self.doorbell.notify_all();

        match result {
            Ok(()) => {
                if created < self.capacity {
                    log::warn!(
                        "Resource pool provisioned {} of {} entries; workers will share fewer resources",
                        created,
                        self.capacity
                    );
                } else {
                    log::info!("Resource pool provisioned {} entries", created);
                }
                Ok(created)
            }
            Err(err) => {
                log::error!("Resource pool provisioning stopped after {} entries: {}", created, err);
                Err(err)
            }
        }
    }

    fn create_entries<F, R, E, P>(
        &self,
        factory: &mut F,
        still_needed: &mut P,
    ) -> Result<(), ResourcePoolError>
    where
        F: FnMut(usize) -> Result<R, E>,
        R: HandoffResource,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
        P: FnMut() -> bool,
    {
        for index in 0..self.capacity {
            if !still_needed() {
                log::debug!("Provisioning cancelled before entry #{}", index);
                break;
            }
            let resource = factory(index).map_err(|source| ResourcePoolError::ResourceCreation {
                index,
                source: source.into(),
            })?;
            // Some backends bind a fresh resource to its creating thread.
            resource.clear_current();
            {
                let mut state = self.state.lock();
                state.queue.push_back(PoolEntry {
                    index,
                    resource: Box::new(resource),
                    owner: None,
                });
                state.created += 1;
            }
            self.doorbell.notify_one();
            log::debug!("Provisioned pool entry #{}", index);
        }
        Ok(())
    }

    /// Take an entry for the calling thread.
    ///
    /// The designated thread gets [`PoolToken::Designated`] immediately. Any
    /// other thread blocks until an entry is queued, then owns it with its
    /// resource made current. Waiting spans the time before provisioning
    /// starts; a worker only aborts once the pool sealed without creating a
    /// single entry.
    pub fn acquire(&self) -> PoolToken {
        self.acquire_available()
            .unwrap_or_else(|| fatal(ResourcePoolError::Unprovisioned))
    }

    /// [`acquire`](Self::acquire) that answers `None` instead of aborting when
    /// the pool sealed empty.
    pub fn acquire_available(&self) -> Option<PoolToken> {
        let caller = ThreadToken::current();
        if caller == self.designated {
            return Some(PoolToken::Designated);
        }
        let mut state = self.state.lock();
        loop {
            if let Some(token) = Self::take_entry(&mut state, caller) {
                drop(state);
                return Some(Self::bind(token));
            }
            if Self::sealed_empty(&state) {
                return None;
            }
            self.doorbell.wait(&mut state);
        }
    }

    /// Provisioning finished without creating any entry
    pub fn is_sealed_empty(&self) -> bool {
        Self::sealed_empty(&self.state.lock())
    }

    fn sealed_empty(state: &PoolState) -> bool {
        state.phase == PoolPhase::Sealed && state.created == 0
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PoolToken> {
        let caller = ThreadToken::current();
        if caller == self.designated {
            return Some(PoolToken::Designated);
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(token) = Self::take_entry(&mut state, caller) {
                drop(state);
                return Some(Self::bind(token));
            }
            if Self::sealed_empty(&state) {
                return None;
            }
            if self.doorbell.wait_until(&mut state, deadline).timed_out() {
                let token = Self::take_entry(&mut state, caller);
                drop(state);
                return token.map(Self::bind);
            }
        }
    }

    /// Non-blocking acquire
    pub fn try_acquire(&self) -> Option<PoolToken> {
        let caller = ThreadToken::current();
        if caller == self.designated {
            return Some(PoolToken::Designated);
        }
        let mut state = self.state.lock();
        let token = Self::take_entry(&mut state, caller);
        drop(state);
        token.map(Self::bind)
    }

    fn take_entry(state: &mut MutexGuard<'_, PoolState>, caller: ThreadToken) -> Option<PoolToken> {
        let mut entry = state.queue.pop_front()?;
        entry.owner = Some(caller);
        state.active.insert(entry.index, caller);
        Some(PoolToken::Entry(entry))
    }

    fn bind(token: PoolToken) -> PoolToken {
        if let PoolToken::Entry(entry) = &token {
            entry.resource.make_current();
            log::debug!("Pool entry #{} acquired by {:?}", entry.index, entry.owner);
        }
        token
    }

    /// Return a token obtained from [`acquire`](Self::acquire).
    ///
    /// On the designated thread this only checks that the token is the empty
    /// one. On a worker it runs the thread-release hook, clears current
    /// ownership, re-enqueues the entry and wakes one waiter.
    pub fn release(&self, token: PoolToken) {
        let caller = ThreadToken::current();
        if caller == self.designated {
            if let PoolToken::Entry(entry) = token {
                fatal(ResourcePoolError::InvalidToken {
                    reason: format!("designated thread released pool entry #{}", entry.index),
                });
            }
            return;
        }

        let mut entry = match token {
            PoolToken::Entry(entry) => entry,
            PoolToken::Designated => fatal(ResourcePoolError::InvalidToken {
                reason: "worker thread released the designated thread's empty token".to_string(),
            }),
        };
        if entry.owner != Some(caller) {
            fatal(ResourcePoolError::InvalidToken {
                reason: format!(
                    "pool entry #{} is owned by {:?}, released from {:?}",
                    entry.index, entry.owner, caller
                ),
            });
        }

        entry.resource.on_thread_release();
        entry.resource.clear_current();
        entry.owner = None;
        let index = entry.index;

        let mut state = self.state.lock();
        if state.active.remove(&index) != Some(caller) {
            drop(state);
            fatal(ResourcePoolError::InvalidToken {
                reason: format!("pool entry #{} was not checked out by this pool", index),
            });
        }
        state.queue.push_back(entry);
        drop(state);
        self.doorbell.notify_one();
        log::debug!("Pool entry #{} released by {:?}", index, caller);
    }
}
