//! Declare phase and graph drain.
//!
//! The designated thread (the one that calls `launch`) runs the declare phase
//! alone, then either drains the graph by itself (serial) or starts a fixed
//! set of worker threads and returns (parallel). In the parallel case the
//! host is free to provision the worker resource pool while the workers are
//! already draining; the designated thread joins the drain from
//! `wait_until_complete`. Every thread runs the same loop: claim one
//! component under the graph lock, run its bodies with the lock released,
//! complete it under the lock, repeat until nothing is below Ready.
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::LaunchConfig;
use crate::kernel::component::{ComponentId, ComponentState, InitContext, Requirements};
use crate::kernel::constants::{APP_NAME, APP_VERSION, WORKER_THREAD_PREFIX};
use crate::kernel::error::{fatal, LifecycleError};
use crate::kernel::thread::ThreadRole;
use crate::resource_pool::{PoolGuard, ResourcePool};
use crate::scheduler::graph::ClaimFilter;
use crate::scheduler::registry::{Registry, Shared};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveMode {
    /// Designated thread draining everything alone
    Serial,
    /// Designated thread alongside workers
    Designated,
    Worker,
}

impl DriveMode {
    fn role(self) -> ThreadRole {
        match self {
            DriveMode::Serial | DriveMode::Designated => ThreadRole::Designated,
            DriveMode::Worker => ThreadRole::Worker,
        }
    }

    /// `pool_exhausted`: no pool entry will ever exist for a worker, so the
    /// designated thread takes over components that need one.
    fn filter(self, pool_exhausted: bool) -> ClaimFilter {
        match self {
            DriveMode::Serial => ClaimFilter::Any,
            DriveMode::Designated => ClaimFilter::Designated {
                adopt_resource_users: pool_exhausted,
            },
            DriveMode::Worker => ClaimFilter::Worker {
                resource_users: !pool_exhausted,
            },
        }
    }
}

/// A parallel launch whose workers are running and whose designated-thread
/// side still has to run.
pub(crate) struct PendingDrain {
    pool: Option<Arc<ResourcePool>>,
    poll: Duration,
    workers: Vec<JoinHandle<()>>,
    started: Instant,
}

/// Marks the launch aborted if the owning thread unwinds, so no other
/// scheduler thread or waiter is left parked on a graph that will never drain.
struct AbortOnPanic<'a> {
    shared: &'a Shared,
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let current = thread::current();
            self.shared.abort(format!(
                "scheduler thread '{}' panicked",
                current.name().unwrap_or("<unnamed>")
            ));
        }
    }
}

impl Registry {
    /// Declare requirements, then drain the graph serially or with workers.
    ///
    /// Must be called once, on the designated thread. A serial launch returns
    /// once every registered component is Ready. A parallel launch returns as
    /// soon as its workers are running; finish it with
    /// [`wait_until_complete`](Self::wait_until_complete).
    pub fn launch(&self, parallel: bool) {
        let config = if parallel {
            LaunchConfig::parallel()
        } else {
            LaunchConfig::serial()
        };
        self.launch_with(&config, None);
    }

    /// [`launch`](Self::launch) with explicit settings and an optional worker
    /// resource pool.
    ///
    /// The pool may still be unprovisioned: workers that claim a component
    /// needing an entry block until provisioning hands one over, so the host
    /// must provision it before waiting. Without a pool, or once the pool
    /// seals with no entries, those components run on the designated thread,
    /// which always owns its own resource.
    pub fn launch_with(&self, config: &LaunchConfig, pool: Option<Arc<ResourcePool>>) {
        if !self.is_designated_caller() {
            fatal(LifecycleError::WrongThread { operation: "launch" });
        }
        if pool
            .as_ref()
            .is_some_and(|pool| pool.designated() != self.designated_thread())
        {
            fatal(LifecycleError::WrongThread {
                operation: "launch with a pool bound to another designated thread",
            });
        }
        self.checked(|graph| graph.begin_launch());
        let _abort_on_panic = AbortOnPanic {
            shared: &self.shared,
        };

        let started = Instant::now();
        let workers = if config.parallel {
            config.effective_worker_threads()
        } else {
            0
        };
        log::info!(
            "{} v{}: launching {} components ({})",
            APP_NAME,
            APP_VERSION,
            self.len(),
            if workers == 0 {
                "serial".to_string()
            } else {
                format!("parallel, {} workers", workers)
            }
        );

        self.declare_phase();
        let cycle = self.shared.graph.lock().find_cycle();
        if let Some(path) = cycle {
            fatal(LifecycleError::DependencyCycle { path });
        }

        let poll = config.idle_poll();
        if workers == 0 {
            if config.parallel {
                log::info!("No worker threads available; draining serially");
            }
            self.shared.drive(DriveMode::Serial, None, poll);
            self.log_finished(started);
            return;
        }

        let handles = self.spawn_workers(workers, pool.clone(), poll);
        *self.pending.lock() = Some(PendingDrain {
            pool,
            poll,
            workers: handles,
            started,
        });
    }

    /// Resolve every component's requirements in registration order.
    fn declare_phase(&self) {
        log::info!("Declaring component requirements...");
        let ids = self.shared.graph.lock().ids();
        for id in ids {
            let (body, requested) = self.checked(|graph| {
                graph.advance(id, ComponentState::DeclaringRequirements)?;
                let component = graph.get(id)?;
                Ok((component.body(), component.requested().to_vec()))
            });

            let mut requirements = Requirements::new();
            body.declare_requirements(&mut requirements);
            for dependency in requested.iter().chain(requirements.names()) {
                self.declare_dependency(id, dependency);
            }

            self.checked(|graph| graph.advance(id, ComponentState::RequirementsDeclared));
        }
    }

    fn spawn_workers(
        &self,
        workers: usize,
        pool: Option<Arc<ResourcePool>>,
        poll: Duration,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let shared = Arc::clone(&self.shared);
            let pool = pool.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", WORKER_THREAD_PREFIX, index))
                .spawn(move || shared.drive(DriveMode::Worker, pool.as_deref(), poll));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    self.shared.abort(format!("failed to spawn worker #{}", index));
                    fatal(LifecycleError::WorkerSpawn { index, source });
                }
            }
        }
        handles
    }

    /// Designated-thread side of a parallel launch, then join the workers.
    pub(crate) fn finish_drain(&self, pending: PendingDrain) {
        let PendingDrain {
            pool,
            poll,
            workers,
            started,
        } = pending;
        self.shared
            .drive(DriveMode::Designated, pool.as_deref(), poll);

        for handle in workers {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                log::error!("Worker thread '{}' panicked during launch", name);
            }
        }
        if self.shared.graph.lock().aborted().is_none() {
            self.log_finished(started);
        }
    }

    fn log_finished(&self, started: Instant) {
        log::info!(
            "All {} components Ready in {:?}",
            self.len(),
            started.elapsed()
        );
    }
}

impl Shared {
    /// One scheduler thread's loop.
    fn drive(&self, mode: DriveMode, pool: Option<&ResourcePool>, poll: Duration) {
        let _abort_on_panic = AbortOnPanic { shared: self };
        while let Some(id) = self.next_claim(mode, pool, poll) {
            self.run_claimed(id, mode.role(), pool);
        }
    }

    /// Claim the next component for `mode`, parking on the doorbell while
    /// other threads make progress. `None` once the graph is drained or the
    /// launch was aborted elsewhere.
    fn next_claim(
        &self,
        mode: DriveMode,
        pool: Option<&ResourcePool>,
        poll: Duration,
    ) -> Option<ComponentId> {
        let mut graph = self.graph.lock();
        loop {
            if graph.aborted().is_some() || graph.is_drained() {
                return None;
            }
            // Re-read on every pass: the pool may seal while this thread parks.
            let pool_exhausted = pool.is_none_or(ResourcePool::is_sealed_empty);
            match graph.claim(mode.filter(pool_exhausted)) {
                Ok(Some(id)) => return Some(id),
                Ok(None) => {}
                Err(err) => {
                    drop(graph);
                    fatal(err);
                }
            }
            if graph.in_flight() == 0 && !graph.any_claimable() {
                let report = graph.stall_report();
                drop(graph);
                fatal(LifecycleError::NoProgress { report });
            }
            // Timed out or rung, the graph is scanned again either way.
            let _ = self.doorbell.wait_for(&mut graph, poll);
        }
    }

    /// Initializing -> Ready for a component this thread claimed.
    fn run_claimed(&self, id: ComponentId, role: ThreadRole, pool: Option<&ResourcePool>) {
        let (name, body, needs_resource) = self.checked(|graph| {
            let component = graph.get(id)?;
            Ok((
                component.name().to_string(),
                component.body(),
                component.requires_resource(),
            ))
        });

        {
            let guard = if needs_resource && role == ThreadRole::Worker {
                match pool.and_then(PoolGuard::acquire_available) {
                    Some(guard) => Some(guard),
                    None => {
                        self.checked(|graph| graph.hand_back(id));
                        self.doorbell.notify_all();
                        return;
                    }
                }
            } else {
                None
            };
            log::debug!("Initializing component '{}' on {}", name, role);
            let ctx = InitContext::new(&name, role, guard.as_ref().and_then(|guard| guard.resource()));
            if let Err(source) = body.initialize(&ctx) {
                fatal(LifecycleError::ComponentFailed {
                    component: name,
                    phase: ComponentState::Initializing,
                    source: Box::new(source),
                });
            }
        }

        self.checked(|graph| {
            graph.advance(id, ComponentState::Initialized)?;
            graph.advance(id, ComponentState::PostInitializing)
        });

        let ctx = InitContext::new(&name, role, None);
        if let Err(source) = body.post_initialize(&ctx) {
            fatal(LifecycleError::ComponentFailed {
                component: name,
                phase: ComponentState::PostInitializing,
                source: Box::new(source),
            });
        }

        self.checked(|graph| graph.complete(id));
        self.doorbell.notify_all();
        log::debug!("Component '{}' is Ready", name);
    }
}
