use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

use crate::kernel::component::{Component, ComponentId, ComponentState};
use crate::kernel::error::{fatal, LifecycleError, Result};
use crate::kernel::thread::ThreadToken;
use crate::scheduler::graph::{ComponentGraph, ComponentReport, LaunchProgress};
use crate::scheduler::launch::PendingDrain;

/// Owns every registered component and drives their lifecycle.
///
/// All graph bookkeeping sits behind one lock. Bodies run outside it, so
/// sibling threads only contend on the short claim/complete sections.
pub struct Registry {
    pub(crate) shared: Arc<Shared>,
    /// Parallel launch whose designated-thread side has not run yet
    pub(crate) pending: Mutex<Option<PendingDrain>>,
}

/// State shared with the worker threads a parallel launch leaves running.
pub(crate) struct Shared {
    pub(crate) designated: ThreadToken,
    pub(crate) graph: Mutex<ComponentGraph>,
    /// Rung on every completion and on abort; waiters re-check the graph
    pub(crate) doorbell: Condvar,
    progress: watch::Sender<LaunchProgress>,
}

impl Shared {
    /// Run `op` under the graph lock and publish progress. The lock is
    /// released before the result is returned.
    pub(crate) fn with_graph<T>(
        &self,
        op: impl FnOnce(&mut ComponentGraph) -> std::result::Result<T, LifecycleError>,
    ) -> std::result::Result<T, LifecycleError> {
        let mut graph = self.graph.lock();
        let result = op(&mut graph);
        self.progress.send_replace(graph.progress());
        result
    }

    /// [`with_graph`](Self::with_graph), aborting on error
    pub(crate) fn checked<T>(
        &self,
        op: impl FnOnce(&mut ComponentGraph) -> std::result::Result<T, LifecycleError>,
    ) -> T {
        self.with_graph(op).unwrap_or_else(|err| fatal(err))
    }

    /// Record that a scheduler thread failed and wake everyone waiting.
    pub(crate) fn abort(&self, reason: String) {
        {
            let mut graph = self.graph.lock();
            graph.mark_aborted(reason);
            self.progress.send_replace(graph.progress());
        }
        self.doorbell.notify_all();
    }

    /// Park until the graph is drained or the launch aborted.
    fn wait_settled(&self) -> Result<()> {
        let mut graph = self.graph.lock();
        loop {
            if let Some(reason) = graph.aborted() {
                return Err(LifecycleError::LaunchAborted {
                    reason: reason.to_string(),
                }
                .into());
            }
            if graph.is_drained() {
                return Ok(());
            }
            self.doorbell.wait(&mut graph);
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.shared.graph.lock();
        let names: Vec<String> = graph
            .ids()
            .into_iter()
            .map(|id| graph.name_of(id))
            .collect();
        f.debug_struct("Registry")
            .field("designated", &self.shared.designated)
            .field("components", &names)
            .finish()
    }
}

impl Registry {
    /// Registry whose designated thread is the calling thread
    pub fn new() -> Self {
        Self::with_designated_thread(ThreadToken::current())
    }

    pub fn with_designated_thread(designated: ThreadToken) -> Self {
        let (progress, _) = watch::channel(LaunchProgress::default());
        Self {
            shared: Arc::new(Shared {
                designated,
                graph: Mutex::new(ComponentGraph::new()),
                doorbell: Condvar::new(),
                progress,
            }),
            pending: Mutex::new(None),
        }
    }

    pub fn designated_thread(&self) -> ThreadToken {
        self.shared.designated
    }

    pub(crate) fn checked<T>(
        &self,
        op: impl FnOnce(&mut ComponentGraph) -> std::result::Result<T, LifecycleError>,
    ) -> T {
        self.shared.checked(op)
    }

    pub(crate) fn is_designated_caller(&self) -> bool {
        ThreadToken::current() == self.shared.designated
    }

    /// Attach a component. Registering a name twice aborts.
    pub fn register(&self, component: Component) -> ComponentId {
        self.try_register(component).unwrap_or_else(|err| fatal(err))
    }

    /// Attach a component, reporting a duplicate or late registration.
    pub fn try_register(&self, component: Component) -> std::result::Result<ComponentId, LifecycleError> {
        let name = component.name().to_string();
        let id = self.shared.with_graph(|graph| graph.insert(component))?;
        log::debug!("Registered component '{}' as {}", name, id);
        Ok(id)
    }

    /// Detach a component that is Constructed or Deinitialized and that no
    /// live component depends on. Aborts otherwise.
    pub fn unregister(&self, name: &str) -> Component {
        let component = self.checked(|graph| graph.remove(name));
        log::debug!("Unregistered component '{}'", name);
        self.shared.doorbell.notify_all();
        component
    }

    /// Record that `component` depends on the component registered as `other`.
    ///
    /// Only legal while `component` is DeclaringRequirements, which is the
    /// window the launch's declare phase opens for it. Aborts naming `other`
    /// if it was never registered.
    pub fn declare_dependency(&self, component: ComponentId, other: &str) {
        if self.checked(|graph| graph.declare_dependency(component, other)) {
            log::debug!(
                "Component '{}' depends on '{}'",
                self.shared.graph.lock().name_of(component),
                other
            );
        }
    }

    /// Current state of a registered component
    pub fn get_state(&self, component: ComponentId) -> ComponentState {
        self.checked(|graph| graph.get(component).map(Component::state))
    }

    /// Current state by name, if registered
    pub fn state_of(&self, name: &str) -> Option<ComponentState> {
        let graph = self.shared.graph.lock();
        graph
            .resolve(name)
            .and_then(|id| graph.get(id).ok())
            .map(Component::state)
    }

    pub fn id_of(&self, name: &str) -> Option<ComponentId> {
        self.shared.graph.lock().resolve(name)
    }

    pub fn len(&self) -> usize {
        self.shared.graph.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<String> {
        let graph = self.shared.graph.lock();
        graph.ids().into_iter().map(|id| graph.name_of(id)).collect()
    }

    /// Every registered component has reached Ready
    pub fn is_complete(&self) -> bool {
        self.shared.graph.lock().is_drained()
    }

    pub fn progress(&self) -> LaunchProgress {
        self.shared.graph.lock().progress()
    }

    /// Block until every registered component is Ready.
    ///
    /// After a parallel launch the designated thread must call this (or
    /// [`shutdown`](Self::shutdown)): its share of the graph, designated-only
    /// components and anything no pool entry can serve, runs here before the
    /// worker threads are joined. Other threads only wait.
    ///
    /// Returns an error instead if a scheduler thread aborted the launch.
    /// Calling this on the designated thread before launching would never
    /// return and aborts instead.
    pub fn wait_until_complete(&self) -> Result<()> {
        if self.is_designated_caller() {
            let pending = self.pending.lock().take();
            match pending {
                Some(pending) => self.finish_drain(pending),
                None => {
                    let graph = self.shared.graph.lock();
                    if !graph.is_launched() && !graph.is_drained() {
                        drop(graph);
                        fatal(LifecycleError::WrongThread {
                            operation: "wait_until_complete before launch",
                        });
                    }
                }
            }
        }
        self.shared.wait_settled()
    }

    /// Async form of [`wait_until_complete`](Self::wait_until_complete) for
    /// hosts that drive startup from an async runtime.
    pub async fn wait_until_complete_async(&self) -> Result<()> {
        let mut progress = self.shared.progress.subscribe();
        let settled = progress
            .wait_for(|p| p.aborted.is_some() || p.is_complete())
            .await
            .map(|p| p.clone())
            .map_err(|_| LifecycleError::LaunchAborted {
                reason: "registry dropped while waiting".to_string(),
            })?;
        match settled.aborted {
            Some(reason) => Err(LifecycleError::LaunchAborted { reason }.into()),
            None => Ok(()),
        }
    }

    /// Per-component diagnostics in registration order
    pub fn snapshot(&self) -> Vec<ComponentReport> {
        self.shared.graph.lock().reports()
    }

    /// [`snapshot`](Self::snapshot) rendered as pretty JSON
    pub fn snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Deinitialize Ready components, dependents before their dependencies.
    ///
    /// Runs on the designated thread, first finishing a parallel launch that
    /// is still waiting for it. A failing `deinitialize` hook is logged and
    /// the component still reaches Deinitialized so the rest of the graph can
    /// follow; the first such failure is returned.
    pub fn shutdown(&self) -> Result<()> {
        if !self.is_designated_caller() {
            fatal(LifecycleError::WrongThread {
                operation: "shutdown",
            });
        }
        if self.pending.lock().is_some() {
            self.wait_until_complete()?;
        }
        log::info!("Shutting down components...");
        let mut first_error = None;
        let mut count = 0;

        loop {
            let next = self.shared.graph.lock().next_to_deinitialize();
            let Some(id) = next else { break };

            let (name, body) = self.checked(|graph| {
                graph.advance(id, ComponentState::Deinitializing)?;
                let component = graph.get(id)?;
                Ok((component.name().to_string(), component.body()))
            });
            log::info!("Deinitializing component: {}", name);
            if let Err(err) = body.deinitialize() {
                log::error!("Error deinitializing component {}: {}", name, err);
                first_error.get_or_insert(LifecycleError::ComponentFailed {
                    component: name,
                    phase: ComponentState::Deinitializing,
                    source: Box::new(err),
                });
            }
            self.checked(|graph| graph.advance(id, ComponentState::Deinitialized));
            count += 1;
        }

        self.shared.doorbell.notify_all();
        log::info!("Component shutdown complete ({} deinitialized).", count);
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Workers left parked on a registry nobody will drive must exit.
        if self.pending.get_mut().take().is_some() && !self.shared.graph.lock().is_drained() {
            self.shared
                .abort("registry dropped before the launch finished".to_string());
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
