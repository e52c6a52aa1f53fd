use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use serde::Serialize;

use crate::kernel::component::{Component, ComponentId, ComponentState};
use crate::kernel::error::LifecycleError;

/// Which components a scheduler thread may claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimFilter {
    /// Serial drain: any component with resolved requirements
    Any,
    /// Designated side of a parallel drain. With `adopt_resource_users` the
    /// worker components that need a pool entry are pinned and taken too.
    Designated { adopt_resource_users: bool },
    /// Worker side of a parallel drain; components that need a pool entry
    /// only while `resource_users` is set
    Worker { resource_users: bool },
}

impl ClaimFilter {
    fn admits(self, component: &Component) -> bool {
        if !component.requirements_resolved() {
            return false;
        }
        match self {
            ClaimFilter::Any => true,
            ClaimFilter::Designated { adopt_resource_users } => {
                component.runs_on_designated_thread()
                    || (adopt_resource_users && component.requires_resource())
            }
            ClaimFilter::Worker { resource_users } => {
                !component.runs_on_designated_thread()
                    && (resource_users || !component.requires_resource())
            }
        }
    }
}

/// Diagnostic view of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReport {
    pub id: usize,
    pub name: String,
    pub state: ComponentState,
    pub requires_designated_thread: bool,
    /// Moved onto the designated thread because no pool entry could serve it
    pub pinned_to_designated_thread: bool,
    pub needs_resource: bool,
    pub pending: Vec<String>,
    pub completed: Vec<String>,
    pub dependents: Vec<String>,
}

/// Launch progress as published to async waiters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchProgress {
    /// Components that reached Ready (or went past it)
    pub ready: usize,
    pub registered: usize,
    /// Set once a scheduler thread failed
    pub aborted: Option<String>,
}

impl LaunchProgress {
    pub fn is_complete(&self) -> bool {
        self.ready == self.registered
    }
}

/// Central component table.
///
/// Components refer to each other only by [`ComponentId`], an index into
/// `slots`. Slots of unregistered components are emptied but never reused.
#[derive(Debug, Default)]
pub(crate) struct ComponentGraph {
    slots: Vec<Option<Component>>,
    by_name: HashMap<String, ComponentId>,
    /// Registration order, for deterministic diagnostics only
    order: Vec<ComponentId>,
    /// Claimed by a worker that found the pool sealed empty; still
    /// Initializing and counted in `in_flight`
    handed_back: VecDeque<ComponentId>,
    in_flight: usize,
    launched: bool,
    aborted: Option<String>,
}

impl ComponentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        self.order.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_launched(&self) -> bool {
        self.launched
    }

    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    pub fn insert(&mut self, component: Component) -> Result<ComponentId, LifecycleError> {
        if self.launched {
            return Err(LifecycleError::RegistrationClosed {
                component: component.name().to_string(),
            });
        }
        if self.by_name.contains_key(component.name()) {
            return Err(LifecycleError::DuplicateRegistration {
                component: component.name().to_string(),
            });
        }
        let id = ComponentId(self.slots.len());
        self.by_name.insert(component.name().to_string(), id);
        self.order.push(id);
        self.slots.push(Some(component));
        Ok(id)
    }

    pub fn remove(&mut self, name: &str) -> Result<Component, LifecycleError> {
        let id = self
            .resolve(name)
            .ok_or_else(|| LifecycleError::NotRegistered {
                component: name.to_string(),
            })?;
        let component = self.get(id)?;
        if !matches!(
            component.state(),
            ComponentState::Constructed | ComponentState::Deinitialized
        ) {
            return Err(LifecycleError::UnregisterOutOfPhase {
                component: name.to_string(),
                state: component.state(),
            });
        }
        let live: Vec<String> = component
            .dependents()
            .iter()
            .filter_map(|d| self.slot(*d))
            .filter(|d| d.state() != ComponentState::Deinitialized)
            .map(|d| d.name().to_string())
            .collect();
        if !live.is_empty() {
            return Err(LifecycleError::StillReferenced {
                component: name.to_string(),
                dependents: live,
            });
        }

        let component = self.slots[id.0]
            .take()
            .ok_or(LifecycleError::UnknownComponent { id: id.0 })?;
        self.by_name.remove(name);
        self.order.retain(|other| *other != id);
        for other in self.slots.iter_mut().flatten() {
            other.forget(id);
        }
        Ok(component)
    }

    fn slot(&self, id: ComponentId) -> Option<&Component> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn get(&self, id: ComponentId) -> Result<&Component, LifecycleError> {
        self.slot(id)
            .ok_or(LifecycleError::UnknownComponent { id: id.0 })
    }

    fn get_mut(&mut self, id: ComponentId) -> Result<&mut Component, LifecycleError> {
        self.slot_mut(id)
            .ok_or(LifecycleError::UnknownComponent { id: id.0 })
    }

    pub fn resolve(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: ComponentId) -> String {
        self.slot(id)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| format!("<unregistered {}>", id))
    }

    fn names_of(&self, ids: &[ComponentId]) -> Vec<String> {
        ids.iter().map(|id| self.name_of(*id)).collect()
    }

    pub fn begin_launch(&mut self) -> Result<(), LifecycleError> {
        if self.launched {
            return Err(LifecycleError::AlreadyLaunched);
        }
        self.launched = true;
        Ok(())
    }

    pub fn mark_aborted(&mut self, reason: String) {
        if self.aborted.is_none() {
            self.aborted = Some(reason);
        }
    }

    /// Add the edge `id -> other` on both sides. Returns false for a repeat.
    pub fn declare_dependency(&mut self, id: ComponentId, other: &str) -> Result<bool, LifecycleError> {
        let component = self.get(id)?;
        component.check_declaring()?;
        let other_id = self
            .resolve(other)
            .ok_or_else(|| LifecycleError::UnknownDependency {
                component: component.name().to_string(),
                dependency: other.to_string(),
            })?;
        if other_id == id {
            return Err(LifecycleError::SelfDependency {
                component: component.name().to_string(),
            });
        }
        if !self.get_mut(id)?.push_pending(other_id) {
            return Ok(false);
        }
        self.get_mut(other_id)?.push_dependent(id);
        Ok(true)
    }

    pub fn advance(&mut self, id: ComponentId, next: ComponentState) -> Result<(), LifecycleError> {
        self.get_mut(id)?.try_advance(next)
    }

    /// Atomically pick a ready component and move it to Initializing.
    ///
    /// The designated side first takes back anything a worker handed over.
    pub fn claim(&mut self, filter: ClaimFilter) -> Result<Option<ComponentId>, LifecycleError> {
        if matches!(filter, ClaimFilter::Designated { .. }) {
            if let Some(id) = self.handed_back.pop_front() {
                return Ok(Some(id));
            }
        }
        let found = self
            .order
            .iter()
            .copied()
            .find(|id| self.slot(*id).is_some_and(|c| filter.admits(c)));
        let Some(id) = found else {
            return Ok(None);
        };
        let component = self.get_mut(id)?;
        if matches!(filter, ClaimFilter::Designated { .. }) && !component.runs_on_designated_thread() {
            component.pin_to_designated_thread();
            log::warn!(
                "No worker resource available; running '{}' on the designated thread",
                component.name()
            );
        }
        component.try_advance(ComponentState::Initializing)?;
        self.in_flight += 1;
        Ok(Some(id))
    }

    /// Give a claimed component to the designated thread, which always owns
    /// its own resource. It stays Initializing and in flight.
    pub fn hand_back(&mut self, id: ComponentId) -> Result<(), LifecycleError> {
        let component = self.get_mut(id)?;
        if component.state() != ComponentState::Initializing {
            return Err(LifecycleError::IllegalTransition {
                component: component.name().to_string(),
                from: component.state(),
                to: ComponentState::Initializing,
            });
        }
        component.pin_to_designated_thread();
        log::warn!(
            "Resource pool sealed empty; handing '{}' to the designated thread",
            component.name()
        );
        self.handed_back.push_back(id);
        Ok(())
    }

    /// PostInitializing -> Ready, then tell every dependent.
    pub fn complete(&mut self, id: ComponentId) -> Result<(), LifecycleError> {
        self.advance(id, ComponentState::Ready)?;
        self.in_flight = self.in_flight.saturating_sub(1);
        let dependents = self.get(id)?.dependents().to_vec();
        for dependent in dependents {
            if let Some(component) = self.slot_mut(dependent) {
                component.on_dependency_completed(id);
            }
        }
        Ok(())
    }

    /// No registered component is below Ready
    pub fn is_drained(&self) -> bool {
        self.components()
            .all(|c| c.state() >= ComponentState::Ready)
    }

    /// Some component could start Initializing on some thread
    pub fn any_claimable(&self) -> bool {
        self.components().any(Component::requirements_resolved)
    }

    pub fn progress(&self) -> LaunchProgress {
        LaunchProgress {
            ready: self
                .components()
                .filter(|c| c.state() >= ComponentState::Ready)
                .count(),
            registered: self.len(),
            aborted: self.aborted.clone(),
        }
    }

    /// A Ready component none of whose dependents still relies on it.
    pub fn next_to_deinitialize(&self) -> Option<ComponentId> {
        self.order.iter().rev().copied().find(|id| {
            self.slot(*id).is_some_and(|c| {
                c.state() == ComponentState::Ready
                    && c.dependents().iter().all(|d| {
                        self.slot(*d).is_none_or(|dep| {
                            !matches!(
                                dep.state(),
                                ComponentState::Ready | ComponentState::Deinitializing
                            )
                        })
                    })
            })
        })
    }

    fn components(&self) -> impl Iterator<Item = &Component> + '_ {
        self.order.iter().filter_map(|id| self.slot(*id))
    }

    /// First dependency cycle among unresolved edges, as a name path
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for id in &self.order {
            if !visited.contains(id) {
                if let Some(cycle) = self.cycle_dfs(*id, &mut visited, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// DFS to find a cycle
    fn cycle_dfs(
        &self,
        id: ComponentId,
        visited: &mut HashSet<ComponentId>,
        stack: &mut Vec<ComponentId>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        stack.push(id);

        if let Some(component) = self.slot(id) {
            for dep in component.pending_dependencies() {
                if let Some(pos) = stack.iter().position(|s| s == dep) {
                    let mut path = self.names_of(&stack[pos..]);
                    path.push(self.name_of(*dep));
                    return Some(path);
                }
                if !visited.contains(dep) {
                    if let Some(cycle) = self.cycle_dfs(*dep, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        None
    }

    /// Human-readable description of everything still below Ready
    pub fn stall_report(&self) -> String {
        let mut report = String::new();
        for component in self.components().filter(|c| c.state() < ComponentState::Ready) {
            let _ = writeln!(
                report,
                "  '{}' [{}{}] waiting on: {}",
                component.name(),
                component.state(),
                if component.requires_designated_thread() {
                    ", designated thread"
                } else if component.is_pinned_to_designated_thread() {
                    ", pinned to designated thread"
                } else {
                    ""
                },
                self.names_of(component.pending_dependencies()).join(", ")
            );
        }
        if let Some(cycle) = self.find_cycle() {
            let _ = writeln!(report, "  cycle: {}", cycle.join(" -> "));
        }
        report
    }

    pub fn reports(&self) -> Vec<ComponentReport> {
        self.order
            .iter()
            .filter_map(|id| self.slot(*id).map(|c| (*id, c)))
            .map(|(id, c)| ComponentReport {
                id: id.0,
                name: c.name().to_string(),
                state: c.state(),
                requires_designated_thread: c.requires_designated_thread(),
                pinned_to_designated_thread: c.is_pinned_to_designated_thread(),
                needs_resource: c.requires_resource(),
                pending: self.names_of(c.pending_dependencies()),
                completed: self.names_of(c.completed_dependencies()),
                dependents: self.names_of(c.dependents()),
            })
            .collect()
    }
}
