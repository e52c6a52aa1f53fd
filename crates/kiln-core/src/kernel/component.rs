use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::kernel::error::{fatal, LifecycleError, Result};
use crate::kernel::thread::ThreadRole;
use crate::resource_pool::HandoffResource;

/// Lifecycle state of a component.
///
/// The variants are declared in the only order a component may move through
/// them, so `Ord` doubles as "has reached".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    Constructed,
    DeclaringRequirements,
    RequirementsDeclared,
    Initializing,
    Initialized,
    PostInitializing,
    Ready,
    Deinitializing,
    Deinitialized,
}

impl ComponentState {
    /// Every state, in lifecycle order
    pub const ALL: [ComponentState; 9] = [
        ComponentState::Constructed,
        ComponentState::DeclaringRequirements,
        ComponentState::RequirementsDeclared,
        ComponentState::Initializing,
        ComponentState::Initialized,
        ComponentState::PostInitializing,
        ComponentState::Ready,
        ComponentState::Deinitializing,
        ComponentState::Deinitialized,
    ];

    /// Stable string form used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentState::Constructed => "Constructed",
            ComponentState::DeclaringRequirements => "DeclaringRequirements",
            ComponentState::RequirementsDeclared => "RequirementsDeclared",
            ComponentState::Initializing => "Initializing",
            ComponentState::Initialized => "Initialized",
            ComponentState::PostInitializing => "PostInitializing",
            ComponentState::Ready => "Ready",
            ComponentState::Deinitializing => "Deinitializing",
            ComponentState::Deinitialized => "Deinitialized",
        }
    }

    /// The unique legal successor, if any
    pub fn successor(self) -> Option<ComponentState> {
        match self {
            ComponentState::Constructed => Some(ComponentState::DeclaringRequirements),
            ComponentState::DeclaringRequirements => Some(ComponentState::RequirementsDeclared),
            ComponentState::RequirementsDeclared => Some(ComponentState::Initializing),
            ComponentState::Initializing => Some(ComponentState::Initialized),
            ComponentState::Initialized => Some(ComponentState::PostInitializing),
            ComponentState::PostInitializing => Some(ComponentState::Ready),
            ComponentState::Ready => Some(ComponentState::Deinitializing),
            ComponentState::Deinitializing => Some(ComponentState::Deinitialized),
            ComponentState::Deinitialized => None,
        }
    }

    /// Whether `self -> next` is the legal transition
    pub fn can_advance_to(self, next: ComponentState) -> bool {
        self.successor() == Some(next)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable handle to a registered component.
///
/// Ids index the registry's component table and are never reused, so a stale
/// id can only ever miss, never alias another component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub(crate) usize);

impl ComponentId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dependency names collected from a body during the declare phase.
#[derive(Debug, Default)]
pub struct Requirements {
    names: Vec<String>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the component registered as `name` to be Ready first
    pub fn depends_on(&mut self, name: impl Into<String>) -> &mut Self {
        self.names.push(name.into());
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// What a component body sees while it runs.
pub struct InitContext<'a> {
    component: &'a str,
    role: ThreadRole,
    resource: Option<&'a dyn HandoffResource>,
}

impl<'a> InitContext<'a> {
    pub(crate) fn new(
        component: &'a str,
        role: ThreadRole,
        resource: Option<&'a dyn HandoffResource>,
    ) -> Self {
        Self {
            component,
            role,
            resource,
        }
    }

    pub fn component(&self) -> &str {
        self.component
    }

    pub fn role(&self) -> ThreadRole {
        self.role
    }

    pub fn on_designated_thread(&self) -> bool {
        self.role.is_designated()
    }

    /// Pool entry current on this worker, if the component needs one.
    /// Always `None` on the designated thread, which owns its own resource.
    pub fn resource(&self) -> Option<&dyn HandoffResource> {
        self.resource
    }
}

/// Behavior a component runs at each lifecycle phase.
///
/// The scheduler supplies the envelope (transitions, thread placement and
/// resource hand-off); bodies only do their own work. A body returning an
/// error escalates to an abort of the launch.
pub trait ComponentBody: Send + Sync {
    /// Called once on the designated thread while DeclaringRequirements
    fn declare_requirements(&self, _requirements: &mut Requirements) {}

    /// Heavy initialization work, run inside the Initializing phase
    fn initialize(&self, _ctx: &InitContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Run inside the PostInitializing phase, without a pool entry.
    ///
    /// Runs on the thread that ran [`initialize`](Self::initialize), directly
    /// after it. In a parallel launch that is usually a worker, so post
    /// initialization of independent components overlaps and is not a
    /// designated-thread pass. Work that must happen on the designated thread
    /// belongs in a component declared
    /// [`on_designated_thread`](Component::on_designated_thread) that depends
    /// on this one.
    fn post_initialize(&self, _ctx: &InitContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Run inside the Deinitializing phase during shutdown
    fn deinitialize(&self) -> Result<()> {
        Ok(())
    }
}

/// Body for components that only take part in ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBody;

impl ComponentBody for NoopBody {}

/// A named unit with a lifecycle and explicit dependencies.
pub struct Component {
    name: String,
    state: ComponentState,
    requested: Vec<String>,
    pending_dependencies: Vec<ComponentId>,
    completed_dependencies: Vec<ComponentId>,
    dependents: Vec<ComponentId>,
    requires_designated_thread: bool,
    /// Moved onto the designated thread at run time because no pool entry
    /// can serve it; `requires_designated_thread` keeps the declared affinity
    pinned: bool,
    needs_resource: bool,
    body: Arc<dyn ComponentBody>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("pending_dependencies", &self.pending_dependencies)
            .field("completed_dependencies", &self.completed_dependencies)
            .field("dependents", &self.dependents)
            .field("requires_designated_thread", &self.requires_designated_thread)
            .field("pinned", &self.pinned)
            .field("needs_resource", &self.needs_resource)
            .finish()
    }
}

impl Component {
    /// Create a component with a no-op body
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Constructed,
            requested: Vec::new(),
            pending_dependencies: Vec::new(),
            completed_dependencies: Vec::new(),
            dependents: Vec::new(),
            requires_designated_thread: false,
            pinned: false,
            needs_resource: false,
            body: Arc::new(NoopBody),
        }
    }

    /// Attach the behavior run at each phase
    pub fn with_body(mut self, body: impl ComponentBody + 'static) -> Self {
        self.body = Arc::new(body);
        self
    }

    /// Same as [`with_body`](Self::with_body) for an already shared body
    pub fn with_shared_body(mut self, body: Arc<dyn ComponentBody>) -> Self {
        self.body = body;
        self
    }

    /// Request a dependency by name; resolved during the declare phase
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.requested.push(name.into());
        self
    }

    /// Only ever initialize on the designated thread
    pub fn on_designated_thread(mut self) -> Self {
        self.requires_designated_thread = true;
        self
    }

    /// Hold a pool entry while initializing on a worker
    pub fn needs_resource(mut self) -> Self {
        self.needs_resource = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    pub fn requires_designated_thread(&self) -> bool {
        self.requires_designated_thread
    }

    pub fn is_pinned_to_designated_thread(&self) -> bool {
        self.pinned
    }

    /// Declared affinity or a run-time pin
    pub fn runs_on_designated_thread(&self) -> bool {
        self.requires_designated_thread || self.pinned
    }

    pub fn requires_resource(&self) -> bool {
        self.needs_resource
    }

    pub fn pending_dependencies(&self) -> &[ComponentId] {
        &self.pending_dependencies
    }

    pub fn completed_dependencies(&self) -> &[ComponentId] {
        &self.completed_dependencies
    }

    pub fn dependents(&self) -> &[ComponentId] {
        &self.dependents
    }

    pub(crate) fn requested(&self) -> &[String] {
        &self.requested
    }

    pub(crate) fn body(&self) -> Arc<dyn ComponentBody> {
        Arc::clone(&self.body)
    }

    /// Move to `next`, which must be the unique legal successor.
    pub fn try_advance(&mut self, next: ComponentState) -> std::result::Result<(), LifecycleError> {
        if !self.state.can_advance_to(next) {
            return Err(LifecycleError::IllegalTransition {
                component: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        log::debug!("Component '{}': {} -> {}", self.name, self.state, next);
        self.state = next;
        if next == ComponentState::Deinitialized {
            self.completed_dependencies.clear();
        }
        Ok(())
    }

    /// Like [`try_advance`](Self::try_advance), but an illegal transition aborts.
    pub fn advance(&mut self, next: ComponentState) {
        if let Err(err) = self.try_advance(next) {
            fatal(err);
        }
    }

    /// Readiness for a caller on one side of the thread partition.
    ///
    /// Affinity must match exactly: a designated-only (or pinned) component is
    /// never ready for a worker and a worker component is never ready for the
    /// designated thread.
    pub fn is_ready_to_initialize(&self, caller_is_designated_thread: bool) -> bool {
        self.requirements_resolved()
            && self.runs_on_designated_thread() == caller_is_designated_thread
    }

    /// RequirementsDeclared with nothing left pending, regardless of affinity
    pub fn requirements_resolved(&self) -> bool {
        self.state == ComponentState::RequirementsDeclared && self.pending_dependencies.is_empty()
    }

    /// Record that `dep` reached Ready. Returns false when `dep` was not pending.
    pub fn on_dependency_completed(&mut self, dep: ComponentId) -> bool {
        match self.pending_dependencies.iter().position(|id| *id == dep) {
            Some(pos) => {
                self.pending_dependencies.remove(pos);
                self.completed_dependencies.push(dep);
                true
            }
            None => false,
        }
    }

    pub(crate) fn check_declaring(&self) -> std::result::Result<(), LifecycleError> {
        if self.state != ComponentState::DeclaringRequirements {
            return Err(LifecycleError::DeclarationOutOfPhase {
                component: self.name.clone(),
                state: self.state,
            });
        }
        Ok(())
    }

    /// Forward edge. Returns false if the edge already exists.
    pub(crate) fn push_pending(&mut self, dep: ComponentId) -> bool {
        if self.pending_dependencies.contains(&dep) || self.completed_dependencies.contains(&dep) {
            return false;
        }
        self.pending_dependencies.push(dep);
        true
    }

    pub(crate) fn push_dependent(&mut self, dependent: ComponentId) {
        if !self.dependents.contains(&dependent) {
            self.dependents.push(dependent);
        }
    }

    pub(crate) fn forget(&mut self, id: ComponentId) {
        self.pending_dependencies.retain(|d| *d != id);
        self.completed_dependencies.retain(|d| *d != id);
        self.dependents.retain(|d| *d != id);
    }

    pub(crate) fn pin_to_designated_thread(&mut self) {
        self.pinned = true;
    }
}
