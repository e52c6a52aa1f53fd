use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::kernel::component::{ComponentBody, InitContext, Requirements};
use crate::kernel::error::Result;
use crate::kernel::thread::{ThreadRole, ThreadToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Declare,
    Initialize,
    PostInitialize,
    Deinitialize,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub component: String,
    pub phase: Phase,
    pub thread: ThreadToken,
    pub role: Option<ThreadRole>,
    pub had_resource: bool,
}

/// Ordered record of every body call made during a test
#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<Event>>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, component: &str, phase: Phase, ctx: Option<&InitContext<'_>>) {
        self.events.lock().push(Event {
            component: component.to_string(),
            phase,
            thread: ThreadToken::current(),
            role: ctx.map(InitContext::role),
            had_resource: ctx.is_some_and(|ctx| ctx.resource().is_some()),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn position(&self, component: &str, phase: Phase) -> usize {
        self.events
            .lock()
            .iter()
            .position(|e| e.component == component && e.phase == phase)
            .unwrap_or_else(|| panic!("no {:?} event for '{}'", phase, component))
    }

    pub fn event(&self, component: &str, phase: Phase) -> Event {
        self.events()[self.position(component, phase)].clone()
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.events.lock().iter().filter(|e| e.phase == phase).count()
    }

    /// Names in the order they reached `phase`
    pub fn order_of(&self, phase: Phase) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.phase == phase)
            .map(|e| e.component.clone())
            .collect()
    }

    /// Most bodies ever inside `initialize` at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    /// Every dependency finished post-initialization before the dependent
    /// started initializing
    pub fn assert_dependency_order(&self, edges: &[(String, String)]) {
        for (dependent, dependency) in edges {
            assert!(
                self.position(dependency, Phase::PostInitialize)
                    < self.position(dependent, Phase::Initialize),
                "'{}' initialized before its dependency '{}' was done",
                dependent,
                dependency
            );
        }
    }
}

/// Body that records each call into a shared journal
pub struct Tracked {
    name: String,
    journal: Arc<Journal>,
    declared: Vec<String>,
    fail_initialize: bool,
    fail_deinitialize: bool,
    work: std::time::Duration,
}

impl Tracked {
    pub fn new(name: &str, journal: &Arc<Journal>) -> Self {
        Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            declared: Vec::new(),
            fail_initialize: false,
            fail_deinitialize: false,
            work: std::time::Duration::ZERO,
        }
    }

    /// Dependency announced from `declare_requirements`
    pub fn declares(mut self, dependency: &str) -> Self {
        self.declared.push(dependency.to_string());
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_deinitialize(mut self) -> Self {
        self.fail_deinitialize = true;
        self
    }

    pub fn working_for(mut self, work: std::time::Duration) -> Self {
        self.work = work;
        self
    }
}

impl ComponentBody for Tracked {
    fn declare_requirements(&self, requirements: &mut Requirements) {
        self.journal.record(&self.name, Phase::Declare, None);
        for dependency in &self.declared {
            requirements.depends_on(dependency.as_str());
        }
    }

    fn initialize(&self, ctx: &InitContext<'_>) -> Result<()> {
        let now = self.journal.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.peak_running.fetch_max(now, Ordering::SeqCst);
        self.journal.record(&self.name, Phase::Initialize, Some(ctx));
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        self.journal.running.fetch_sub(1, Ordering::SeqCst);
        if self.fail_initialize {
            return Err(format!("{} could not start", self.name).into());
        }
        Ok(())
    }

    fn post_initialize(&self, ctx: &InitContext<'_>) -> Result<()> {
        self.journal.record(&self.name, Phase::PostInitialize, Some(ctx));
        Ok(())
    }

    fn deinitialize(&self) -> Result<()> {
        self.journal.record(&self.name, Phase::Deinitialize, None);
        if self.fail_deinitialize {
            return Err(format!("{} could not stop", self.name).into());
        }
        Ok(())
    }
}

/// Minimal pool resource
pub struct TestResource;

impl crate::resource_pool::HandoffResource for TestResource {
    fn make_current(&self) {}
    fn clear_current(&self) {}
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
