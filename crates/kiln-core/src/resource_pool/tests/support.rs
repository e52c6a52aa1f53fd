use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::resource_pool::{HandoffResource, PrimaryResourceHost};

/// Hook counters shared by every resource a test creates
#[derive(Debug, Default)]
pub struct HookCounts {
    pub make_current: AtomicUsize,
    pub clear_current: AtomicUsize,
    pub released: AtomicUsize,
}

impl HookCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct CountingResource {
    pub id: usize,
    counts: Arc<HookCounts>,
}

impl CountingResource {
    pub fn new(id: usize, counts: Arc<HookCounts>) -> Self {
        Self { id, counts }
    }
}

impl HandoffResource for CountingResource {
    fn make_current(&self) {
        self.counts.make_current.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_current(&self) {
        self.counts.clear_current.fetch_add(1, Ordering::SeqCst);
    }

    fn on_thread_release(&self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct CountingHost {
    pub suspended: AtomicUsize,
    pub resumed: AtomicUsize,
}

impl PrimaryResourceHost for CountingHost {
    fn suspend_primary(&self) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_primary(&self) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory producing counted resources, never failing
pub fn counting_factory(
    counts: &Arc<HookCounts>,
) -> impl FnMut(usize) -> Result<CountingResource, std::io::Error> + '_ {
    move |index| Ok(CountingResource::new(index, Arc::clone(counts)))
}
