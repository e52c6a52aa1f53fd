/// Library name used in log output
pub const APP_NAME: &str = "Kiln";

/// Library version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hard cap on scheduler worker threads and on worker pool entries
pub const MAX_WORKER_THREADS: usize = 8;

/// Default interval at which idle scheduler threads re-scan the graph
pub const DEFAULT_IDLE_POLL_MS: u64 = 50;

/// Name prefix for scheduler worker threads
pub const WORKER_THREAD_PREFIX: &str = "kiln-worker";
