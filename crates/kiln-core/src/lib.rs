pub mod config;
pub mod kernel;
pub mod resource_pool;
pub mod scheduler;

// Re-export key public types for hosts
pub use config::LaunchConfig;
pub use kernel::component::{
    Component, ComponentBody, ComponentId, ComponentState, InitContext, Requirements,
};
pub use kernel::error::{Error as KernelError, LifecycleError};
pub use kernel::thread::{ThreadRole, ThreadToken};
pub use resource_pool::{HandoffResource, PoolGuard, PoolToken, PrimaryResourceHost, ResourcePool};
pub use scheduler::Registry;
