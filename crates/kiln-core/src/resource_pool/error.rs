//! # Kiln Core Resource Pool Errors
//!
//! Defines [`ResourcePoolError`]. Everything except
//! [`ResourceCreation`](ResourcePoolError::ResourceCreation) is misuse of the
//! pool and is routed through the kernel's fatal path.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourcePoolError {
    #[error("Invalid pool token: {reason}")]
    InvalidToken { reason: String },

    #[error("Resource pool is already provisioned ({entries} entries); provisioning runs once")]
    AlreadyProvisioned { entries: usize },

    #[error("Resource pool operation '{operation}' must run on the designated thread")]
    NotDesignatedThread { operation: &'static str },

    #[error("Worker thread requested a pool entry but provisioning sealed the pool with no entries")]
    Unprovisioned,

    #[error("Failed to create pool resource #{index}: {source}")]
    ResourceCreation {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}
