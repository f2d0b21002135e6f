//! regwatch - declarative service-registration sidecar
//!
//! Watches a KV prefix on a Consul-compatible coordination service for
//! service-registration documents and reconciles them into live
//! registrations on the local agent, arbitrating which cluster node owns
//! each network address.
//!
//! # Architecture
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`decode`] - Resilient registration-document decoding
//! - [`reconcile`] - Cache and snapshot diff engine
//! - [`arbiter`] - Address ownership and orphan adoption
//! - [`consul`] - Coordination-service client and KV watch
//! - [`heartbeat`] - TTL refresh for the sidecar's own check
//! - [`daemon`] - Startup sequence and watch loop
//!
//! # Example
//!
//! ```no_run
//! use regwatch::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!     regwatch::daemon::run(config).await?;
//!     Ok(())
//! }
//! ```

pub mod arbiter;
pub mod config;
pub mod consul;
pub mod daemon;
pub mod decode;
pub mod error;
pub mod heartbeat;
pub mod models;
pub mod reconcile;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::decode::{decode_registrations, DecodeError};
    pub use crate::error::{Error, Result};
    pub use crate::models::{Identity, KvEntry, ServiceRegistration, Snapshot, WatchEvent};
    pub use crate::reconcile::{ReconcileCache, ReconcileOutcome, Reconciler};
}

// Direct re-exports for convenience
pub use models::{Identity, ServiceRegistration, Snapshot, WatchEvent};
