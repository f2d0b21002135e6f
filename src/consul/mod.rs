//! Coordination-service client layer
//!
//! The core engines consume the coordination service through the async
//! traits defined here, so they can be exercised against in-memory fakes.
//! [`client::HttpClient`] implements all of them against the Consul v1
//! HTTP API, and [`watch::KvWatcher`] turns blocking queries on the
//! watched prefix into a stream of typed [`WatchEvent`]s.

pub mod client;
pub mod watch;

pub use client::HttpClient;
pub use watch::KvWatcher;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AgentService, CatalogInstance, CheckStatus, NodeInfo, ServiceRegistration, Snapshot,
};
use std::time::Duration;

/// Key-value listing under a prefix
#[async_trait]
pub trait KvApi: Send + Sync {
    /// Fetch the complete current listing under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Snapshot>;
}

/// Operations against the local (or a remote) agent
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Register a service with the agent.
    async fn register(&self, registration: &ServiceRegistration) -> Result<()>;

    /// Deregister a service instance by its registration ID.
    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// List the services currently registered with the agent.
    async fn services(&self) -> Result<Vec<AgentService>>;

    /// The agent's node name.
    async fn node_name(&self) -> Result<String>;

    /// Register a TTL health check.
    async fn register_check(&self, check_id: &str, ttl: Duration) -> Result<()>;

    /// Update the status of a registered health check.
    async fn update_check(&self, check_id: &str, status: CheckStatus, note: &str) -> Result<()>;
}

/// Catalog queries across the cluster
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// All service names known to the catalog.
    async fn service_names(&self) -> Result<Vec<String>>;

    /// All instances of one service.
    async fn service_instances(&self, name: &str) -> Result<Vec<CatalogInstance>>;

    /// Name and address of one catalog node.
    async fn node_info(&self, node: &str) -> Result<NodeInfo>;
}

/// Cluster-wide user events
#[async_trait]
pub trait EventApi: Send + Sync {
    /// Fire a named event with an opaque payload.
    async fn fire(&self, name: &str, payload: &[u8]) -> Result<()>;
}

/// Cross-node agent access for the takeover path
#[async_trait]
pub trait RemoteAgents: Send + Sync {
    /// Deregister a service instance on another node's agent.
    async fn deregister(&self, node_address: &str, port: u16, service_id: &str) -> Result<()>;
}
