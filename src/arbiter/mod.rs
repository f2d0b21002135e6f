//! Ownership arbitration
//!
//! Decides whether a registration's address belongs to this node. A
//! registration is local when its address matches the node's hostname
//! case-insensitively, or when it resolves (literal parse or DNS) to an
//! IP bound on a local interface.
//!
//! The orphan sweep, which adopts registrations stranded on nodes that no
//! longer own their address, lives in [`orphan`].

pub mod orphan;

pub use orphan::{OrphanOutcome, OrphanSweep};

use std::net::IpAddr;
use tokio::net::lookup_host;

use crate::error::Result;

/// Who this node is, established once at startup and immutable after.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Lowercased local hostname; may be empty when undeterminable
    hostname: String,

    /// Node name the coordination service knows this agent by
    node_name: String,

    /// IPs bound on local interfaces
    local_ips: Vec<IpAddr>,
}

impl NodeIdentity {
    /// Resolve the local identity: hostname from the environment, IPs from
    /// the interface table, node name from the agent.
    pub fn resolve(node_name: impl Into<String>) -> Result<Self> {
        let hostname = std::env::var("HOSTNAME")
            .unwrap_or_default()
            .to_lowercase();

        let local_ips = if_addrs::get_if_addrs()?
            .into_iter()
            .map(|iface| iface.ip())
            .collect();

        Ok(Self {
            hostname,
            node_name: node_name.into(),
            local_ips,
        })
    }

    /// Construct an identity from known parts.
    pub fn new(
        hostname: impl Into<String>,
        node_name: impl Into<String>,
        local_ips: Vec<IpAddr>,
    ) -> Self {
        Self {
            hostname: hostname.into().to_lowercase(),
            node_name: node_name.into(),
            local_ips,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Does this address belong to the local node?
    ///
    /// DNS resolution failure means "not local", never an error: an
    /// unresolvable address cannot be claimed by anyone.
    pub async fn is_local(&self, address: &str) -> bool {
        if !self.hostname.is_empty() && address.eq_ignore_ascii_case(&self.hostname) {
            return true;
        }

        let candidates: Vec<IpAddr> = match address.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => match lookup_host((address, 0u16)).await {
                Ok(resolved) => resolved.map(|sa| sa.ip()).collect(),
                Err(_) => return false,
            },
        };

        candidates.iter().any(|ip| self.local_ips.contains(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> NodeIdentity {
        NodeIdentity::new(
            "Web01.Example.Net",
            "node1",
            vec!["127.0.0.1".parse().unwrap(), "10.1.2.3".parse().unwrap()],
        )
    }

    #[tokio::test]
    async fn test_hostname_match_is_case_insensitive() {
        let id = identity();
        assert!(id.is_local("web01.example.net").await);
        assert!(id.is_local("WEB01.EXAMPLE.NET").await);
    }

    #[tokio::test]
    async fn test_literal_ip_match() {
        let id = identity();
        assert!(id.is_local("10.1.2.3").await);
        assert!(id.is_local("127.0.0.1").await);
    }

    #[tokio::test]
    async fn test_non_matching_literal_ip() {
        let id = identity();
        assert!(!id.is_local("192.168.77.1").await);
    }

    #[tokio::test]
    async fn test_unresolvable_address_is_not_local() {
        let id = identity();
        // resolution failure yields false, not an error
        assert!(!id.is_local("no-such-host.invalid").await);
    }

    #[tokio::test]
    async fn test_empty_hostname_never_matches() {
        let id = NodeIdentity::new("", "node1", vec![]);
        assert!(!id.is_local("").await);
    }

    #[test]
    fn test_hostname_lowercased_on_construction() {
        assert_eq!(identity().hostname(), "web01.example.net");
    }
}
