//! Core data structures shared across the crate
//!
//! The registration document format is whatever operators put under the
//! watched KV prefix, so the serde definitions here accept both the
//! Consul-conventional PascalCase field names and the lowercase spelling
//! that turns up in hand-written documents.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Service Registration
// ============================================================================

/// One declarative service registration, as found in a KV document.
///
/// Health-check definitions are opaque: they are carried through to the
/// agent verbatim and never interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Explicit registration ID; falls back to `name` when absent
    #[serde(
        default,
        rename = "ID",
        alias = "id",
        alias = "Id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    /// Service name
    #[serde(rename = "Name", alias = "name")]
    pub name: String,

    /// Network address (hostname or literal IP)
    #[serde(default, rename = "Address", alias = "address")]
    pub address: String,

    /// Service port
    #[serde(default, rename = "Port", alias = "port")]
    pub port: u16,

    /// Tag set; unordered, but matching is exact-set equality
    #[serde(default, rename = "Tags", alias = "tags")]
    pub tags: Vec<String>,

    /// Opaque single health-check definition
    #[serde(
        default,
        rename = "Check",
        alias = "check",
        skip_serializing_if = "Option::is_none"
    )]
    pub check: Option<serde_json::Value>,

    /// Opaque health-check definitions, passed through untouched
    #[serde(
        default,
        rename = "Checks",
        alias = "checks",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub checks: Vec<serde_json::Value>,
}

impl ServiceRegistration {
    /// Create a minimal registration (used for self-registration and tests)
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: None,
            name,
            address: String::new(),
            port: 0,
            tags: Vec::new(),
            check: None,
            checks: Vec::new(),
        }
    }

    /// The effective registration ID: explicit `id`, falling back to `name`
    pub fn effective_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Cache identity key for this registration
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.effective_id().to_string(),
            address: self.address.clone(),
            port: self.port,
        }
    }

    /// Exact-set tag comparison: every tag in `other` must be present here,
    /// and the deduplicated sizes must agree. Order never matters.
    pub fn tags_match(&self, other: &[String]) -> bool {
        let mine: HashSet<&str> = self.tags.iter().map(String::as_str).collect();
        if mine.len() != other.len() {
            return false;
        }
        other.iter().all(|t| mine.contains(t.as_str()))
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Composite key identifying one registration: `(id-or-name, address, port)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: String,
    pub address: String,
    pub port: u16,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}:{}", self.id, self.address, self.port)
    }
}

// ============================================================================
// KV Entries and Snapshots
// ============================================================================

/// One key-value entry under the watched prefix
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    /// Key path
    pub key: String,

    /// Raw value bytes (already base64-decoded by the client)
    pub value: Bytes,

    /// Monotonic modify index, when the service reports one
    pub modify_index: Option<u64>,
}

impl KvEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            modify_index: None,
        }
    }
}

/// The complete current listing under the watched prefix.
///
/// Always delivered whole, never as a delta; the same snapshot may be
/// redelivered unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub entries: Vec<KvEntry>,
}

impl Snapshot {
    pub fn new(entries: Vec<KvEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tagged event delivered by the KV watcher.
///
/// The payload shape is fixed at the boundary; nothing downstream probes
/// types at runtime.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A fresh full snapshot of the watched prefix
    Snapshot(Snapshot),

    /// The watch terminated and will deliver nothing further
    Ended { reason: String },
}

// ============================================================================
// Catalog Types
// ============================================================================

/// One service instance as reported by the catalog
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogInstance {
    /// Catalog node currently holding the registration
    #[serde(rename = "Node")]
    pub node: String,

    /// Address of that node
    #[serde(default, rename = "Address")]
    pub node_address: String,

    #[serde(rename = "ServiceID")]
    pub service_id: String,

    #[serde(rename = "ServiceName")]
    pub service_name: String,

    /// Service address; empty means "use the node address"
    #[serde(default, rename = "ServiceAddress")]
    pub service_address: String,

    #[serde(default, rename = "ServicePort")]
    pub service_port: u16,

    #[serde(default, rename = "ServiceTags")]
    pub service_tags: Vec<String>,
}

impl CatalogInstance {
    /// The address the instance is actually reachable at
    pub fn effective_address(&self) -> &str {
        if self.service_address.is_empty() {
            &self.node_address
        } else {
            &self.service_address
        }
    }

    /// Cache identity key for this catalog instance
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.service_id.clone(),
            address: self.effective_address().to_string(),
            port: self.service_port,
        }
    }
}

/// One service as reported by the local agent's service listing
#[derive(Debug, Clone, Deserialize)]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Service")]
    pub service: String,

    #[serde(default, rename = "Address")]
    pub address: String,

    #[serde(default, rename = "Port")]
    pub port: u16,

    #[serde(default, rename = "Tags")]
    pub tags: Vec<String>,
}

/// Node name and address from a catalog node lookup
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "Node")]
    pub name: String,

    #[serde(rename = "Address")]
    pub address: String,
}

/// Health-check status values accepted by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(id: Option<&str>, name: &str, address: &str, port: u16) -> ServiceRegistration {
        ServiceRegistration {
            id: id.map(String::from),
            name: name.to_string(),
            address: address.to_string(),
            port,
            tags: Vec::new(),
            check: None,
            checks: Vec::new(),
        }
    }

    #[test]
    fn test_identity_falls_back_to_name() {
        let r = reg(None, "couchbase", "cb01.example.net", 8091);
        assert_eq!(r.effective_id(), "couchbase");
        assert_eq!(r.identity().to_string(), "couchbase;cb01.example.net:8091");
    }

    #[test]
    fn test_identity_prefers_explicit_id() {
        let r = reg(Some("cb01"), "couchbase", "cb01.example.net", 8091);
        assert_eq!(r.identity().to_string(), "cb01;cb01.example.net:8091");
    }

    #[test]
    fn test_tags_match_ignores_order() {
        let mut r = reg(None, "svc", "localhost", 80);
        r.tags = vec!["a".into(), "b".into()];
        assert!(r.tags_match(&["b".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_tags_match_requires_exact_set() {
        let mut r = reg(None, "svc", "localhost", 80);
        r.tags = vec!["a".into(), "b".into()];
        assert!(!r.tags_match(&["a".to_string()]));
        assert!(!r.tags_match(&["a".to_string(), "b".to_string(), "c".to_string()]));
        assert!(!r.tags_match(&["a".to_string(), "c".to_string()]));
    }

    #[test]
    fn test_deserialize_lowercase_fields() {
        let json = r#"{"id":"x","name":"svc","address":"10.0.0.1","port":80,"tags":["t"]}"#;
        let r: ServiceRegistration = serde_json::from_str(json).unwrap();
        assert_eq!(r.id.as_deref(), Some("x"));
        assert_eq!(r.address, "10.0.0.1");
        assert_eq!(r.port, 80);
    }

    #[test]
    fn test_deserialize_pascal_case_fields() {
        let json = r#"{"ID":"x","Name":"svc","Address":"10.0.0.1","Port":80}"#;
        let r: ServiceRegistration = serde_json::from_str(json).unwrap();
        assert_eq!(r.id.as_deref(), Some("x"));
        assert_eq!(r.name, "svc");
    }

    #[test]
    fn test_serialize_uses_consul_convention() {
        let r = reg(Some("x"), "svc", "10.0.0.1", 80);
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"ID\""));
        assert!(json.contains("\"Address\""));
        assert!(!json.contains("\"checks\""));
    }

    #[test]
    fn test_checks_pass_through_opaquely() {
        let json = r#"{"name":"svc","checks":[{"http":"http://x/health","interval":"30s"}]}"#;
        let r: ServiceRegistration = serde_json::from_str(json).unwrap();
        assert_eq!(r.checks.len(), 1);
        assert_eq!(r.checks[0]["interval"], "30s");
    }

    #[test]
    fn test_catalog_instance_effective_address() {
        let with_service_addr = CatalogInstance {
            node: "n1".into(),
            node_address: "10.0.0.1".into(),
            service_id: "svc".into(),
            service_name: "svc".into(),
            service_address: "10.0.0.2".into(),
            service_port: 80,
            service_tags: vec![],
        };
        assert_eq!(with_service_addr.effective_address(), "10.0.0.2");

        let node_only = CatalogInstance {
            service_address: String::new(),
            ..with_service_addr
        };
        assert_eq!(node_only.effective_address(), "10.0.0.1");
    }
}
