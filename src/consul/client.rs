//! Consul v1 HTTP API client
//!
//! One [`HttpClient`] talks to one agent. The daemon holds a client for
//! the local agent; the takeover path builds short-lived clients for
//! remote agents via [`HttpClient::for_agent`].
//!
//! Read queries are sent with `?stale` so any server may answer them.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::{AgentApi, CatalogApi, EventApi, KvApi, RemoteAgents};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::models::{
    AgentService, CatalogInstance, CheckStatus, KvEntry, NodeInfo, ServiceRegistration, Snapshot,
};

/// Extra slack on top of the blocking-query wait before the HTTP request
/// itself is timed out.
const BLOCKING_SLACK: Duration = Duration::from_secs(60);

/// Client for one agent's HTTP API
pub struct HttpClient {
    base: Url,
    http: Client,
    timeout: Duration,
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct KvPair {
    #[serde(rename = "Key")]
    key: String,

    /// Base64-encoded value; null for directory placeholders
    #[serde(default, rename = "Value")]
    value: Option<String>,

    #[serde(default, rename = "ModifyIndex")]
    modify_index: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AgentSelf {
    #[serde(rename = "Config")]
    config: AgentSelfConfig,
}

#[derive(Debug, Deserialize)]
struct AgentSelfConfig {
    #[serde(rename = "NodeName")]
    node_name: String,
}

#[derive(Debug, Serialize)]
struct CheckRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
}

#[derive(Debug, Serialize)]
struct CheckUpdate<'a> {
    #[serde(rename = "Status")]
    status: &'a str,
    #[serde(rename = "Output")]
    output: &'a str,
}

#[derive(Debug, Deserialize)]
struct CatalogNodeReply {
    #[serde(rename = "Node")]
    node: Option<NodeInfo>,
}

// ============================================================================
// Client
// ============================================================================

impl HttpClient {
    /// Build a client for the given base URL.
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(address).map_err(|e| Error::config(format!("bad agent address {address}: {e}")))?;
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base,
            http,
            timeout,
        })
    }

    /// Build a client for the local agent and verify it is reachable.
    ///
    /// An unreachable agent is startup-fatal for the daemon.
    pub async fn connect(config: &AgentConfig) -> Result<Self> {
        let client = Self::new(&config.address, Duration::from_secs(config.request_timeout_secs))?;

        client
            .node_name()
            .await
            .map_err(|e| Error::startup(format!("cannot reach agent at {}: {e}", config.address)))?;

        Ok(client)
    }

    /// Build a client for another node's agent, reusing this client's
    /// connection pool.
    pub fn for_agent(&self, host: &str, port: u16) -> Result<Self> {
        let address = format!("http://{host}:{port}");
        let base = Url::parse(&address)
            .map_err(|e| Error::config(format!("bad remote agent address {address}: {e}")))?;

        Ok(Self {
            base,
            http: self.http.clone(),
            timeout: self.timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::config(format!("bad endpoint {path}: {e}")))
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Consul {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.http.get(url).query(query).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn put_json<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.endpoint(path)?;
        let response = self.http.put(url).json(body).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn put_empty(&self, path: &str) -> Result<()> {
        let url = self.endpoint(path)?;
        let response = self.http.put(url).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }

    fn kv_path(prefix: &str) -> String {
        format!("/v1/kv/{}", prefix.trim_start_matches('/'))
    }

    fn snapshot_from_pairs(pairs: Vec<KvPair>) -> Result<Snapshot> {
        let mut entries = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let value = match pair.value {
                Some(encoded) => Bytes::from(BASE64.decode(encoded.as_bytes())?),
                None => Bytes::new(),
            };
            entries.push(KvEntry {
                key: pair.key,
                value,
                modify_index: pair.modify_index,
            });
        }
        Ok(Snapshot::new(entries))
    }

    /// Blocking query against the watched prefix.
    ///
    /// Waits on the server for up to `wait` for the index to move past
    /// `index`, then returns the new index and the full listing. A prefix
    /// with no keys yields an empty snapshot, not an error.
    pub async fn list_blocking(
        &self,
        prefix: &str,
        index: u64,
        wait: Duration,
    ) -> Result<(u64, Snapshot)> {
        let url = self.endpoint(&Self::kv_path(prefix))?;
        let index_param = index.to_string();
        let wait_param = format!("{}s", wait.as_secs());

        let response = self
            .http
            .get(url)
            .query(&[
                ("recurse", ""),
                ("stale", ""),
                ("index", index_param.as_str()),
                ("wait", wait_param.as_str()),
            ])
            .timeout(wait + BLOCKING_SLACK)
            .send()
            .await?;

        let consul_index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if response.status() == StatusCode::NOT_FOUND {
            return Ok((consul_index.unwrap_or(index), Snapshot::default()));
        }

        let response = Self::check_status(response).await?;
        let pairs: Vec<KvPair> = response.json().await?;
        let snapshot = Self::snapshot_from_pairs(pairs)?;

        let index = consul_index
            .or_else(|| snapshot.entries.iter().filter_map(|e| e.modify_index).max())
            .unwrap_or(index);

        Ok((index, snapshot))
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

#[async_trait]
impl KvApi for HttpClient {
    async fn list(&self, prefix: &str) -> Result<Snapshot> {
        let url = self.endpoint(&Self::kv_path(prefix))?;
        let response = self
            .http
            .get(url)
            .query(&[("recurse", ""), ("stale", "")])
            .send()
            .await?;

        // no keys under the prefix yet
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Snapshot::default());
        }

        let response = Self::check_status(response).await?;
        let pairs: Vec<KvPair> = response.json().await?;
        Self::snapshot_from_pairs(pairs)
    }
}

#[async_trait]
impl AgentApi for HttpClient {
    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        self.put_json("/v1/agent/service/register", registration)
            .await
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        self.put_empty(&format!("/v1/agent/service/deregister/{service_id}"))
            .await
    }

    async fn services(&self) -> Result<Vec<AgentService>> {
        let services: HashMap<String, AgentService> =
            self.get_json("/v1/agent/services", &[]).await?;
        Ok(services.into_values().collect())
    }

    async fn node_name(&self) -> Result<String> {
        let info: AgentSelf = self.get_json("/v1/agent/self", &[]).await?;
        Ok(info.config.node_name)
    }

    async fn register_check(&self, check_id: &str, ttl: Duration) -> Result<()> {
        let body = CheckRegistration {
            id: check_id,
            name: check_id,
            ttl: format!("{}s", ttl.as_secs()),
        };
        self.put_json("/v1/agent/check/register", &body).await
    }

    async fn update_check(&self, check_id: &str, status: CheckStatus, note: &str) -> Result<()> {
        let body = CheckUpdate {
            status: status.as_str(),
            output: note,
        };
        self.put_json(&format!("/v1/agent/check/update/{check_id}"), &body)
            .await
    }
}

#[async_trait]
impl CatalogApi for HttpClient {
    async fn service_names(&self) -> Result<Vec<String>> {
        let services: HashMap<String, Vec<String>> = self
            .get_json("/v1/catalog/services", &[("stale", "")])
            .await?;
        Ok(services.into_keys().collect())
    }

    async fn service_instances(&self, name: &str) -> Result<Vec<CatalogInstance>> {
        self.get_json(&format!("/v1/catalog/service/{name}"), &[("stale", "")])
            .await
    }

    async fn node_info(&self, node: &str) -> Result<NodeInfo> {
        let reply: CatalogNodeReply = self
            .get_json(&format!("/v1/catalog/node/{node}"), &[("stale", "")])
            .await?;
        reply.node.ok_or_else(|| Error::Consul {
            status: 404,
            message: format!("node {node} not in catalog"),
        })
    }
}

#[async_trait]
impl EventApi for HttpClient {
    async fn fire(&self, name: &str, payload: &[u8]) -> Result<()> {
        let url = self.endpoint(&format!("/v1/event/fire/{name}"))?;
        let response = self.http.put(url).body(payload.to_vec()).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteAgents for HttpClient {
    async fn deregister(&self, node_address: &str, port: u16, service_id: &str) -> Result<()> {
        let remote = self.for_agent(node_address, port)?;
        AgentApi::deregister(&remote, service_id).await
    }
}
