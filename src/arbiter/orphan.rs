//! Orphan adoption
//!
//! A registration is orphaned when its address now belongs to this node
//! but the catalog still shows it held by another node, typically after
//! an address moved between machines. The sweep runs once at startup,
//! before the watch loop: it announces the takeover cluster-wide, then
//! deregisters the stale instance directly on the node that holds it.

use std::sync::Arc;
use tracing::info;

use super::NodeIdentity;
use crate::consul::{CatalogApi, EventApi, RemoteAgents};
use crate::error::Error;
use crate::models::{CatalogInstance, Identity};
use crate::reconcile::ReconcileCache;

/// Result of one orphan sweep.
///
/// Failures are accumulated per instance; one instance's failure never
/// stops the scan.
#[derive(Debug, Default)]
pub struct OrphanOutcome {
    /// Instances successfully taken over
    pub adopted: Vec<Identity>,

    /// `(context, error)` pairs for everything that went wrong
    pub failures: Vec<(String, Error)>,
}

impl OrphanOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One-shot scan of the catalog for registrations stranded on other nodes.
pub struct OrphanSweep {
    node: Arc<NodeIdentity>,
    cache: Arc<ReconcileCache>,
    catalog: Arc<dyn CatalogApi>,
    events: Arc<dyn EventApi>,
    remotes: Arc<dyn RemoteAgents>,
    remote_port: u16,
    event_name: String,
}

impl OrphanSweep {
    pub fn new(
        node: Arc<NodeIdentity>,
        cache: Arc<ReconcileCache>,
        catalog: Arc<dyn CatalogApi>,
        events: Arc<dyn EventApi>,
        remotes: Arc<dyn RemoteAgents>,
        remote_port: u16,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            node,
            cache,
            catalog,
            events,
            remotes,
            remote_port,
            event_name: event_name.into(),
        }
    }

    /// Run the sweep to completion, returning everything adopted and every
    /// per-instance failure.
    pub async fn run(&self) -> OrphanOutcome {
        let mut outcome = OrphanOutcome::default();

        let names = match self.catalog.service_names().await {
            Ok(names) => names,
            Err(err) => {
                outcome.failures.push(("catalog listing".to_string(), err));
                return outcome;
            }
        };

        for name in names {
            let instances = match self.catalog.service_instances(&name).await {
                Ok(instances) => instances,
                Err(err) => {
                    outcome.failures.push((format!("instances of {name}"), err));
                    continue;
                }
            };

            for instance in instances {
                if instance.node == self.node.node_name() {
                    continue;
                }
                if !self.node.is_local(instance.effective_address()).await {
                    continue;
                }
                self.adopt(&instance, &mut outcome).await;
            }
        }

        outcome
    }

    /// Take over one stranded instance: broadcast, then deregister it on
    /// the node that still holds it.
    async fn adopt(&self, instance: &CatalogInstance, outcome: &mut OrphanOutcome) {
        let identity = instance.identity();

        // The fingerprint travels in the event payload so any node holding
        // the same address can yield. Absent entry means empty payload.
        let payload = self
            .cache
            .fingerprint_for(&identity, &instance.service_tags)
            .await
            .map(|fp| fp.to_vec())
            .unwrap_or_default();

        // a failed broadcast is recorded but does not stop the takeover
        if let Err(err) = self.events.fire(&self.event_name, &payload).await {
            outcome
                .failures
                .push((format!("takeover event for {identity}"), err));
        }

        let node = match self.catalog.node_info(&instance.node).await {
            Ok(node) => node,
            Err(err) => {
                outcome
                    .failures
                    .push((format!("node lookup {}", instance.node), err));
                return;
            }
        };

        info!(
            service = %instance.service_name,
            id = %instance.service_id,
            node = %instance.node,
            "Deregistering orphaned instance from its old node"
        );

        match self
            .remotes
            .deregister(&node.address, self.remote_port, &instance.service_id)
            .await
        {
            Ok(()) => outcome.adopted.push(identity),
            Err(err) => outcome.failures.push((
                format!("remote deregister {identity} on {}", instance.node),
                err,
            )),
        }
    }
}
