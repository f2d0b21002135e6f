//! Daemon wiring and lifecycle
//!
//! Startup order: connect to the local agent, register our own service
//! and TTL check, spawn the heartbeat, establish the node identity, seed
//! the cache from a full KV listing, run one reconciliation pass, sweep
//! for orphans (when enabled), then hand control to the watch loop until
//! the process is told to stop.
//!
//! Anything that fails before the watch loop is running is fatal; the
//! watch loop terminating is fatal too.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::arbiter::{NodeIdentity, OrphanOutcome, OrphanSweep};
use crate::config::Config;
use crate::consul::{AgentApi, CatalogApi, EventApi, HttpClient, KvApi, KvWatcher, RemoteAgents};
use crate::error::{Error, Result};
use crate::heartbeat::Heartbeat;
use crate::models::{ServiceRegistration, WatchEvent};
use crate::reconcile::{ReconcileCache, ReconcileOutcome, Reconciler};

/// Run the sidecar until the watch terminates or the process is signalled.
pub async fn run(config: Config) -> Result<()> {
    let client = Arc::new(HttpClient::connect(&config.agent).await?);
    info!(address = %config.agent.address, "Connected to agent");

    let agent: Arc<dyn AgentApi> = client.clone();
    register_self(&config, agent.as_ref()).await?;

    let _heartbeat = Heartbeat::new(agent.clone(), config.check_id(), config.ttl()).spawn();

    let node_name = agent
        .node_name()
        .await
        .map_err(|e| Error::startup(format!("cannot determine node name: {e}")))?;

    let node = Arc::new(match NodeIdentity::resolve(&node_name) {
        Ok(node) => node,
        Err(err) => {
            // run on without interface IPs; hostname matching still works
            warn!(error = %err, "Could not enumerate local interfaces");
            NodeIdentity::new(
                std::env::var("HOSTNAME").unwrap_or_default(),
                &node_name,
                Vec::new(),
            )
        }
    });
    info!(node = %node.node_name(), hostname = %node.hostname(), "Node identity established");

    let cache = Arc::new(ReconcileCache::new());
    let reconciler = Reconciler::new(cache.clone(), agent.clone(), node.clone());

    // Seed the cache from the full current listing.
    let seed = client
        .list(&config.watch.prefix)
        .await
        .map_err(|e| Error::startup(format!("cannot list prefix {}: {e}", config.watch.prefix)))?;
    info!(prefix = %config.watch.prefix, entries = seed.len(), "Seeding cache");
    log_outcome(&reconciler.reconcile(&seed).await);

    if config.watch.orphanage {
        let catalog: Arc<dyn CatalogApi> = client.clone();
        let events: Arc<dyn EventApi> = client.clone();
        let remotes: Arc<dyn RemoteAgents> = client.clone();
        let sweep = OrphanSweep::new(
            node.clone(),
            cache.clone(),
            catalog,
            events,
            remotes,
            config.agent.remote_port,
            config.takeover_event(),
        );
        log_orphan_outcome(&sweep.run().await);
    }

    let mut events = KvWatcher::new(client.clone(), config.watch.prefix.clone()).subscribe();
    info!(prefix = %config.watch.prefix, "Watching for changes");

    loop {
        tokio::select! {
            delivery = events.recv() => match delivery {
                Some(WatchEvent::Snapshot(snapshot)) => {
                    log_outcome(&reconciler.reconcile(&snapshot).await);
                }
                Some(WatchEvent::Ended { reason }) => {
                    return Err(Error::startup(format!("watch terminated: {reason}")));
                }
                None => {
                    return Err(Error::startup("watch channel closed"));
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Termination signal received, shutting down");
                if config.service.dereg_on_exit {
                    if let Err(err) = agent.deregister(&config.service.name).await {
                        warn!(error = %err, "Failed to deregister own service on exit");
                    }
                }
                return Ok(());
            }
        }
    }
}

/// Register the sidecar's own service and its TTL check with the agent.
async fn register_self(config: &Config, agent: &dyn AgentApi) -> Result<()> {
    let mut own = ServiceRegistration::new(&config.service.name);
    own.id = Some(config.service.name.clone());
    own.tags = vec![if config.watch.orphanage {
        "orphanage"
    } else {
        "localagent"
    }
    .to_string()];

    agent
        .register(&own)
        .await
        .map_err(|e| Error::startup(format!("could not register own service: {e}")))?;

    agent
        .register_check(&config.check_id(), config.ttl())
        .await
        .map_err(|e| Error::startup(format!("could not register TTL check: {e}")))?;

    Ok(())
}

fn log_outcome(outcome: &ReconcileOutcome) {
    info!(
        registered = outcome.registered.len(),
        deregistered = outcome.deregistered.len(),
        unchanged = outcome.unchanged,
        skipped_foreign = outcome.skipped_foreign,
        "Reconciliation pass complete"
    );

    for (key, err) in &outcome.decode_errors {
        warn!(key = %key, error = %err, "Entry decoded with errors");
    }
    for (identity, err) in &outcome.failures {
        error!(identity = %identity, error = %err, "Apply call failed");
    }
}

fn log_orphan_outcome(outcome: &OrphanOutcome) {
    info!(adopted = outcome.adopted.len(), "Orphan sweep complete");

    for identity in &outcome.adopted {
        info!(identity = %identity, "Adopted orphaned registration");
    }
    for (context, err) in &outcome.failures {
        warn!(context = %context, error = %err, "Orphan sweep step failed");
    }
}
