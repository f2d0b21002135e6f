//! KV prefix watch via blocking queries
//!
//! Consul has no push channel for KV changes; the watch is a long poll on
//! the prefix listing with the last seen index. Every index change yields
//! the complete listing again, which is exactly the full-snapshot delivery
//! contract the reconciler expects.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::HttpClient;
use crate::models::WatchEvent;

/// How long one blocking query waits on the server.
const WATCH_WAIT: Duration = Duration::from_secs(300);

/// Delay before re-polling after a failed query.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Consecutive failures after which the watch gives up.
const MAX_FAILURES: u32 = 8;

/// Long-poll watcher for one KV prefix.
///
/// Snapshots are delivered in order over a channel; the watch never
/// overlaps deliveries, so reconciliation passes are serialized by
/// construction. The stream ends only on persistent failure, which the
/// daemon treats as fatal.
pub struct KvWatcher {
    client: Arc<HttpClient>,
    prefix: String,
}

impl KvWatcher {
    pub fn new(client: Arc<HttpClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    /// Spawn the watch loop and return the event stream.
    ///
    /// The first delivery is the full current listing; afterwards every
    /// index change redelivers the complete prefix.
    pub fn subscribe(self) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(self.run(tx));
        rx
    }

    async fn run(self, tx: mpsc::Sender<WatchEvent>) {
        let mut last_index: u64 = 0;
        let mut failures: u32 = 0;

        loop {
            match self
                .client
                .list_blocking(&self.prefix, last_index, WATCH_WAIT)
                .await
            {
                Ok((index, snapshot)) => {
                    failures = 0;

                    if index < last_index {
                        // index went backwards (server restart or leader
                        // change); restart the watch from scratch
                        debug!(prefix = %self.prefix, index, last_index, "Watch index reset");
                        last_index = 0;
                        continue;
                    }

                    if index == last_index {
                        // wait expired without a change
                        continue;
                    }

                    last_index = index;
                    debug!(prefix = %self.prefix, index, entries = snapshot.len(), "Watch delivered snapshot");

                    if tx.send(WatchEvent::Snapshot(snapshot)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    failures += 1;
                    if failures >= MAX_FAILURES {
                        let _ = tx
                            .send(WatchEvent::Ended {
                                reason: err.to_string(),
                            })
                            .await;
                        return;
                    }

                    warn!(
                        prefix = %self.prefix,
                        error = %err,
                        attempt = failures,
                        "Watch query failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}
