//! TTL heartbeat for the sidecar's own health check
//!
//! Runs for the lifetime of the process, refreshing the check at half the
//! configured TTL. It shares no state with the reconciliation path; a
//! failed refresh is logged and the task simply tries again next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::consul::AgentApi;
use crate::models::CheckStatus;

pub struct Heartbeat {
    agent: Arc<dyn AgentApi>,
    check_id: String,
    ttl: Duration,
}

impl Heartbeat {
    pub fn new(agent: Arc<dyn AgentApi>, check_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            agent,
            check_id: check_id.into(),
            ttl,
        }
    }

    /// Spawn the refresh loop. The returned handle is never awaited in
    /// normal operation; the task ends with the process.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.ttl / 2);
            loop {
                ticker.tick().await;
                match self
                    .agent
                    .update_check(&self.check_id, CheckStatus::Passing, "ttl refresh")
                    .await
                {
                    Ok(()) => debug!(check = %self.check_id, "TTL check refreshed"),
                    Err(err) => {
                        warn!(check = %self.check_id, error = %err, "Failed to refresh TTL check")
                    }
                }
            }
        })
    }
}
