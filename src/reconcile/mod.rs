//! Reconciliation cache and diff engine
//!
//! The cache holds what this node believes is registered locally, keyed by
//! identity and fingerprinted by a content hash of the raw KV bytes that
//! produced each registration. Every snapshot delivery is diffed against
//! it; only the difference turns into agent calls.
//!
//! Change detection is on the raw bytes, not the parsed structure: two
//! bit-identical documents are "unchanged" even if parsing were
//! non-deterministic.
//!
//! The engine performs no logging of apply failures itself; they are
//! accumulated in the returned [`ReconcileOutcome`] and the caller decides
//! what to do with them.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::arbiter::NodeIdentity;
use crate::consul::AgentApi;
use crate::decode::{decode_registrations, DecodeError};
use crate::error::Error;
use crate::models::{Identity, ServiceRegistration, Snapshot};

/// Content hash of one KV entry's raw value bytes.
pub type Fingerprint = [u8; 32];

/// Fingerprint the raw bytes of a KV value.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Sha256::digest(bytes).into()
}

// ============================================================================
// Cache
// ============================================================================

/// What the cache remembers about one live registration.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Hash of the raw KV bytes that produced this registration
    pub fingerprint: Fingerprint,

    /// The registration as last successfully registered
    pub registration: ServiceRegistration,

    /// When the successful register call happened
    pub registered_at: DateTime<Utc>,
}

/// Identity-keyed cache of registrations believed live on this node.
///
/// One exclusive lock serializes reconciliation passes; an entry exists
/// for identity X iff the most recent successful pass observed X as
/// locally owned and successfully registered it.
#[derive(Default)]
pub struct ReconcileCache {
    entries: Mutex<HashMap<Identity, CacheEntry>>,
}

impl ReconcileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached identities.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, identity: &Identity) -> bool {
        self.entries.lock().await.contains_key(identity)
    }

    /// Fingerprint of the cached entry for `identity`, provided the cached
    /// registration's tag set exactly matches `tags`. A tag mismatch means
    /// the cached entry describes a different incarnation of the service,
    /// so its fingerprint must not be used.
    pub async fn fingerprint_for(&self, identity: &Identity, tags: &[String]) -> Option<Fingerprint> {
        let entries = self.entries.lock().await;
        entries
            .get(identity)
            .filter(|entry| entry.registration.tags_match(tags))
            .map(|entry| entry.fingerprint)
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Accumulated result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Identities for which a register call succeeded
    pub registered: Vec<Identity>,

    /// Identities for which a deregister call was issued (evicted from the
    /// cache regardless of the call's outcome)
    pub deregistered: Vec<Identity>,

    /// Locally-owned identities whose fingerprint was unchanged
    pub unchanged: usize,

    /// Registrations skipped because their address is not ours
    pub skipped_foreign: usize,

    /// Per-entry decode failures, keyed by KV path
    pub decode_errors: Vec<(String, DecodeError)>,

    /// Per-identity apply failures
    pub failures: Vec<(Identity, Error)>,
}

impl ReconcileOutcome {
    /// Did the pass complete without decode or apply failures?
    pub fn is_clean(&self) -> bool {
        self.decode_errors.is_empty() && self.failures.is_empty()
    }

    /// Total agent calls issued during the pass.
    pub fn calls_issued(&self) -> usize {
        self.registered.len() + self.deregistered.len() + self.failures.len()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Diffs snapshots against the cache and applies the difference.
pub struct Reconciler {
    cache: Arc<ReconcileCache>,
    agent: Arc<dyn AgentApi>,
    node: Arc<NodeIdentity>,
}

impl Reconciler {
    pub fn new(cache: Arc<ReconcileCache>, agent: Arc<dyn AgentApi>, node: Arc<NodeIdentity>) -> Self {
        Self { cache, agent, node }
    }

    /// Run one reconciliation pass against a full snapshot.
    ///
    /// Holds the cache lock for the whole pass; concurrent callers
    /// serialize here.
    pub async fn reconcile(&self, snapshot: &Snapshot) -> ReconcileOutcome {
        let mut entries = self.cache.entries.lock().await;
        let mut outcome = ReconcileOutcome::default();

        // seen: identity -> changed? (false = fingerprint matched)
        let mut seen: HashMap<Identity, bool> = HashMap::new();
        let mut pending: Vec<(Identity, ServiceRegistration, Fingerprint)> = Vec::new();

        for entry in &snapshot.entries {
            let decoded = decode_registrations(&entry.value);
            if let Some(err) = decoded.error {
                outcome.decode_errors.push((entry.key.clone(), err));
            }

            for registration in decoded.registrations {
                if !self.node.is_local(&registration.address).await {
                    outcome.skipped_foreign += 1;
                    continue;
                }

                let identity = registration.identity();
                let fp = fingerprint(&entry.value);

                match entries.get(&identity) {
                    Some(cached) if cached.fingerprint == fp => {
                        seen.insert(identity, false);
                    }
                    _ => {
                        seen.insert(identity.clone(), true);
                        pending.push((identity, registration, fp));
                    }
                }
            }
        }

        outcome.unchanged = seen.values().filter(|changed| !**changed).count();

        // Everything cached but changed or gone gets deregistered first, so
        // that health checks are replaced rather than duplicated. Eviction
        // is unconditional: a failed deregister is recorded, not retried.
        let mut to_deregister = Vec::new();
        let cached_keys: Vec<Identity> = entries.keys().cloned().collect();
        for key in cached_keys {
            match seen.get(&key) {
                Some(false) => {}
                Some(true) | None => {
                    entries.remove(&key);
                    to_deregister.push(key);
                }
            }
        }

        for identity in to_deregister {
            if let Err(err) = self.agent.deregister(&identity.id).await {
                outcome.failures.push((identity.clone(), err));
            }
            outcome.deregistered.push(identity);
        }

        // Only a successful register writes the cache; a failed one leaves
        // the identity without an entry, so the next pass retries it as new.
        for (identity, registration, fp) in pending {
            match self.agent.register(&registration).await {
                Ok(()) => {
                    entries.insert(
                        identity.clone(),
                        CacheEntry {
                            fingerprint: fp,
                            registration,
                            registered_at: Utc::now(),
                        },
                    );
                    outcome.registered.push(identity);
                }
                Err(err) => {
                    outcome.failures.push((identity, err));
                }
            }
        }

        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================
