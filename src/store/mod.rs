//! Versioned configuration store.
//!
//! # Responsibilities
//! - Hold the authoritative document per key, with a monotonic version
//! - Reject commits from stale versions (optimistic concurrency)
//! - Apply multi-document batches all-or-nothing
//! - Notify subscribers after every accepted commit
//!
//! # Design Decisions
//! - Reads are served from an atomically swapped snapshot; writers
//!   serialize behind one async mutex
//! - Persistence is a trait so tests run against memory and the binary
//!   against a JSON file
//! - The store never validates payload semantics; that stays with the
//!   validation layer so this module has a single reason to change

pub mod persist;

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::config::schema::{ConfigKey, ConfigPayload};
use crate::error::{Error, Result};
use persist::Persistence;

/// One named, versioned configuration unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub key: ConfigKey,
    pub payload: ConfigPayload,
    pub version: u64,
}

/// Notification emitted after an accepted commit.
#[derive(Debug, Clone, Copy)]
pub struct ChangeNotice {
    pub key: ConfigKey,
    pub version: u64,
}

/// The full document set held by the store at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    documents: BTreeMap<ConfigKey, ConfigDocument>,
}

impl Snapshot {
    /// Initial snapshot: every key present with its default payload at
    /// version 1.
    fn seed() -> Self {
        let mut documents = BTreeMap::new();
        for key in ConfigKey::ALL {
            documents.insert(
                key,
                ConfigDocument {
                    key,
                    payload: ConfigPayload::default_for(key),
                    version: 1,
                },
            );
        }
        Self { documents }
    }
}

/// A proposed update for one document.
pub type Update = (ConfigKey, ConfigPayload, u64);

/// Authoritative, versioned holder of configuration documents.
pub struct ConfigStore {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    persistence: Box<dyn Persistence>,
    changes: broadcast::Sender<ChangeNotice>,
}

impl ConfigStore {
    /// Open the store, loading persisted state or seeding defaults.
    pub fn open(persistence: Box<dyn Persistence>) -> Result<Self> {
        let snapshot = match persistence.load()? {
            Some(mut snapshot) => {
                // Keys added since the snapshot was written start at defaults.
                for key in ConfigKey::ALL {
                    snapshot.documents.entry(key).or_insert(ConfigDocument {
                        key,
                        payload: ConfigPayload::default_for(key),
                        version: 1,
                    });
                }
                snapshot
            }
            None => {
                let seed = Snapshot::seed();
                persistence.save(&seed)?;
                seed
            }
        };

        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            write_lock: Mutex::new(()),
            persistence,
            changes,
        })
    }

    /// Read the current document for a key.
    pub fn get(&self, key: ConfigKey) -> Result<ConfigDocument> {
        self.snapshot
            .load()
            .documents
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Read documents for the requested keys, in request order.
    pub fn list(&self, keys: &[ConfigKey]) -> Result<Vec<ConfigDocument>> {
        keys.iter().map(|key| self.get(*key)).collect()
    }

    /// All documents in canonical key order.
    pub fn documents(&self) -> Vec<ConfigDocument> {
        let snapshot = self.snapshot.load();
        ConfigKey::ALL
            .iter()
            .filter_map(|key| snapshot.documents.get(key).cloned())
            .collect()
    }

    /// Subscribe to commit notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }

    /// Commit one document if `expected_version` is still current.
    ///
    /// Returns the new version on success.
    pub async fn commit(
        &self,
        key: ConfigKey,
        payload: ConfigPayload,
        expected_version: u64,
    ) -> Result<u64> {
        let committed = self.commit_inner(&[(key, payload, expected_version)]).await?;
        Ok(committed[0].1)
    }

    /// Commit several documents all-or-nothing.
    ///
    /// Every expected version is checked against the current snapshot
    /// before anything is applied; the first stale key fails the whole
    /// batch and nothing changes.
    pub async fn batch_commit(&self, updates: &[Update]) -> Result<Vec<u64>> {
        let committed = self.commit_inner(updates).await?;
        Ok(committed.into_iter().map(|(_, version)| version).collect())
    }

    async fn commit_inner(&self, updates: &[Update]) -> Result<Vec<(ConfigKey, u64)>> {
        let _guard = self.write_lock.lock().await;
        let current = self.snapshot.load_full();

        for (i, (key, _, expected)) in updates.iter().enumerate() {
            if updates[..i].iter().any(|(k, _, _)| k == key) {
                return Err(Error::validation(
                    "updates",
                    format!("duplicate key {key} in batch"),
                ));
            }
            let doc = current
                .documents
                .get(key)
                .ok_or_else(|| Error::NotFound(key.to_string()))?;
            if doc.version != *expected {
                return Err(Error::VersionConflict {
                    key: *key,
                    expected: *expected,
                    actual: doc.version,
                });
            }
        }

        let mut next = Snapshot {
            documents: current.documents.clone(),
        };
        let mut committed = Vec::with_capacity(updates.len());
        for (key, payload, expected) in updates {
            let version = expected + 1;
            next.documents.insert(
                *key,
                ConfigDocument {
                    key: *key,
                    payload: payload.clone(),
                    version,
                },
            );
            committed.push((*key, version));
        }

        self.persistence.save(&next)?;
        self.snapshot.store(Arc::new(next));

        for (key, version) in &committed {
            tracing::debug!(key = %key, version = version, "config committed");
            // Send fails only when nobody is listening, which is fine.
            let _ = self.changes.send(ChangeNotice {
                key: *key,
                version: *version,
            });
        }

        Ok(committed)
    }
}
