//! Storage abstraction for the dataset.
//!
//! The [`Store`] trait is the only way records are persisted or read. The
//! updater job is its single writer; the query service only reads.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`apply_snapshot`](Store::apply_snapshot) | Upsert a run's records and drop stale ones, atomically |
//! | [`all_records`](Store::all_records) | Every stored record, identifier ascending |
//! | [`record_run`](Store::record_run) | Insert or update a refresh run in the audit log |
//! | [`recent_runs`](Store::recent_runs) | Latest refresh runs, newest first |
//!
//! Implementations must make [`apply_snapshot`](Store::apply_snapshot)
//! all-or-nothing: a concurrent reader sees either the complete previous
//! state or the complete new one.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::StalePolicy;
use crate::models::{Record, RefreshRun};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Everything one refresh run wants the store to hold.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Accepted records, unique by id.
    pub records: Vec<Record>,
    /// Ids seen upstream but rejected by the transform. Their stored version
    /// is kept as is.
    pub keep: BTreeSet<String>,
    pub stale_policy: StalePolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

impl WriteStats {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert every snapshot record and apply the stale policy, in one
    /// atomic step. Records whose content hash is unchanged are not
    /// rewritten, so their `last_updated` stays put.
    async fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<WriteStats>;

    /// All stored records ordered by identifier ascending.
    async fn all_records(&self) -> Result<Vec<Record>>;

    /// Insert or update a run, keyed by `run_id`.
    async fn record_run(&self, run: &RefreshRun) -> Result<()>;

    /// Up to `limit` runs, most recently started first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RefreshRun>>;
}

/// What a snapshot does to the current store contents.
#[derive(Debug)]
pub(crate) struct WritePlan<'a> {
    pub upserts: Vec<&'a Record>,
    pub deletes: Vec<String>,
    pub stats: WriteStats,
}

/// Compares a snapshot against the stored `id → content_hash` map.
pub(crate) fn plan_snapshot<'a>(
    existing: &HashMap<String, String>,
    snapshot: &'a Snapshot,
) -> WritePlan<'a> {
    let mut stats = WriteStats::default();
    let mut upserts = Vec::new();
    let mut present: HashSet<&str> = HashSet::new();

    for record in &snapshot.records {
        present.insert(record.id.as_str());
        match existing.get(&record.id) {
            Some(hash) if *hash == record.content_hash() => stats.unchanged += 1,
            Some(_) => {
                stats.updated += 1;
                upserts.push(record);
            }
            None => {
                stats.inserted += 1;
                upserts.push(record);
            }
        }
    }

    let mut deletes = Vec::new();
    if snapshot.stale_policy == StalePolicy::Delete {
        deletes = existing
            .keys()
            .filter(|id| !present.contains(id.as_str()) && !snapshot.keep.contains(*id))
            .cloned()
            .collect();
        deletes.sort();
    }
    stats.deleted = deletes.len() as u64;

    WritePlan {
        upserts,
        deletes,
        stats,
    }
}
