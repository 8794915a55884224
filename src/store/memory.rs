//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`. A snapshot is
//! applied to a copy that replaces the live map in one assignment, which
//! gives the same all-or-nothing visibility as the SQLite transaction.
//! Failure switches let tests exercise store outages.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{Record, RefreshRun};

use super::{plan_snapshot, Snapshot, Store, WriteStats};

struct StoredRecord {
    record: Record,
    hash: String,
}

pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, StoredRecord>>,
    runs: RwLock<Vec<RefreshRun>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            runs: RwLock::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            read_delay_ms: AtomicU64::new(0),
        }
    }

    /// Make every subsequent snapshot write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent record read fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay record reads, to exercise query timeouts.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<WriteStats> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("in-memory store is rejecting writes");
        }

        let mut records = self.records.write().map_err(poisoned)?;
        let existing: HashMap<String, String> = records
            .iter()
            .map(|(id, stored)| (id.clone(), stored.hash.clone()))
            .collect();
        let plan = plan_snapshot(&existing, snapshot);

        let mut next: BTreeMap<String, StoredRecord> = records
            .iter()
            .map(|(id, stored)| {
                (
                    id.clone(),
                    StoredRecord {
                        record: stored.record.clone(),
                        hash: stored.hash.clone(),
                    },
                )
            })
            .collect();
        for record in plan.upserts {
            next.insert(
                record.id.clone(),
                StoredRecord {
                    record: record.clone(),
                    hash: record.content_hash(),
                },
            );
        }
        for id in &plan.deletes {
            next.remove(id);
        }

        *records = next;
        Ok(plan.stats)
    }

    async fn all_records(&self) -> Result<Vec<Record>> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("in-memory store is unavailable");
        }
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.values().map(|s| s.record.clone()).collect())
    }

    async fn record_run(&self, run: &RefreshRun) -> Result<()> {
        let mut runs = self.runs.write().map_err(poisoned)?;
        match runs.iter_mut().find(|r| r.run_id == run.run_id) {
            Some(existing) => *existing = run.clone(),
            None => runs.push(run.clone()),
        }
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RefreshRun>> {
        let runs = self.runs.read().map_err(poisoned)?;
        // Insertion order breaks ties between runs started in the same second.
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }
}
