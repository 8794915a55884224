//! The updater job.
//!
//! One refresh run: fetch every provider → de-duplicate by identifier →
//! transform onto the schema → apply the snapshot to the store in one
//! atomic write. Any fetch failure aborts before the store is touched; any
//! write failure rolls back. There is no retry loop inside a run; the next
//! scheduled invocation (or a manual `blip refresh`) is the retry.
//!
//! Stale records follow `[refresh].stale_policy` (delete by default). Items
//! that were present upstream but rejected by the transform keep their
//! previously stored version.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::RefreshError;
use crate::models::{Record, RefreshRun, RunOutcome};
use crate::provider::{self, FileProvider, Provider};
use crate::store::{Snapshot, SqliteStore, Store, WriteStats};
use crate::transform::{item_id, transform_item, Transformed};

/// Snapshot built from upstream data, ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedSnapshot {
    pub snapshot: Snapshot,
    pub fetched: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub run: RefreshRun,
    pub stats: WriteStats,
    pub fetched: u64,
    pub duplicates: u64,
}

/// Fetches all providers and builds the snapshot without writing anything.
pub async fn prepare_snapshot(
    config: &Config,
    providers: &[Box<dyn Provider>],
    now: DateTime<Utc>,
) -> Result<PreparedSnapshot, RefreshError> {
    if providers.is_empty() {
        return Err(RefreshError::Config(anyhow::anyhow!(
            "no upstream sources configured"
        )));
    }

    let mut items = Vec::new();
    for p in providers {
        let fetched = p
            .fetch()
            .await
            .map_err(|e| RefreshError::upstream(p.name(), e))?;
        tracing::info!(
            provider = p.name(),
            provider_type = p.provider_type(),
            items = fetched.len(),
            "fetched upstream items"
        );
        items.extend(fetched);
    }
    let fetched = items.len() as u64;

    let schema = &config.schema;
    let mut seen: HashSet<String> = HashSet::new();
    let mut records: Vec<Record> = Vec::new();
    let mut keep = BTreeSet::new();
    let mut duplicates = 0u64;
    let mut rejected = 0u64;

    for item in &items {
        // First occurrence wins, regardless of whether it transforms cleanly.
        if let Some(id) = item_id(schema, item) {
            if !seen.insert(id.clone()) {
                duplicates += 1;
                tracing::debug!(id = %id, "skipping duplicate upstream item");
                continue;
            }
        }

        match transform_item(schema, item, now) {
            Transformed::Accepted(record) => records.push(record),
            Transformed::Rejected { id, reason } => {
                rejected += 1;
                tracing::warn!(
                    id = id.as_deref().unwrap_or("<none>"),
                    %reason,
                    "rejected upstream item"
                );
                if let Some(id) = id {
                    keep.insert(id);
                }
            }
        }
    }

    if records.is_empty() && !config.refresh.allow_empty_snapshot {
        return Err(RefreshError::upstream(
            "all",
            anyhow::anyhow!(
                "upstream snapshot has no usable records ({} fetched, {} rejected)",
                fetched,
                rejected
            ),
        ));
    }

    records.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(PreparedSnapshot {
        snapshot: Snapshot {
            records,
            keep,
            stale_policy: config.refresh.stale_policy,
        },
        fetched,
        duplicates,
        rejected,
    })
}

/// Runs one refresh against `store` with the given providers.
///
/// The run is logged to the store's audit table at start and at finish;
/// failing to log never changes the run's outcome.
pub async fn run_refresh(
    config: &Config,
    store: &dyn Store,
    providers: &[Box<dyn Provider>],
) -> Result<RefreshReport, RefreshError> {
    let mut run = RefreshRun::start();
    log_run(store, &run).await;
    tracing::info!(run_id = %run.run_id, "refresh started");

    let result = execute(config, store, providers, run.started_at).await;

    match result {
        Ok((prepared, stats)) => {
            run.records_written = stats.written();
            run.records_deleted = stats.deleted;
            run.records_rejected = prepared.rejected;
            run.finish(if prepared.rejected > 0 {
                RunOutcome::Partial
            } else {
                RunOutcome::Success
            });
            log_run(store, &run).await;
            tracing::info!(
                run_id = %run.run_id,
                outcome = run.outcome.as_str(),
                inserted = stats.inserted,
                updated = stats.updated,
                unchanged = stats.unchanged,
                deleted = stats.deleted,
                rejected = prepared.rejected,
                "refresh finished"
            );
            Ok(RefreshReport {
                run,
                stats,
                fetched: prepared.fetched,
                duplicates: prepared.duplicates,
            })
        }
        Err(e) => {
            run.error = Some(e.to_string());
            run.finish(RunOutcome::Failure);
            log_run(store, &run).await;
            tracing::error!(run_id = %run.run_id, error = %e, "refresh failed");
            Err(e)
        }
    }
}

async fn execute(
    config: &Config,
    store: &dyn Store,
    providers: &[Box<dyn Provider>],
    now: DateTime<Utc>,
) -> Result<(PreparedSnapshot, WriteStats), RefreshError> {
    let prepared = prepare_snapshot(config, providers, now).await?;
    let stats = store
        .apply_snapshot(&prepared.snapshot)
        .await
        .map_err(RefreshError::StoreWrite)?;
    Ok((prepared, stats))
}

async fn log_run(store: &dyn Store, run: &RefreshRun) {
    if let Err(e) = store.record_run(run).await {
        tracing::warn!(run_id = %run.run_id, error = %e, "could not record refresh run");
    }
}

/// Opens the configured store and providers and runs one refresh. Used by
/// the scheduler and the CLI.
///
/// `snapshot` replaces the configured providers with a saved snapshot file
/// (manual replay).
pub async fn refresh_from_config(
    config: &Config,
    snapshot: Option<PathBuf>,
) -> Result<RefreshReport, RefreshError> {
    let providers = build_providers(config, snapshot)?;
    let store = SqliteStore::open(config)
        .await
        .map_err(RefreshError::StoreWrite)?;
    let result = run_refresh(config, &store, &providers).await;
    store.close().await;
    result
}

fn build_providers(
    config: &Config,
    snapshot: Option<PathBuf>,
) -> Result<Vec<Box<dyn Provider>>, RefreshError> {
    match snapshot {
        Some(path) => {
            let replay: Box<dyn Provider> = Box::new(FileProvider::from_path("snapshot", path));
            Ok(vec![replay])
        }
        None => provider::create_providers(config).map_err(RefreshError::Config),
    }
}

/// CLI entry point for `blip refresh`.
pub async fn run_refresh_cmd(
    config: &Config,
    snapshot: Option<PathBuf>,
    dry_run: bool,
) -> Result<(), RefreshError> {
    if dry_run {
        let providers = build_providers(config, snapshot)?;
        let prepared = prepare_snapshot(config, &providers, Utc::now()).await?;
        println!("refresh (dry-run)");
        println!("  fetched: {} items", prepared.fetched);
        println!("  duplicates: {}", prepared.duplicates);
        println!("  rejected: {}", prepared.rejected);
        println!("  records: {}", prepared.snapshot.records.len());
        return Ok(());
    }

    let report = refresh_from_config(config, snapshot).await?;

    println!("refresh {}", report.run.run_id);
    println!("  fetched: {} items", report.fetched);
    println!("  duplicates: {}", report.duplicates);
    println!("  rejected: {}", report.run.records_rejected);
    println!("  inserted: {}", report.stats.inserted);
    println!("  updated: {}", report.stats.updated);
    println!("  unchanged: {}", report.stats.unchanged);
    println!("  deleted: {}", report.stats.deleted);
    println!("{}", report.run.outcome.as_str());
    Ok(())
}

/// CLI entry point for `blip runs`.
pub async fn list_runs(config: &Config, limit: usize) -> anyhow::Result<()> {
    let store = SqliteStore::open(config).await?;
    let runs = store.recent_runs(limit).await?;
    store.close().await;

    println!(
        "{:<38} {:<22} {:<9} {:>7} {:>7} {:>8}",
        "RUN", "STARTED", "OUTCOME", "WRITTEN", "DELETED", "REJECTED"
    );
    for run in runs {
        println!(
            "{:<38} {:<22} {:<9} {:>7} {:>7} {:>8}",
            run.run_id,
            run.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
            run.outcome.as_str(),
            run.records_written,
            run.records_deleted,
            run.records_rejected
        );
        if let Some(err) = run.error {
            println!("  error: {}", err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttributeValue, UpstreamItem};
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed(Vec<UpstreamItem>);

    #[async_trait]
    impl Provider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn provider_type(&self) -> &str {
            "test"
        }
        async fn fetch(&self) -> anyhow::Result<Vec<UpstreamItem>> {
            Ok(self.0.clone())
        }
    }

    fn config() -> Config {
        toml::from_str(
            r#"
[db]
path = "/tmp/unused.sqlite"

[schema]
id_source = "id"

[[schema.attributes]]
name = "category"
kind = "category"
required = true
filterable = true

[[schema.attributes]]
name = "value"
kind = "number"
sortable = true
"#,
        )
        .unwrap()
    }

    fn item(v: serde_json::Value) -> UpstreamItem {
        match v {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn first_occurrence_of_an_id_wins() {
        let providers: Vec<Box<dyn Provider>> = vec![Box::new(Fixed(vec![
            item(json!({"id": 1, "category": "forest", "value": 5})),
            item(json!({"id": 1, "category": "desert", "value": 9})),
            item(json!({"id": 2, "value": 3})),
        ]))];

        let prepared = prepare_snapshot(&config(), &providers, Utc::now())
            .await
            .unwrap();
        assert_eq!(prepared.fetched, 3);
        assert_eq!(prepared.duplicates, 1);
        assert_eq!(prepared.rejected, 1);
        assert_eq!(prepared.snapshot.records.len(), 1);
        assert_eq!(
            prepared.snapshot.records[0].get("category"),
            Some(&AttributeValue::Text("forest".into()))
        );
        assert!(prepared.snapshot.keep.contains("2"));
    }

    #[tokio::test]
    async fn empty_snapshot_is_an_upstream_error_unless_allowed() {
        let providers: Vec<Box<dyn Provider>> = vec![Box::new(Fixed(vec![]))];
        let mut cfg = config();
        let err = prepare_snapshot(&cfg, &providers, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);

        cfg.refresh.allow_empty_snapshot = true;
        let prepared = prepare_snapshot(&cfg, &providers, Utc::now())
            .await
            .unwrap();
        assert!(prepared.snapshot.records.is_empty());
    }

    #[tokio::test]
    async fn no_providers_is_a_config_error() {
        let err = prepare_snapshot(&config(), &[], Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
