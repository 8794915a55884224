//! SQLite [`Store`] backed by `sqlx`.
//!
//! A snapshot is applied inside a single transaction. With the WAL journal,
//! readers keep seeing the previous committed state until the commit, so
//! queries never observe a half-applied run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{AttributeValue, Record, RefreshRun, RunOutcome};

use super::{plan_snapshot, Snapshot, Store, WriteStats};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to the configured database and makes sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

#[async_trait]
impl Store for SqliteStore {
    async fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<WriteStats> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT id, content_hash FROM records")
            .fetch_all(&mut *tx)
            .await?;
        let existing: HashMap<String, String> = rows
            .iter()
            .map(|row| (row.get("id"), row.get("content_hash")))
            .collect();

        let plan = plan_snapshot(&existing, snapshot);

        for record in &plan.upserts {
            let attributes_json = serde_json::to_string(&record.attributes)?;
            sqlx::query(
                r#"
                INSERT INTO records (id, attributes_json, content_hash, last_updated)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    attributes_json = excluded.attributes_json,
                    content_hash = excluded.content_hash,
                    last_updated = excluded.last_updated
                "#,
            )
            .bind(&record.id)
            .bind(&attributes_json)
            .bind(record.content_hash())
            .bind(record.last_updated.timestamp())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("upserting record {}", record.id))?;
        }

        for id in &plan.deletes {
            sqlx::query("DELETE FROM records WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("deleting stale record {}", id))?;
        }

        tx.commit().await?;
        Ok(plan.stats)
    }

    async fn all_records(&self) -> Result<Vec<Record>> {
        let rows =
            sqlx::query("SELECT id, attributes_json, last_updated FROM records ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                let attributes_json: String = row.get("attributes_json");
                let attributes: BTreeMap<String, AttributeValue> =
                    serde_json::from_str(&attributes_json)
                        .with_context(|| format!("corrupt attributes for record {}", id))?;
                Ok(Record {
                    id,
                    attributes,
                    last_updated: ts_to_datetime(row.get("last_updated")),
                })
            })
            .collect()
    }

    async fn record_run(&self, run: &RefreshRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_runs (run_id, started_at, finished_at, outcome, records_written, records_deleted, records_rejected, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                finished_at = excluded.finished_at,
                outcome = excluded.outcome,
                records_written = excluded.records_written,
                records_deleted = excluded.records_deleted,
                records_rejected = excluded.records_rejected,
                error = excluded.error
            "#,
        )
        .bind(&run.run_id)
        .bind(run.started_at.timestamp())
        .bind(run.finished_at.map(|t| t.timestamp()))
        .bind(run.outcome.as_str())
        .bind(run.records_written as i64)
        .bind(run.records_deleted as i64)
        .bind(run.records_rejected as i64)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RefreshRun>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, started_at, finished_at, outcome, records_written, records_deleted, records_rejected, error
            FROM refresh_runs
            ORDER BY started_at DESC, run_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let outcome: String = row.get("outcome");
                let finished_at: Option<i64> = row.get("finished_at");
                Ok(RefreshRun {
                    run_id: row.get("run_id"),
                    started_at: ts_to_datetime(row.get("started_at")),
                    finished_at: finished_at.map(ts_to_datetime),
                    outcome: outcome.parse::<RunOutcome>().map_err(anyhow::Error::msg)?,
                    records_written: row.get::<i64, _>("records_written") as u64,
                    records_deleted: row.get::<i64, _>("records_deleted") as u64,
                    records_rejected: row.get::<i64, _>("records_rejected") as u64,
                    error: row.get("error"),
                })
            })
            .collect()
    }
}
