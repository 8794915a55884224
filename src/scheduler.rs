//! Built-in refresh scheduler (`blip schedule`).
//!
//! A `tokio-cron-scheduler` job fires the updater job once per period
//! (monthly by default). Each tick spawns the refresh and returns at once.
//! A tick that finds a run still in progress is skipped rather than stacked.
//!
//! With `schedule.catch_up` on, startup checks whether any run was started
//! since the current period began and fires one immediately if not, so a
//! period missed while the process was down is still covered.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::{Cadence, Config, ScheduleConfig};
use crate::refresh::refresh_from_config;
use crate::store::{SqliteStore, Store};

/// Six-field cron expression (seconds first) for the configured schedule.
pub fn cron_expression(schedule: &ScheduleConfig) -> String {
    if let Some(cron) = &schedule.cron {
        return cron.trim().to_string();
    }
    match schedule.cadence {
        Cadence::Monthly => format!("0 0 {} 1 * *", schedule.hour),
        Cadence::Weekly => format!("0 0 {} * * Mon", schedule.hour),
        Cadence::Daily => format!("0 0 {} * * *", schedule.hour),
    }
}

/// Start of the period containing `now`: the most recent scheduled tick at
/// or before `now`.
pub fn period_start(cadence: Cadence, hour: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let at = |d: NaiveDate| d.and_time(time).and_utc();
    let today = now.date_naive();

    match cadence {
        Cadence::Monthly => {
            let first = today.with_day(1).unwrap_or(today);
            if at(first) <= now {
                at(first)
            } else {
                at(first.checked_sub_months(Months::new(1)).unwrap_or(first))
            }
        }
        Cadence::Weekly => {
            let monday = today - Days::new(today.weekday().num_days_from_monday() as u64);
            if at(monday) <= now {
                at(monday)
            } else {
                at(monday - Days::new(7))
            }
        }
        Cadence::Daily => {
            if at(today) <= now {
                at(today)
            } else {
                at(today - Days::new(1))
            }
        }
    }
}

/// A catch-up run is due when nothing was started in the current period.
pub fn catch_up_due(last_started: Option<DateTime<Utc>>, period_start: DateTime<Utc>) -> bool {
    match last_started {
        Some(started) => started < period_start,
        None => true,
    }
}

/// Admits at most one refresh at a time within this process.
#[derive(Debug, Default)]
pub struct RunGate {
    running: AtomicBool,
}

/// Held for the duration of a run; releases the gate on drop.
#[derive(Debug)]
pub struct RunPermit {
    gate: Arc<RunGate>,
}

impl RunGate {
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit { gate: self.clone() })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

/// Spawns one refresh unless one is already running. Returns whether a run
/// was started. The caller never waits for the outcome.
pub fn fire(config: Arc<Config>, gate: &Arc<RunGate>) -> bool {
    let Some(permit) = gate.try_acquire() else {
        tracing::info!("refresh still in progress, skipping tick");
        return false;
    };

    tokio::spawn(async move {
        let _permit = permit;
        match refresh_from_config(&config, None).await {
            Ok(report) => tracing::info!(
                run_id = %report.run.run_id,
                outcome = report.run.outcome.as_str(),
                "scheduled refresh complete"
            ),
            Err(e) => tracing::error!(
                exit_code = e.exit_code(),
                error = %e,
                "scheduled refresh failed"
            ),
        }
    });
    true
}

async fn last_run_started(config: &Config) -> Result<Option<DateTime<Utc>>> {
    let store = SqliteStore::open(config).await?;
    let runs = store.recent_runs(1).await;
    store.close().await;
    Ok(runs?.first().map(|r| r.started_at))
}

/// Runs the scheduler until Ctrl-C.
pub async fn run_scheduler(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let gate = Arc::new(RunGate::default());
    let cron = cron_expression(&config.schedule);

    let mut sched = JobScheduler::new().await.context("creating scheduler")?;
    let job_config = config.clone();
    let job_gate = gate.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let config = job_config.clone();
        let gate = job_gate.clone();
        Box::pin(async move {
            tracing::info!("scheduler tick");
            fire(config, &gate);
        })
    })
    .with_context(|| format!("creating scheduler job for cron '{}'", cron))?;
    sched.add(job).await.context("adding scheduler job")?;

    if config.schedule.catch_up {
        let start = period_start(config.schedule.cadence, config.schedule.hour, Utc::now());
        let due = match last_run_started(&config).await {
            Ok(last) => catch_up_due(last, start),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "could not read run history");
                true
            }
        };
        if due {
            tracing::info!(period_start = %start, "no run in current period, catching up");
            fire(config.clone(), &gate);
        }
    }

    sched.start().await.context("starting scheduler")?;
    println!("Scheduler running ({}). Press Ctrl-C to stop.", cron);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
