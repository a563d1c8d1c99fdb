//! Triggers for the orchestrator.
//!
//! [`OrchestratorRunner`] is the self-rescheduling timer: after every run it
//! asks the orchestrator for the next instant and sleeps until then.
//! [`run_cron_worker`] drives the same `run_once` from an apalis cron stream.

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::orchestrator::{Orchestrator, TriggerMode};
use crate::error::{OrchestratorError, RunnerError};

/// Floor on the sleep between runs; an overdue continuation yields a zero delay
const DEFAULT_MIN_DELAY: std::time::Duration = std::time::Duration::from_secs(30);

/// Retry delay when the next run cannot be computed
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(60);

pub struct OrchestratorRunner {
    orchestrator: Arc<Orchestrator>,
    min_delay: std::time::Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestratorRunner {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            orchestrator,
            min_delay: DEFAULT_MIN_DELAY,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    pub fn with_min_delay(mut self, min_delay: std::time::Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    fn handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_started(&self) -> bool {
        self.handle().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the timer loop. Returns false when it is already running.
    pub fn start(&self) -> bool {
        let mut handle = self.handle();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        self.shutdown.send_replace(false);
        let rx = self.shutdown.subscribe();
        let orchestrator = self.orchestrator.clone();
        let min_delay = self.min_delay;
        *handle = Some(tokio::spawn(timer_loop(orchestrator, min_delay, rx)));
        info!("Orchestrator timer started");
        true
    }

    /// Stop the timer loop and wait for it. A run in flight finishes first.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.handle().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Orchestrator timer task ended abnormally");
            }
            info!("Orchestrator timer stopped");
        }
    }
}

async fn timer_loop(
    orchestrator: Arc<Orchestrator>,
    min_delay: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let delay = match orchestrator.next_run(Utc::now()).await {
            Ok(next) => {
                let delay = next.delay.max(min_delay);
                info!(
                    next_run_at = %next.at,
                    jitter_secs = next.jitter_secs,
                    delay_secs = delay.as_secs(),
                    "Next orchestrator run scheduled"
                );
                delay
            }
            Err(e) => {
                warn!(error = %e, "Failed to compute next run, retrying later");
                RETRY_DELAY
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        run_logged(&orchestrator, TriggerMode::Timer).await;
    }
}

async fn run_logged(orchestrator: &Orchestrator, trigger: TriggerMode) {
    match orchestrator.run_once(trigger).await {
        Ok(_) => {}
        Err(OrchestratorError::AlreadyRunning) => {
            debug!(trigger = trigger.as_str(), "Run already in progress, skipping trigger");
        }
        Err(e) => error!(trigger = trigger.as_str(), error = %e, "Orchestrator run failed"),
    }
}

/// Cron tick payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorJob {
    pub scheduled_at: DateTime<Utc>,
}

impl From<DateTime<Utc>> for OrchestratorJob {
    fn from(dt: DateTime<Utc>) -> Self {
        OrchestratorJob { scheduled_at: dt }
    }
}

/// Always Ok: run failures are logged and the next tick tries again.
async fn run_orchestrator_job(job: OrchestratorJob, ctx: Data<Arc<Orchestrator>>) -> Result<(), Error> {
    debug!(scheduled_at = %job.scheduled_at, "Cron tick");
    run_logged(&ctx, TriggerMode::Cron).await;
    Ok(())
}

/// Drive the orchestrator from a cron expression (seconds field first).
pub async fn run_cron_worker(
    orchestrator: Arc<Orchestrator>,
    pool: PgPool,
    expr: &str,
) -> Result<(), RunnerError> {
    let schedule = Schedule::from_str(expr).map_err(|e| RunnerError::Schedule {
        expr: expr.to_string(),
        reason: e.to_string(),
    })?;

    PostgresStorage::setup(&pool).await?;
    let storage: PostgresStorage<OrchestratorJob> = PostgresStorage::new(pool);
    let backend = CronStream::new(schedule).pipe_to_storage(storage);

    info!(cron = %expr, "Orchestrator cron worker starting");

    let worker = WorkerBuilder::new("orchestrator-cron")
        .data(orchestrator)
        .backend(backend)
        .build_fn(run_orchestrator_job);

    Monitor::new()
        .register(worker)
        .run()
        .await
        .map_err(|e| RunnerError::Monitor(e.to_string()))
}
