//! Background maintenance jobs.
//!
//! Two sweeps run on cron schedules: undo ledger garbage collection and
//! TTL expiry of memories. Both are idempotent and run strictly off the
//! write path. A skip-on-overlap guard keeps a slow sweep from stacking
//! on top of itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use memory_ledger::Ledger;
use memory_types::MaintenanceConfig;

use crate::engine::MemoryEngine;

/// Errors from maintenance scheduling.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    /// Cron expression failed to parse
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Underlying scheduler failure
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Start called twice
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Shutdown called before start
    #[error("Scheduler not running")]
    NotRunning,
}

impl From<tokio_cron_scheduler::JobSchedulerError> for MaintenanceError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        MaintenanceError::Scheduler(err.to_string())
    }
}

/// Validate a 6-field cron expression (sec min hour dom month dow).
pub fn validate_cron_expression(expr: &str) -> Result<(), MaintenanceError> {
    match Job::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(MaintenanceError::InvalidCron(format!("'{}': {}", expr, e))),
    }
}

/// Skip-on-overlap guard: a sweep scheduled while the previous run is
/// still active is skipped, not queued.
struct SweepGuard {
    is_running: Arc<AtomicBool>,
}

impl SweepGuard {
    fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a release token if the sweep may run, `None` to skip.
    fn try_acquire(&self) -> Option<SweepToken> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(SweepToken {
                flag: self.is_running.clone(),
            })
        } else {
            None
        }
    }
}

/// RAII release: clears the running flag even if the sweep panics.
struct SweepToken {
    flag: Arc<AtomicBool>,
}

impl Drop for SweepToken {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Cron scheduler for memory-mesh maintenance.
pub struct MaintenanceScheduler {
    scheduler: JobScheduler,
    config: MaintenanceConfig,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl MaintenanceScheduler {
    /// Create a scheduler; jobs start running only after `start()`.
    pub async fn new(config: MaintenanceConfig) -> Result<Self, MaintenanceError> {
        validate_cron_expression(&config.undo_gc_cron)?;
        validate_cron_expression(&config.ttl_sweep_cron)?;

        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            config,
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    /// Register the undo ledger GC sweep.
    pub async fn schedule_undo_gc(&self, ledger: Arc<Ledger>) -> Result<(), MaintenanceError> {
        let guard = Arc::new(SweepGuard::new());
        let token = self.shutdown_token.clone();

        let job = Job::new_async(self.config.undo_gc_cron.as_str(), move |_uuid, _lock| {
            let ledger = ledger.clone();
            let guard = guard.clone();
            let token = token.clone();
            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                let Some(_token) = guard.try_acquire() else {
                    warn!("Undo GC still running, skipping this tick");
                    return;
                };
                match ledger.gc_sweep(chrono::Utc::now()) {
                    Ok(stats) => {
                        info!(expired = stats.expired, removed = stats.removed, "Undo GC tick")
                    }
                    Err(e) => warn!(error = %e, "Undo GC sweep failed"),
                }
            })
        })
        .map_err(|e| MaintenanceError::InvalidCron(e.to_string()))?;

        self.scheduler.add(job).await?;
        info!(cron = %self.config.undo_gc_cron, "Undo GC job registered");
        Ok(())
    }

    /// Register the TTL expiry sweep.
    pub async fn schedule_ttl_sweep(
        &self,
        engine: Arc<MemoryEngine>,
    ) -> Result<(), MaintenanceError> {
        let guard = Arc::new(SweepGuard::new());
        let token = self.shutdown_token.clone();

        let job = Job::new_async(self.config.ttl_sweep_cron.as_str(), move |_uuid, _lock| {
            let engine = engine.clone();
            let guard = guard.clone();
            let token = token.clone();
            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                let Some(_token) = guard.try_acquire() else {
                    warn!("TTL sweep still running, skipping this tick");
                    return;
                };
                match engine.purge_expired().await {
                    Ok(purged) => info!(purged, "TTL sweep tick"),
                    Err(e) => warn!(error = %e, "TTL sweep failed"),
                }
            })
        })
        .map_err(|e| MaintenanceError::InvalidCron(e.to_string()))?;

        self.scheduler.add(job).await?;
        info!(cron = %self.config.ttl_sweep_cron, "TTL sweep job registered");
        Ok(())
    }

    /// Start executing registered jobs.
    pub async fn start(&self) -> Result<(), MaintenanceError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(MaintenanceError::AlreadyRunning);
        }
        self.scheduler.start().await?;
        info!("Maintenance scheduler started");
        Ok(())
    }

    /// Signal jobs to stop, wait briefly, then shut the scheduler down.
    pub async fn shutdown(&mut self) -> Result<(), MaintenanceError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(MaintenanceError::NotRunning);
        }

        self.shutdown_token.cancel();
        tokio::time::sleep(std::time::Duration::from_secs(
            self.config.shutdown_timeout_secs.min(5),
        ))
        .await;

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Error during maintenance shutdown: {}", e);
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Maintenance scheduler shutdown complete");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}
