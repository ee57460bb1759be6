//! Cycle scheduling and job lifecycle
//!
//! A timer fires cycles at a configured interval; overlapping ticks are
//! skipped so at most one scheduled cycle runs at a time. Operators can
//! request manual cycles concurrently; those drain through a small
//! worker pool. The pipeline itself is synchronous and runs on the
//! blocking thread pool.

use crate::agent::events;
use crate::agent::pipeline::PipelineDriver;
use crate::agent::state::CycleStatus;
use crate::store::JobStore;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::EventKind;

pub struct AgentScheduler {
    driver: Arc<PipelineDriver>,
    jobs: Arc<JobStore>,
    interval_minutes: u64,
    scheduled_running: AtomicBool,
    manual_permits: Arc<Semaphore>,
}

impl AgentScheduler {
    pub fn new(
        driver: Arc<PipelineDriver>,
        jobs: Arc<JobStore>,
        interval_minutes: u64,
        manual_workers: usize,
    ) -> Self {
        Self {
            driver,
            jobs,
            interval_minutes,
            scheduled_running: AtomicBool::new(false),
            manual_permits: Arc::new(Semaphore::new(manual_workers.max(1))),
        }
    }

    /// Queue a manual cycle. Returns the job id immediately; the cycle
    /// runs in the background once a worker slot frees up.
    pub fn spawn_job(self: &Arc<Self>) -> Result<String> {
        let job_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        self.jobs.create(&job_id).context("job create")?;
        info!("Job {job_id}: queued for execution");

        let scheduler = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            let permit = scheduler.manual_permits.clone().acquire_owned().await;
            match permit {
                Ok(_permit) => scheduler.execute_job(&id).await,
                Err(_) => error!("Job {id}: worker pool closed"),
            }
        });

        Ok(job_id)
    }

    /// Background timer loop. Skips a tick while the previous scheduled
    /// cycle is still running.
    pub fn start_interval(self: Arc<Self>) {
        if self.interval_minutes == 0 {
            warn!("Scheduler interval is 0; periodic cycles disabled");
            return;
        }
        let period = Duration::from_secs(self.interval_minutes * 60);
        info!("⏰ Scheduler armed: cycle every {} min", self.interval_minutes);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Swallow the immediate first tick; the first cycle fires
            // one full period after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !self.try_begin_scheduled() {
                    warn!("⏭️ Skipping scheduled cycle: previous one still running");
                    continue;
                }
                let scheduler = self.clone();
                tokio::spawn(async move {
                    match scheduler.jobs.create_for_tick() {
                        Ok(job_id) => scheduler.execute_job(&job_id).await,
                        Err(e) => error!("Scheduled job create failed: {e:#}"),
                    }
                    scheduler.end_scheduled();
                });
            }
        });
    }

    fn try_begin_scheduled(&self) -> bool {
        self.scheduled_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn end_scheduled(&self) {
        self.scheduled_running.store(false, Ordering::SeqCst);
    }

    async fn execute_job(&self, job_id: &str) {
        if let Err(e) = self.jobs.mark_running(job_id) {
            error!("Job {job_id}: failed to mark running: {e:#}");
        }

        let driver = self.driver.clone();
        let id = job_id.to_string();
        let handle = tokio::task::spawn_blocking(move || driver.run_cycle(&id, 0.0));

        match handle.await {
            Ok(result) => {
                events::emit(
                    job_id,
                    EventKind::Progress,
                    "COMPLETE",
                    match result.status {
                        CycleStatus::Completed => "✨ Agent cycle completed successfully!".to_string(),
                        CycleStatus::Failed => "Agent cycle ended in failed state".to_string(),
                    },
                    Some(serde_json::json!({ "skus_processed": result.skus_processed })),
                );
                match result.status {
                    CycleStatus::Completed => {
                        let value = serde_json::to_value(&result).unwrap_or_default();
                        if let Err(e) = self.jobs.mark_completed(job_id, &value) {
                            error!("Job {job_id}: failed to persist result: {e:#}");
                        }
                        info!("Job {job_id}: completed successfully");
                    }
                    CycleStatus::Failed => {
                        let reason = result
                            .errors
                            .last()
                            .map(|e| format!("{}: {}", e.scope, e.message))
                            .unwrap_or_else(|| "cycle failed".to_string());
                        if let Err(e) = self.jobs.mark_failed(job_id, &reason) {
                            error!("Job {job_id}: failed to persist error: {e:#}");
                        }
                        warn!("Job {job_id}: failed - {reason}");
                    }
                }
            }
            Err(join_error) => {
                // The pipeline guards each stage, so this is a crash
                // outside any stage boundary.
                let reason = format!("cycle crashed: {join_error}");
                error!("Job {job_id}: {reason}");
                events::emit(
                    job_id,
                    EventKind::Error,
                    "ERROR",
                    format!("Agent cycle failed: {reason}"),
                    None,
                );
                if let Err(e) = self.jobs.mark_failed(job_id, &reason) {
                    error!("Job {job_id}: failed to persist error: {e:#}");
                }
            }
        }

        // Keep the stream readable for late consumers, then drop it.
        events::retire_stream(job_id);
    }
}

impl JobStore {
    fn create_for_tick(&self) -> Result<String> {
        let job_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        self.create(&job_id)?;
        info!("Job {job_id}: queued by scheduler tick");
        Ok(job_id)
    }
}
