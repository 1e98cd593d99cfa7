use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shellymgr_domain::ExportSchedule;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::engine::{ExportOutcome, SyncEngine};
use crate::error::SyncError;

/// Fires recurring export schedules.
///
/// A single cooperative ticker selects enabled schedules whose `next_run` has
/// elapsed. Per-schedule runs are strictly serialized through an advisory
/// lock keyed by schedule id; failures advance the clock so a broken plugin
/// cannot wedge a schedule.
pub struct ScheduleTicker {
    engine: Arc<SyncEngine>,
    running: Mutex<HashSet<i64>>,
    tick_interval: Duration,
}

impl ScheduleTicker {
    pub fn new(engine: Arc<SyncEngine>, tick_interval: Duration) -> Self {
        Self { engine, running: Mutex::new(HashSet::new()), tick_interval }
    }

    /// Run until the shutdown signal flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {
                    if let Err(e) = self.tick_once(Utc::now()).await {
                        warn!(error = %e, "schedule tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One ticker pass: run everything due at `now`. Returns how many
    /// schedules were started.
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        let due = self.engine.store().list_due_schedules(now).await?;
        let mut started = 0;
        for schedule in due {
            match self.run_one(&schedule, true).await {
                Ok(outcome) => {
                    started += 1;
                    info!(
                        schedule_id = schedule.id,
                        export_id = %outcome.history.export_id,
                        success = outcome.history.success,
                        "scheduled export run"
                    );
                }
                Err(SyncError::ScheduleBusy(id)) => {
                    debug!(schedule_id = id, "previous run still in flight");
                }
                Err(e) => {
                    warn!(schedule_id = schedule.id, error = %e, "scheduled run failed");
                }
            }
        }
        Ok(started)
    }

    /// Manual trigger. Honors the advisory lock and updates `last_run` only —
    /// the timer's `next_run` is left alone.
    pub async fn run_schedule(&self, id: i64) -> Result<ExportOutcome, SyncError> {
        let schedule = self
            .engine
            .store()
            .get_schedule(id)
            .await?
            .ok_or_else(|| shellymgr_store::StoreError::not_found("schedule", id))?;
        self.run_one(&schedule, false).await
    }

    async fn run_one(
        &self,
        schedule: &ExportSchedule,
        advance_next_run: bool,
    ) -> Result<ExportOutcome, SyncError> {
        {
            let mut running = self.running.lock().await;
            if !running.insert(schedule.id) {
                return Err(SyncError::ScheduleBusy(schedule.id));
            }
        }

        let outcome = self.engine.export(&schedule.request).await;

        // Advance the clock whatever happened; a failed run is already
        // recorded in export history.
        let now = Utc::now();
        let mut updated = schedule.clone();
        updated.last_run = Some(now);
        if advance_next_run {
            updated.next_run =
                Some(now + ChronoDuration::seconds(schedule.interval_seconds as i64));
        }
        updated.updated_at = now;
        let persisted = self.engine.store().update_schedule(&updated).await;

        self.running.lock().await.remove(&schedule.id);

        persisted?;
        outcome
    }
}
