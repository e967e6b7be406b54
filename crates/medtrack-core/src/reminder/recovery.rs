//! Rebuilding the pending trigger set after a restart.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use super::scheduler::{AlarmScheduler, ScheduleReport};
use crate::clock::Clock;
use crate::error::Result;
use crate::host::ScheduleStore;

/// One medication recovery could not schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryFailure {
    pub owner_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub scheduled: Vec<ScheduleReport>,
    pub failed: Vec<RecoveryFailure>,
}

impl RecoveryReport {
    /// Number of scheduled medications running with best-effort timers.
    pub fn degraded(&self) -> usize {
        self.scheduled.iter().filter(|r| r.degraded).count()
    }
}

pub struct RecoveryCoordinator {
    scheduler: Arc<AlarmScheduler>,
    store: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
    settle_delay: Duration,
}

impl RecoveryCoordinator {
    pub fn new(
        scheduler: Arc<AlarmScheduler>,
        store: Arc<dyn ScheduleStore>,
        clock: Arc<dyn Clock>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            scheduler,
            store,
            clock,
            settle_delay,
        }
    }

    /// Re-schedule every active medication.
    ///
    /// One medication failing does not stop the others; only an unreadable
    /// store is an error.
    pub fn recover_all(&self) -> Result<RecoveryReport> {
        self.recover(self.settle_delay)
    }

    /// [`recover_all`](Self::recover_all) with an explicit settle delay.
    pub fn recover(&self, settle: Duration) -> Result<RecoveryReport> {
        // host services may still be coming up right after boot
        self.clock.sleep(settle);

        let schedules = self.store.active_schedules()?;
        info!(count = schedules.len(), "recovering medication triggers");

        let mut report = RecoveryReport::default();
        for schedule in &schedules {
            match self.scheduler.schedule(schedule) {
                Ok(scheduled) => report.scheduled.push(scheduled),
                Err(e) => {
                    error!(owner_id = schedule.id, "recovery could not schedule medication: {e}");
                    report.failed.push(RecoveryFailure {
                        owner_id: schedule.id,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            scheduled = report.scheduled.len(),
            failed = report.failed.len(),
            degraded = report.degraded(),
            "recovery finished"
        );
        Ok(report)
    }
}
