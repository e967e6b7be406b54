//! Per-medication trigger orchestration.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::locks::OwnerLocks;
use super::time::TimeResolver;
use super::trigger::{PrecisionMode, TriggerKey, TriggerKind, TriggerRegistration, TriggerStore};
use crate::clock::Clock;
use crate::error::{HostError, Result};
use crate::host::TimerHost;
use crate::schedule::MedicationSchedule;

/// What a `schedule` call left registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub owner_id: i64,
    /// False when the schedule was inactive and everything was cancelled.
    pub active: bool,
    pub main: Option<TriggerRegistration>,
    pub pre_notice: Option<TriggerRegistration>,
    /// True when the host only granted best-effort timing.
    pub degraded: bool,
}

impl ScheduleReport {
    fn cancelled(owner_id: i64) -> Self {
        Self {
            owner_id,
            active: false,
            main: None,
            pre_notice: None,
            degraded: false,
        }
    }

    /// Precision the main trigger got.
    pub fn precision(&self) -> Option<PrecisionMode> {
        self.main.as_ref().map(|r| r.precision)
    }
}

/// Computes, registers and cancels the triggers of each medication.
///
/// Public methods take the owner's lock. The `*_locked` variants and the
/// chaining helpers expect the caller to hold it already.
pub struct AlarmScheduler {
    timers: Arc<dyn TimerHost>,
    clock: Arc<dyn Clock>,
    resolver: TimeResolver,
    triggers: TriggerStore,
    locks: OwnerLocks,
}

impl AlarmScheduler {
    pub fn new(timers: Arc<dyn TimerHost>, clock: Arc<dyn Clock>, resolver: TimeResolver) -> Self {
        Self {
            timers,
            clock,
            resolver,
            triggers: TriggerStore::new(),
            locks: OwnerLocks::new(),
        }
    }

    pub fn triggers(&self) -> &TriggerStore {
        &self.triggers
    }

    pub fn locks(&self) -> &OwnerLocks {
        &self.locks
    }

    pub fn can_schedule_exact_triggers(&self) -> bool {
        self.timers.is_precise_scheduling_permitted()
    }

    /// Bring a medication's triggers in line with its record.
    ///
    /// Calling this twice with the same record and clock leaves the same
    /// single set of registrations.
    pub fn schedule(&self, schedule: &MedicationSchedule) -> Result<ScheduleReport> {
        self.locks
            .with_owner(schedule.id, || self.schedule_locked(schedule))
    }

    pub(crate) fn schedule_locked(&self, schedule: &MedicationSchedule) -> Result<ScheduleReport> {
        let owner_id = schedule.id;
        if !schedule.active {
            self.cancel_locked(owner_id)?;
            info!(owner_id, "schedule inactive, triggers cancelled");
            return Ok(ScheduleReport::cancelled(owner_id));
        }

        let now = self.clock.now().with_timezone(&Local);
        let main_at = self.resolver.next_trigger(schedule.time_of_day, &now);
        let pre_at = self.resolver.pre_notice_time(&main_at, &now);

        // A failed main registration returns before anything else is touched,
        // so whatever was registered before stays in place.
        let main = self.register(
            TriggerKey::new(owner_id, TriggerKind::Main),
            main_at.with_timezone(&Utc),
        )?;

        let pre_key = TriggerKey::new(owner_id, TriggerKind::PreNotice);
        let pre_notice = match pre_at {
            Some(at) => match self.register(pre_key, at.with_timezone(&Utc)) {
                Ok(registration) => Some(registration),
                // A prior pre-notice for the same instant is still correct and
                // stays. One for another instant would warn at the wrong time.
                Err(e) => match self.triggers.get(&pre_key) {
                    Some(prior) if prior.fire_at == at.with_timezone(&Utc) => {
                        warn!(owner_id, "pre-notice not re-registered, keeping {}: {e}", prior.handle);
                        Some(prior)
                    }
                    _ => {
                        warn!(owner_id, "pre-notice not registered: {e}");
                        self.cancel_kind(&pre_key)?;
                        None
                    }
                },
            },
            None => {
                self.cancel_kind(&pre_key)?;
                None
            }
        };

        self.cancel_kind(&TriggerKey::new(owner_id, TriggerKind::Escalation))?;
        self.cancel_kind(&TriggerKey::new(owner_id, TriggerKind::Snooze))?;

        let degraded = !main.precision.is_precise()
            || pre_notice.as_ref().is_some_and(|r| !r.precision.is_precise());
        info!(
            owner_id,
            fire_at = %main.fire_at,
            mode = %main.precision,
            pre_notice = pre_notice.is_some(),
            "medication scheduled"
        );
        Ok(ScheduleReport {
            owner_id,
            active: true,
            main: Some(main),
            pre_notice,
            degraded,
        })
    }

    /// Cancel every trigger kind of `owner_id`. Cancelling an owner with
    /// nothing registered is fine.
    pub fn cancel(&self, owner_id: i64) -> Result<()> {
        self.locks.with_owner(owner_id, || self.cancel_locked(owner_id))
    }

    pub(crate) fn cancel_locked(&self, owner_id: i64) -> Result<()> {
        for key in TriggerKey::all_for(owner_id) {
            self.cancel_kind(&key)?;
        }
        debug!(owner_id, "all triggers cancelled");
        Ok(())
    }

    /// Cancel one kind at the host (by key, so it also works for timers
    /// registered before a restart) and tombstone it locally.
    pub(crate) fn cancel_kind(&self, key: &TriggerKey) -> Result<()> {
        self.timers.cancel(key)?;
        self.triggers.remove(key);
        Ok(())
    }

    /// Arm the next repeat of an unacknowledged alert that fired at
    /// `fired_at`.
    pub(crate) fn register_escalation(
        &self,
        owner_id: i64,
        fired_at: DateTime<Utc>,
    ) -> Result<TriggerRegistration> {
        let at = self.resolver.escalation_time(&fired_at);
        let registration = self.register(TriggerKey::new(owner_id, TriggerKind::Escalation), at)?;
        debug!(owner_id, fire_at = %at, "escalation armed");
        Ok(registration)
    }

    pub(crate) fn register_snooze(
        &self,
        owner_id: i64,
        fire_at: DateTime<Utc>,
    ) -> Result<TriggerRegistration> {
        let registration = self.register(TriggerKey::new(owner_id, TriggerKind::Snooze), fire_at)?;
        debug!(owner_id, fire_at = %fire_at, "snooze armed");
        Ok(registration)
    }

    /// Register with the most precise mode the host will take.
    ///
    /// Only [`HostError::ModeUnavailable`] moves on to the next mode; any
    /// other refusal is returned as is. The local table is only updated once
    /// the host accepted the timer.
    fn register(
        &self,
        key: TriggerKey,
        fire_at: DateTime<Utc>,
    ) -> Result<TriggerRegistration, HostError> {
        let modes: &[PrecisionMode] = if self.timers.is_precise_scheduling_permitted() {
            &PrecisionMode::PREFERENCE
        } else {
            &[PrecisionMode::Inexact]
        };

        let mut last_err = HostError::ModeUnavailable(PrecisionMode::Inexact);
        for &mode in modes {
            match self.timers.register_one_shot(key, fire_at, mode) {
                Ok(handle) => {
                    if mode != PrecisionMode::PREFERENCE[0] {
                        debug!(key = %key, mode = %mode, "registered with reduced precision");
                    }
                    let registration = TriggerRegistration {
                        key,
                        fire_at,
                        handle,
                        precision: mode,
                    };
                    self.triggers.insert(registration.clone());
                    return Ok(registration);
                }
                Err(e @ HostError::ModeUnavailable(_)) => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}
