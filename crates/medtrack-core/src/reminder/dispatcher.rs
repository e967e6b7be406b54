//! Handling of fired triggers.
//!
//! Firing is an inbound event: the host calls [`DeliveryDispatcher::on_trigger_fired`]
//! with the key and handle of the timer that went off. The dispatcher never
//! returns an error. Whatever goes wrong is logged and folded into the
//! [`DispatchOutcome`], because a failure here must not stop later triggers
//! from being handled.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::scheduler::AlarmScheduler;
use super::trigger::{Liveness, TimerHandle, TriggerKey, TriggerKind, TriggerRegistration};
use super::wake::WakeHold;
use super::EngineSettings;
use crate::clock::Clock;
use crate::host::{AlertRequest, AlertSink, DedupLedger, ScheduleStore, WakeLockHost};
use crate::schedule::MedicationSchedule;

/// A timer that went off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub key: TriggerKey,
    pub handle: TimerHandle,
}

impl FiredTrigger {
    pub fn new(key: TriggerKey, handle: TimerHandle) -> Self {
        Self { key, handle }
    }
}

/// Why a fired trigger produced no alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Cancelled after it was registered.
    Cancelled,
    /// Replaced by a newer registration for the same key.
    Superseded,
    /// The medication no longer exists.
    OwnerMissing,
    /// The medication exists but is switched off.
    OwnerInactive,
}

/// Result of handling one fired trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The alert was shown. `chained` is the follow-up trigger, if any.
    Delivered {
        attempts: u32,
        chained: Option<TriggerRegistration>,
    },
    /// Same key fired inside the dedup window; nothing happened.
    Duplicate,
    Discarded { reason: DiscardReason },
    /// Both delivery attempts failed. The chain still continues.
    DeliveryFailed {
        chained: Option<TriggerRegistration>,
    },
    /// The store or ledger could not be read.
    Failed { message: String },
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }

    pub fn chained(&self) -> Option<&TriggerRegistration> {
        match self {
            DispatchOutcome::Delivered { chained, .. } | DispatchOutcome::DeliveryFailed { chained } => {
                chained.as_ref()
            }
            _ => None,
        }
    }
}

pub struct DeliveryDispatcher {
    scheduler: Arc<AlarmScheduler>,
    store: Arc<dyn ScheduleStore>,
    alerts: Arc<dyn AlertSink>,
    wake: Arc<dyn WakeLockHost>,
    dedup: Arc<dyn DedupLedger>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl DeliveryDispatcher {
    pub fn new(
        scheduler: Arc<AlarmScheduler>,
        store: Arc<dyn ScheduleStore>,
        alerts: Arc<dyn AlertSink>,
        wake: Arc<dyn WakeLockHost>,
        dedup: Arc<dyn DedupLedger>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            scheduler,
            store,
            alerts,
            wake,
            dedup,
            clock,
            settings,
        }
    }

    pub fn on_trigger_fired(&self, fired: FiredTrigger) -> DispatchOutcome {
        let owner_id = fired.key.owner_id;
        let outcome = self
            .scheduler
            .locks()
            .with_owner(owner_id, || self.dispatch_locked(fired));
        debug!(key = %fired.key, handle = %fired.handle, ?outcome, "trigger handled");
        outcome
    }

    fn dispatch_locked(&self, fired: FiredTrigger) -> DispatchOutcome {
        let key = fired.key;
        let now = self.clock.now();

        match self.dedup.last_fired(&key) {
            Ok(Some(last)) if now - last < self.settings.dedup_window && now >= last => {
                info!(key = %key, last_fired = %last, "duplicate firing ignored");
                return DispatchOutcome::Duplicate;
            }
            Ok(_) => {}
            Err(e) => {
                error!(key = %key, "dedup ledger unreadable: {e}");
                return DispatchOutcome::Failed {
                    message: e.to_string(),
                };
            }
        }
        if let Err(e) = self.dedup.record_fired(&key, now) {
            warn!(key = %key, "could not record firing: {e}");
        }

        match self.scheduler.triggers().liveness(&key, fired.handle) {
            Liveness::Cancelled => return self.discard(key, DiscardReason::Cancelled),
            Liveness::Superseded => return self.discard(key, DiscardReason::Superseded),
            Liveness::Live | Liveness::Unknown => {}
        }
        self.scheduler.triggers().mark_fired(&key, fired.handle);

        let schedule = match self.store.get_by_id(key.owner_id) {
            Ok(Some(schedule)) => schedule,
            Ok(None) => {
                if let Err(e) = self.scheduler.cancel_locked(key.owner_id) {
                    warn!(owner_id = key.owner_id, "could not cancel leftover triggers: {e}");
                }
                return self.discard(key, DiscardReason::OwnerMissing);
            }
            Err(e) => {
                error!(owner_id = key.owner_id, "medication lookup failed: {e}");
                return DispatchOutcome::Failed {
                    message: e.to_string(),
                };
            }
        };
        if !schedule.active {
            return self.discard(key, DiscardReason::OwnerInactive);
        }

        let hold = WakeHold::acquire(
            self.wake.as_ref(),
            format!("medtrack:{key}"),
            self.settings.wake_bound(key.kind),
        );
        let delivered = self.deliver(&schedule, key.kind);
        let chained = self.chain(key, now);
        drop(hold);

        match delivered {
            Some(attempts) => DispatchOutcome::Delivered { attempts, chained },
            None => DispatchOutcome::DeliveryFailed { chained },
        }
    }

    fn discard(&self, key: TriggerKey, reason: DiscardReason) -> DispatchOutcome {
        info!(key = %key, ?reason, "fired trigger discarded");
        DispatchOutcome::Discarded { reason }
    }

    /// Show the alert, retrying once. Returns the attempt that succeeded.
    fn deliver(&self, schedule: &MedicationSchedule, kind: TriggerKind) -> Option<u32> {
        let request = self.settings.alert_request(schedule, kind);
        for attempt in 1..=2 {
            match self.alerts.deliver(&request) {
                Ok(()) => {
                    info!(owner_id = schedule.id, kind = %kind, attempt, "alert delivered");
                    return Some(attempt);
                }
                Err(e) if attempt == 1 => {
                    warn!(owner_id = schedule.id, kind = %kind, "alert delivery failed, retrying: {e}");
                    self.clock.sleep(self.settings.retry_delay);
                }
                Err(e) => {
                    error!(owner_id = schedule.id, kind = %kind, "alert delivery failed again, dropping: {e}");
                }
            }
        }
        None
    }

    /// Arm the follow-up of a trigger that fired at `fired_at`.
    fn chain(&self, key: TriggerKey, fired_at: chrono::DateTime<chrono::Utc>) -> Option<TriggerRegistration> {
        if !key.kind.escalates() {
            return None;
        }
        match self.scheduler.register_escalation(key.owner_id, fired_at) {
            Ok(registration) => Some(registration),
            Err(e) => {
                error!(owner_id = key.owner_id, "could not arm escalation: {e}");
                None
            }
        }
    }
}
