//! User responses to an alert.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::scheduler::AlarmScheduler;
use super::trigger::{TriggerKey, TriggerKind, TriggerRegistration};
use crate::clock::Clock;
use crate::error::{CoreError, Result, ValidationError};
use crate::host::{AlertSink, ScheduleStore};
use crate::schedule::DoseOutcome;

/// Longest snooze accepted.
pub const MAX_SNOOZE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "secs", rename_all = "snake_case")]
pub enum UserAction {
    /// Dose taken.
    Acknowledge,
    Snooze(#[serde(with = "secs")] Duration),
    /// Stop the repeats without recording anything.
    Dismiss,
    /// Dose skipped.
    Missed,
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Outcome recorded and the medication removed.
    Recorded { outcome: DoseOutcome },
    Snoozed { registration: TriggerRegistration },
    Dismissed,
    /// Acknowledge for a medication that is already gone.
    AlreadyHandled,
}

pub struct ActionHandler {
    scheduler: Arc<AlarmScheduler>,
    store: Arc<dyn ScheduleStore>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
}

impl ActionHandler {
    pub fn new(
        scheduler: Arc<AlarmScheduler>,
        store: Arc<dyn ScheduleStore>,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            store,
            alerts,
            clock,
        }
    }

    pub fn handle(&self, owner_id: i64, action: UserAction) -> Result<ActionOutcome> {
        if let UserAction::Snooze(duration) = action {
            validate_snooze(duration)?;
        }
        self.scheduler
            .locks()
            .with_owner(owner_id, || self.handle_locked(owner_id, action))
    }

    fn handle_locked(&self, owner_id: i64, action: UserAction) -> Result<ActionOutcome> {
        let exists = self.store.get_by_id(owner_id)?.is_some();
        if !exists {
            if action == UserAction::Acknowledge {
                info!(owner_id, "acknowledge for unknown medication ignored");
                return Ok(ActionOutcome::AlreadyHandled);
            }
            warn!(owner_id, ?action, "action for unknown medication rejected");
            return Err(CoreError::UnknownOwner(owner_id));
        }

        match action {
            UserAction::Acknowledge => self.close_out(owner_id, DoseOutcome::Taken),
            UserAction::Missed => self.close_out(owner_id, DoseOutcome::Missed),
            UserAction::Snooze(duration) => {
                self.scheduler
                    .cancel_kind(&TriggerKey::new(owner_id, TriggerKind::Escalation))?;
                self.alerts.dismiss(owner_id);
                let delay = chrono::Duration::from_std(duration).map_err(|_| invalid_snooze(duration))?;
                let registration = self
                    .scheduler
                    .register_snooze(owner_id, self.clock.now() + delay)?;
                info!(owner_id, fire_at = %registration.fire_at, "dose snoozed");
                Ok(ActionOutcome::Snoozed { registration })
            }
            UserAction::Dismiss => {
                self.scheduler
                    .cancel_kind(&TriggerKey::new(owner_id, TriggerKind::Escalation))?;
                self.alerts.dismiss(owner_id);
                info!(owner_id, "alert dismissed");
                Ok(ActionOutcome::Dismissed)
            }
        }
    }

    /// Cancel everything, then record and delete. Triggers go first so
    /// nothing can fire against a deleted record.
    fn close_out(&self, owner_id: i64, outcome: DoseOutcome) -> Result<ActionOutcome> {
        self.scheduler.cancel_locked(owner_id)?;
        self.alerts.dismiss(owner_id);
        self.store.record_dose_outcome(owner_id, outcome)?;
        self.store.delete(owner_id)?;
        info!(owner_id, %outcome, "dose outcome recorded");
        Ok(ActionOutcome::Recorded { outcome })
    }
}

fn invalid_snooze(duration: Duration) -> CoreError {
    ValidationError::InvalidSnooze {
        seconds: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
    }
    .into()
}

fn validate_snooze(duration: Duration) -> Result<()> {
    if duration.is_zero() || duration > MAX_SNOOZE {
        return Err(invalid_snooze(duration));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snooze_bounds() {
        assert!(validate_snooze(Duration::from_secs(300)).is_ok());
        assert!(validate_snooze(MAX_SNOOZE).is_ok());
        assert!(validate_snooze(Duration::ZERO).is_err());
        assert!(validate_snooze(MAX_SNOOZE + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn actions_serialize_with_seconds() {
        let json = serde_json::to_string(&UserAction::Snooze(Duration::from_secs(600))).unwrap();
        assert_eq!(json, r#"{"action":"snooze","secs":600}"#);
        let back: UserAction = serde_json::from_str(r#"{"action":"dismiss"}"#).unwrap();
        assert_eq!(back, UserAction::Dismiss);
    }
}
