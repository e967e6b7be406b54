//! Reminder scheduling and delivery engine.
//!
//! The engine turns medication records into host timers and reacts when
//! those timers fire:
//!
//! - [`TimeResolver`]: next trigger instants (pure)
//! - [`TriggerStore`]: the registrations this process knows about
//! - [`AlarmScheduler`]: registers and cancels the triggers of a medication
//! - [`DeliveryDispatcher`]: handles a fired trigger (dedup, wake hold,
//!   alert, follow-up escalation)
//! - [`ActionHandler`]: taken / snooze / dismiss / missed
//! - [`RecoveryCoordinator`]: rebuilds everything after a restart
//!
//! [`ReminderEngine`] wires them together over a set of [`Collaborators`].
//! All work for one medication runs under that medication's lock; different
//! medications proceed independently.

mod actions;
mod dispatcher;
mod locks;
mod recovery;
mod scheduler;
mod time;
mod trigger;
mod wake;

pub use actions::{ActionHandler, ActionOutcome, UserAction, MAX_SNOOZE};
pub use dispatcher::{DeliveryDispatcher, DiscardReason, DispatchOutcome, FiredTrigger};
pub use locks::OwnerLocks;
pub use recovery::{RecoveryCoordinator, RecoveryFailure, RecoveryReport};
pub use scheduler::{AlarmScheduler, ScheduleReport};
pub use time::TimeResolver;
pub use trigger::{
    Liveness, PrecisionMode, TimerHandle, TriggerKey, TriggerKind, TriggerRegistration, TriggerStore,
};
pub use wake::WakeHold;

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::Result;
use crate::host::{AlertRequest, AlertSink, DedupLedger, ScheduleStore, TimerHost, WakeLockHost};
use crate::schedule::MedicationSchedule;
use crate::storage::Config;

/// Alert preferences passed through to every [`AlertRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPreferences {
    pub silent_mode: bool,
    pub vibration: bool,
    pub custom_sound: Option<String>,
    pub ring_secs: u64,
}

impl Default for AlertPreferences {
    fn default() -> Self {
        Self {
            silent_mode: false,
            vibration: true,
            custom_sound: None,
            ring_secs: 60,
        }
    }
}

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub resolver: TimeResolver,
    /// A repeat firing of the same key inside this window is ignored.
    pub dedup_window: chrono::Duration,
    /// Pause before the single delivery retry.
    pub retry_delay: Duration,
    /// Pause before recovery starts.
    pub settle_delay: Duration,
    pub alarm_wake_hold: Duration,
    pub pre_notice_wake_hold: Duration,
    pub default_snooze: Duration,
    pub alerts: AlertPreferences,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        let r = &config.reminders;
        let mins = |m: u32| chrono::Duration::minutes(i64::from(m));
        Self {
            resolver: TimeResolver::new(
                mins(r.pre_notice_offset_mins),
                mins(r.pre_notice_lead_mins),
                mins(r.escalation_interval_mins),
            ),
            dedup_window: chrono::Duration::seconds(i64::try_from(r.dedup_window_secs).unwrap_or(i64::MAX)),
            retry_delay: Duration::from_secs(r.retry_delay_secs),
            settle_delay: Duration::from_secs(r.settle_delay_secs),
            alarm_wake_hold: Duration::from_secs(config.wake.alarm_hold_secs),
            pre_notice_wake_hold: Duration::from_secs(config.wake.pre_notice_hold_secs),
            default_snooze: Duration::from_secs(u64::from(r.default_snooze_mins) * 60),
            alerts: AlertPreferences {
                silent_mode: config.alerts.silent_mode,
                vibration: config.alerts.vibration,
                custom_sound: config.alerts.custom_sound.clone(),
                ring_secs: config.alerts.ring_secs,
            },
        }
    }

    /// Longest wake hold a delivery of `kind` may take.
    pub fn wake_bound(&self, kind: TriggerKind) -> Duration {
        match kind {
            TriggerKind::PreNotice => self.pre_notice_wake_hold,
            TriggerKind::Main | TriggerKind::Escalation | TriggerKind::Snooze => self.alarm_wake_hold,
        }
    }

    pub fn alert_request(&self, schedule: &MedicationSchedule, kind: TriggerKind) -> AlertRequest {
        AlertRequest {
            owner_id: schedule.id,
            kind,
            name: schedule.name.clone(),
            dosage: schedule.dosage.clone(),
            sound: !self.alerts.silent_mode,
            vibrate: self.alerts.vibration,
            custom_sound: self.alerts.custom_sound.clone(),
            ring_secs: self.alerts.ring_secs,
        }
    }
}

/// The outside world, as the engine sees it.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ScheduleStore>,
    pub timers: Arc<dyn TimerHost>,
    pub alerts: Arc<dyn AlertSink>,
    pub wake: Arc<dyn WakeLockHost>,
    pub dedup: Arc<dyn DedupLedger>,
    pub clock: Arc<dyn Clock>,
}

/// Entry point for hosts and front ends.
pub struct ReminderEngine {
    scheduler: Arc<AlarmScheduler>,
    dispatcher: DeliveryDispatcher,
    actions: ActionHandler,
    recovery: RecoveryCoordinator,
    settings: EngineSettings,
    store: Arc<dyn ScheduleStore>,
}

impl ReminderEngine {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        let Collaborators {
            store,
            timers,
            alerts,
            wake,
            dedup,
            clock,
        } = collaborators;

        let scheduler = Arc::new(AlarmScheduler::new(timers, clock.clone(), settings.resolver));
        let dispatcher = DeliveryDispatcher::new(
            scheduler.clone(),
            store.clone(),
            alerts.clone(),
            wake,
            dedup,
            clock.clone(),
            settings.clone(),
        );
        let actions = ActionHandler::new(scheduler.clone(), store.clone(), alerts, clock.clone());
        let recovery = RecoveryCoordinator::new(scheduler.clone(), store.clone(), clock, settings.settle_delay);

        Self {
            scheduler,
            dispatcher,
            actions,
            recovery,
            settings,
            store,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn schedule(&self, schedule: &MedicationSchedule) -> Result<ScheduleReport> {
        self.scheduler.schedule(schedule)
    }

    /// Look the medication up and schedule it.
    pub fn reschedule(&self, owner_id: i64) -> Result<ScheduleReport> {
        let schedule = self
            .store
            .get_by_id(owner_id)?
            .ok_or(crate::error::CoreError::UnknownOwner(owner_id))?;
        self.scheduler.schedule(&schedule)
    }

    pub fn cancel(&self, owner_id: i64) -> Result<()> {
        self.scheduler.cancel(owner_id)
    }

    pub fn can_schedule_exact_triggers(&self) -> bool {
        self.scheduler.can_schedule_exact_triggers()
    }

    pub fn on_trigger_fired(&self, fired: FiredTrigger) -> DispatchOutcome {
        self.dispatcher.on_trigger_fired(fired)
    }

    pub fn handle_action(&self, owner_id: i64, action: UserAction) -> Result<ActionOutcome> {
        self.actions.handle(owner_id, action)
    }

    /// Snooze for the configured default duration.
    pub fn snooze_default(&self, owner_id: i64) -> Result<ActionOutcome> {
        self.handle_action(owner_id, UserAction::Snooze(self.settings.default_snooze))
    }

    pub fn recover_all(&self) -> Result<RecoveryReport> {
        self.recovery.recover_all()
    }

    /// Recovery without the settle delay, for callers that know the host is
    /// already up.
    pub fn recover_now(&self) -> Result<RecoveryReport> {
        self.recovery.recover(Duration::ZERO)
    }

    /// The host came back from a restart or reboot.
    pub fn on_host_restarted(&self) -> Result<RecoveryReport> {
        self.recover_all()
    }

    /// Registrations made by this process, earliest first.
    pub fn triggers(&self) -> Vec<TriggerRegistration> {
        self.scheduler.triggers().all()
    }
}
