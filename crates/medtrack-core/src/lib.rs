//! # MedTrack Core Library
//!
//! This library provides the core logic for MedTrack, a medication reminder
//! tool. The `medtrack` CLI is a thin layer over it.
//!
//! ## Architecture
//!
//! - **Reminder engine**: turns each medication into host timers (pre-notice,
//!   main alarm, escalation repeats, snooze), handles fired timers and user
//!   responses, and rebuilds everything after a restart
//! - **Host capabilities**: timers, wake holds, alert display, the medication
//!   store and the dedup ledger, all behind traits with in-memory fakes
//! - **Storage**: SQLite medication/history storage, a SQLite-backed timer
//!   host and TOML configuration
//!
//! ## Key Components
//!
//! - [`ReminderEngine`]: entry point wiring the engine together
//! - [`TimeResolver`]: next trigger instants
//! - [`Database`]: medication and history persistence
//! - [`Config`]: application configuration management

pub mod clock;
pub mod error;
pub mod host;
pub mod reminder;
pub mod schedule;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AlertError, ConfigError, CoreError, HostError, Result, StoreError, ValidationError};
pub use host::{AlertRequest, AlertSink, DedupLedger, ScheduleStore, TimerHost, WakeLockHost, WakeToken};
pub use reminder::{
    ActionOutcome, Collaborators, DispatchOutcome, EngineSettings, FiredTrigger, PrecisionMode,
    RecoveryReport, ReminderEngine, ScheduleReport, TimeResolver, TriggerKey, TriggerKind,
    TriggerRegistration, UserAction,
};
pub use schedule::{DoseOutcome, HistoryEntry, MedicationSchedule, NewMedication, TimeOfDay};
pub use storage::{Config, Database, SqliteTimerHost};
