//! Capabilities the engine needs from its environment.
//!
//! The engine never talks to an OS service directly. Timers, wake locks,
//! alert rendering, the medication store and the dedup ledger are reached
//! through these traits; [`memory`] has in-process implementations used by
//! tests and simulations.

pub mod memory;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, HostError, Result};
use crate::reminder::{PrecisionMode, TimerHandle, TriggerKey, TriggerKind};
use crate::schedule::{DoseOutcome, MedicationSchedule};

/// The host's one-shot timer facility.
///
/// Registering a key that already has a pending timer must replace that
/// timer: the key is the request identity, as with an OS alarm request
/// code.
pub trait TimerHost: Send + Sync {
    fn register_one_shot(
        &self,
        key: TriggerKey,
        fire_at: DateTime<Utc>,
        mode: PrecisionMode,
    ) -> Result<TimerHandle, HostError>;

    /// Cancel whatever is pending under `key`. Cancelling nothing is fine.
    fn cancel(&self, key: &TriggerKey) -> Result<(), HostError>;

    fn is_precise_scheduling_permitted(&self) -> bool;
}

/// Proof that a wake hold was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakeToken(pub u64);

/// Keeps the device awake long enough to finish a delivery.
pub trait WakeLockHost: Send + Sync {
    /// Acquire a hold that the host drops by itself after `max_hold`.
    fn acquire(&self, tag: &str, max_hold: Duration) -> Result<WakeToken, HostError>;

    fn release(&self, token: WakeToken);
}

/// What the alert collaborator is asked to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRequest {
    pub owner_id: i64,
    pub kind: TriggerKind,
    pub name: String,
    pub dosage: String,
    /// Play a sound (false in silent mode).
    pub sound: bool,
    pub vibrate: bool,
    /// Custom sound resource; `None` means the host default.
    pub custom_sound: Option<String>,
    /// Stop ringing after this many seconds without a response.
    pub ring_secs: u64,
}

/// Notification / alarm UI.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, request: &AlertRequest) -> Result<(), AlertError>;

    /// Take down whatever is showing for `owner_id` (sound included).
    fn dismiss(&self, owner_id: i64);
}

/// The medication record store.
pub trait ScheduleStore: Send + Sync {
    fn active_schedules(&self) -> Result<Vec<MedicationSchedule>>;

    fn get_by_id(&self, id: i64) -> Result<Option<MedicationSchedule>>;

    fn record_dose_outcome(&self, id: i64, outcome: DoseOutcome) -> Result<()>;

    fn delete(&self, id: i64) -> Result<()>;
}

/// Last-fired timestamps per trigger key, surviving restarts.
pub trait DedupLedger: Send + Sync {
    fn last_fired(&self, key: &TriggerKey) -> Result<Option<DateTime<Utc>>>;

    fn record_fired(&self, key: &TriggerKey, at: DateTime<Utc>) -> Result<()>;
}
