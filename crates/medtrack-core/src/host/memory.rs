//! In-process host implementations.
//!
//! Used by the test suites and by anything that wants to drive the engine
//! without an OS underneath. Each fake records what it was asked to do and
//! can be told to fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{AlertRequest, AlertSink, DedupLedger, ScheduleStore, TimerHost, WakeLockHost, WakeToken};
use crate::error::{AlertError, CoreError, HostError, Result};
use crate::reminder::{FiredTrigger, PrecisionMode, TimerHandle, TriggerKey, TriggerKind};
use crate::schedule::{DoseOutcome, MedicationSchedule, NewMedication};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A timer the memory host is holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub key: TriggerKey,
    pub handle: TimerHandle,
    pub fire_at: DateTime<Utc>,
    pub mode: PrecisionMode,
}

/// Timer facility backed by a map.
#[derive(Debug)]
pub struct MemoryTimerHost {
    pending: Mutex<BTreeMap<TriggerKey, PendingTimer>>,
    next_handle: AtomicU64,
    precise_permitted: AtomicBool,
    unavailable_modes: Mutex<HashSet<PrecisionMode>>,
    refused_owners: Mutex<HashSet<i64>>,
    refused_kinds: Mutex<HashSet<TriggerKind>>,
    register_calls: AtomicUsize,
}

impl Default for MemoryTimerHost {
    fn default() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
            precise_permitted: AtomicBool::new(true),
            unavailable_modes: Mutex::new(HashSet::new()),
            refused_owners: Mutex::new(HashSet::new()),
            refused_kinds: Mutex::new(HashSet::new()),
            register_calls: AtomicUsize::new(0),
        }
    }
}

impl MemoryTimerHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_precise_permitted(&self, permitted: bool) {
        self.precise_permitted.store(permitted, Ordering::SeqCst);
    }

    /// Make `mode` report [`HostError::ModeUnavailable`].
    pub fn disable_mode(&self, mode: PrecisionMode) {
        guard(&self.unavailable_modes).insert(mode);
    }

    /// Refuse every registration for `owner_id`.
    pub fn refuse_owner(&self, owner_id: i64) {
        guard(&self.refused_owners).insert(owner_id);
    }

    pub fn allow_owner(&self, owner_id: i64) {
        guard(&self.refused_owners).remove(&owner_id);
    }

    /// Refuse every registration of `kind`, whatever the owner.
    pub fn refuse_kind(&self, kind: TriggerKind) {
        guard(&self.refused_kinds).insert(kind);
    }

    pub fn allow_kind(&self, kind: TriggerKind) {
        guard(&self.refused_kinds).remove(&kind);
    }

    pub fn pending(&self) -> Vec<PendingTimer> {
        guard(&self.pending).values().cloned().collect()
    }

    pub fn pending_for(&self, owner_id: i64) -> Vec<PendingTimer> {
        guard(&self.pending)
            .values()
            .filter(|t| t.key.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &TriggerKey) -> Option<PendingTimer> {
        guard(&self.pending).get(key).cloned()
    }

    /// Successful and failed registration attempts so far.
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<FiredTrigger> {
        let mut pending = guard(&self.pending);
        let mut due: Vec<PendingTimer> = pending
            .values()
            .filter(|t| t.fire_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then(a.key.cmp(&b.key)));
        for timer in &due {
            pending.remove(&timer.key);
        }
        due.into_iter()
            .map(|t| FiredTrigger::new(t.key, t.handle))
            .collect()
    }
}

impl TimerHost for MemoryTimerHost {
    fn register_one_shot(
        &self,
        key: TriggerKey,
        fire_at: DateTime<Utc>,
        mode: PrecisionMode,
    ) -> Result<TimerHandle, HostError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if guard(&self.refused_owners).contains(&key.owner_id)
            || guard(&self.refused_kinds).contains(&key.kind)
        {
            return Err(HostError::Refused {
                key,
                message: "registration refused".into(),
            });
        }
        if guard(&self.unavailable_modes).contains(&mode) {
            return Err(HostError::ModeUnavailable(mode));
        }
        let handle = TimerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        guard(&self.pending).insert(
            key,
            PendingTimer {
                key,
                handle,
                fire_at,
                mode,
            },
        );
        Ok(handle)
    }

    fn cancel(&self, key: &TriggerKey) -> Result<(), HostError> {
        guard(&self.pending).remove(key);
        Ok(())
    }

    fn is_precise_scheduling_permitted(&self) -> bool {
        self.precise_permitted.load(Ordering::SeqCst)
    }
}

/// Wake lock that counts holds.
#[derive(Debug, Default)]
pub struct MemoryWakeLock {
    held: Mutex<HashMap<WakeToken, (String, Duration)>>,
    requests: Mutex<Vec<(String, Duration)>>,
    next_token: AtomicU64,
    acquired: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Holds acquired and not yet released.
    pub fn held(&self) -> usize {
        guard(&self.held).len()
    }

    pub fn acquired_total(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// The bound of every hold still outstanding.
    pub fn held_bounds(&self) -> Vec<Duration> {
        guard(&self.held).values().map(|(_, d)| *d).collect()
    }

    /// Tag and bound of every granted hold, in order.
    pub fn requests(&self) -> Vec<(String, Duration)> {
        guard(&self.requests).clone()
    }
}

impl WakeLockHost for MemoryWakeLock {
    fn acquire(&self, tag: &str, max_hold: Duration) -> Result<WakeToken, HostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::WakeUnavailable("wake lock disabled".into()));
        }
        let token = WakeToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        guard(&self.held).insert(token, (tag.to_string(), max_hold));
        guard(&self.requests).push((tag.to_string(), max_hold));
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    fn release(&self, token: WakeToken) {
        guard(&self.held).remove(&token);
    }
}

/// Alert sink that records deliveries.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    delivered: Mutex<Vec<AlertRequest>>,
    dismissed: Mutex<Vec<i64>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` delivery attempts.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<AlertRequest> {
        guard(&self.delivered).clone()
    }

    pub fn dismissed(&self) -> Vec<i64> {
        guard(&self.dismissed).clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl AlertSink for RecordingAlertSink {
    fn deliver(&self, request: &AlertRequest) -> Result<(), AlertError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AlertError::Unavailable("notification channel busy".into()));
        }
        guard(&self.delivered).push(request.clone());
        Ok(())
    }

    fn dismiss(&self, owner_id: i64) {
        guard(&self.dismissed).push(owner_id);
    }
}

/// Medication store backed by a map.
#[derive(Debug)]
pub struct MemoryScheduleStore {
    schedules: Mutex<BTreeMap<i64, MedicationSchedule>>,
    outcomes: Mutex<Vec<(i64, DoseOutcome)>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for MemoryScheduleStore {
    fn default() -> Self {
        Self {
            schedules: Mutex::new(BTreeMap::new()),
            outcomes: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, medication: NewMedication) -> MedicationSchedule {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        let schedule = medication.with_id(id);
        guard(&self.schedules).insert(id, schedule.clone());
        schedule
    }

    /// Insert or replace by id.
    pub fn put(&self, schedule: MedicationSchedule) {
        self.next_id.fetch_max(schedule.id as u64 + 1, Ordering::SeqCst);
        guard(&self.schedules).insert(schedule.id, schedule);
    }

    pub fn contains(&self, id: i64) -> bool {
        guard(&self.schedules).contains_key(&id)
    }

    pub fn outcomes(&self) -> Vec<(i64, DoseOutcome)> {
        guard(&self.outcomes).clone()
    }

    /// Make every read fail, as a store that cannot be opened would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Custom("medication store unavailable".into()));
        }
        Ok(())
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn active_schedules(&self) -> Result<Vec<MedicationSchedule>> {
        self.check_available()?;
        Ok(guard(&self.schedules)
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    fn get_by_id(&self, id: i64) -> Result<Option<MedicationSchedule>> {
        self.check_available()?;
        Ok(guard(&self.schedules).get(&id).cloned())
    }

    fn record_dose_outcome(&self, id: i64, outcome: DoseOutcome) -> Result<()> {
        self.check_available()?;
        guard(&self.outcomes).push((id, outcome));
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.check_available()?;
        guard(&self.schedules).remove(&id);
        Ok(())
    }
}

/// Dedup ledger that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryDedupLedger {
    fired: Mutex<HashMap<TriggerKey, DateTime<Utc>>>,
}

impl MemoryDedupLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupLedger for MemoryDedupLedger {
    fn last_fired(&self, key: &TriggerKey) -> Result<Option<DateTime<Utc>>> {
        Ok(guard(&self.fired).get(key).copied())
    }

    fn record_fired(&self, key: &TriggerKey, at: DateTime<Utc>) -> Result<()> {
        guard(&self.fired).insert(*key, at);
        Ok(())
    }
}
