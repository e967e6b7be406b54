//! Trigger identity and the in-process registration table.
//!
//! A trigger is addressed by a structured [`TriggerKey`] of owner id and
//! [`TriggerKind`]. The key doubles as the host request key, so registering
//! the same key twice replaces the earlier timer instead of adding one.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Role of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    PreNotice,
    Main,
    Escalation,
    Snooze,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 4] = [
        TriggerKind::PreNotice,
        TriggerKind::Main,
        TriggerKind::Escalation,
        TriggerKind::Snooze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::PreNotice => "pre_notice",
            TriggerKind::Main => "main",
            TriggerKind::Escalation => "escalation",
            TriggerKind::Snooze => "snooze",
        }
    }

    /// Whether firing this kind should start (or continue) an escalation
    /// chain. A snooze fires with main-alarm semantics.
    pub fn escalates(&self) -> bool {
        !matches!(self, TriggerKind::PreNotice)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pre_notice" | "prenotice" => Ok(TriggerKind::PreNotice),
            "main" => Ok(TriggerKind::Main),
            "escalation" => Ok(TriggerKind::Escalation),
            "snooze" => Ok(TriggerKind::Snooze),
            _ => Err(ValidationError::UnknownTriggerKind(s.to_string())),
        }
    }
}

/// Request key of a trigger: one slot per `(owner, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub owner_id: i64,
    pub kind: TriggerKind,
}

impl TriggerKey {
    pub fn new(owner_id: i64, kind: TriggerKind) -> Self {
        Self { owner_id, kind }
    }

    /// Every key an owner can have.
    pub fn all_for(owner_id: i64) -> impl Iterator<Item = TriggerKey> {
        TriggerKind::ALL.into_iter().map(move |kind| TriggerKey::new(owner_id, kind))
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_id, self.kind)
    }
}

impl FromStr for TriggerKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, kind) = s.split_once(':').ok_or_else(|| ValidationError::InvalidValue {
            field: "trigger key".into(),
            message: format!("expected <owner>:<kind>, got '{s}'"),
        })?;
        let owner_id = owner.parse().map_err(|_| ValidationError::InvalidValue {
            field: "trigger key".into(),
            message: format!("owner id '{owner}' is not an integer"),
        })?;
        Ok(TriggerKey::new(owner_id, kind.parse()?))
    }
}

/// Timer precision, most precise first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionMode {
    /// Exact, and allowed to wake the device out of idle/doze.
    ExactAllowWhileIdle,
    Exact,
    /// Host may batch or defer the timer.
    Inexact,
}

impl PrecisionMode {
    /// Descending order of preference.
    pub const PREFERENCE: [PrecisionMode; 3] = [
        PrecisionMode::ExactAllowWhileIdle,
        PrecisionMode::Exact,
        PrecisionMode::Inexact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrecisionMode::ExactAllowWhileIdle => "exact_allow_while_idle",
            PrecisionMode::Exact => "exact",
            PrecisionMode::Inexact => "inexact",
        }
    }

    pub fn is_precise(&self) -> bool {
        !matches!(self, PrecisionMode::Inexact)
    }
}

impl fmt::Display for PrecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrecisionMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrecisionMode::PREFERENCE
            .into_iter()
            .find(|mode| mode.as_str() == s.trim())
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "precision".into(),
                message: format!("unknown precision mode '{s}'"),
            })
    }
}

/// Host-assigned identity of one concrete timer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerHandle(pub u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One pending timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRegistration {
    pub key: TriggerKey,
    pub fire_at: DateTime<Utc>,
    pub handle: TimerHandle,
    pub precision: PrecisionMode,
}

impl TriggerRegistration {
    pub fn owner_id(&self) -> i64 {
        self.key.owner_id
    }

    pub fn kind(&self) -> TriggerKind {
        self.key.kind
    }
}

/// How a fired handle relates to what the store currently knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The handle is the live registration for its key.
    Live,
    /// Nothing recorded for the key in this process; trust the host.
    Unknown,
    /// The handle was cancelled after it was registered.
    Cancelled,
    /// A newer registration replaced the handle.
    Superseded,
}

#[derive(Debug, Default)]
struct Table {
    live: HashMap<TriggerKey, TriggerRegistration>,
    /// Last cancelled handle per key, so a firing that raced a cancel can
    /// be recognised.
    cancelled: HashMap<TriggerKey, TimerHandle>,
}

/// In-process view of registered triggers.
///
/// The host owns the timers; this table mirrors what this process has
/// registered so that chained and cancelled triggers can be told apart.
/// It starts empty after a restart.
#[derive(Debug, Default)]
pub struct TriggerStore {
    table: Mutex<Table>,
}

impl TriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a registration, replacing any earlier one for the same key.
    /// Returns the registration it replaced.
    pub fn insert(&self, registration: TriggerRegistration) -> Option<TriggerRegistration> {
        let mut table = self.table();
        table.cancelled.remove(&registration.key);
        table.live.insert(registration.key, registration)
    }

    /// Forget the live registration for `key`, remembering its handle as
    /// cancelled. Removing an absent key is a no-op.
    pub fn remove(&self, key: &TriggerKey) -> Option<TriggerRegistration> {
        let mut table = self.table();
        let removed = table.live.remove(key);
        if let Some(ref registration) = removed {
            table.cancelled.insert(*key, registration.handle);
        }
        removed
    }

    /// A one-shot timer fired; it is no longer pending.
    pub fn mark_fired(&self, key: &TriggerKey, handle: TimerHandle) {
        let mut table = self.table();
        if table.live.get(key).map(|r| r.handle) == Some(handle) {
            table.live.remove(key);
        }
    }

    pub fn get(&self, key: &TriggerKey) -> Option<TriggerRegistration> {
        self.table().live.get(key).cloned()
    }

    pub fn liveness(&self, key: &TriggerKey, handle: TimerHandle) -> Liveness {
        let table = self.table();
        match table.live.get(key) {
            Some(live) if live.handle == handle => Liveness::Live,
            Some(_) => Liveness::Superseded,
            None if table.cancelled.get(key) == Some(&handle) => Liveness::Cancelled,
            None => Liveness::Unknown,
        }
    }

    /// Live registrations for one owner, ordered by kind.
    pub fn for_owner(&self, owner_id: i64) -> Vec<TriggerRegistration> {
        let table = self.table();
        let mut out: Vec<_> = table
            .live
            .values()
            .filter(|r| r.key.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.key.kind);
        out
    }

    /// All live registrations ordered by fire time.
    pub fn all(&self) -> Vec<TriggerRegistration> {
        let mut out: Vec<_> = self.table().live.values().cloned().collect();
        out.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then(a.key.cmp(&b.key)));
        out
    }

    pub fn len(&self) -> usize {
        self.table().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reg(owner: i64, kind: TriggerKind, handle: u64) -> TriggerRegistration {
        TriggerRegistration {
            key: TriggerKey::new(owner, kind),
            fire_at: Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap(),
            handle: TimerHandle(handle),
            precision: PrecisionMode::Exact,
        }
    }

    #[test]
    fn key_text_form_round_trips() {
        let key = TriggerKey::new(42, TriggerKind::PreNotice);
        assert_eq!(key.to_string(), "42:pre_notice");
        assert_eq!("42:pre_notice".parse::<TriggerKey>().unwrap(), key);
        assert_eq!("42:pre-notice".parse::<TriggerKey>().unwrap(), key);
        assert!("42".parse::<TriggerKey>().is_err());
        assert!("x:main".parse::<TriggerKey>().is_err());
        assert!("1:later".parse::<TriggerKey>().is_err());
    }

    #[test]
    fn insert_supersedes_same_key() {
        let store = TriggerStore::new();
        assert!(store.insert(reg(1, TriggerKind::Main, 1)).is_none());
        let old = store.insert(reg(1, TriggerKind::Main, 2)).unwrap();
        assert_eq!(old.handle, TimerHandle(1));
        assert_eq!(store.len(), 1);
        assert_eq!(store.liveness(&TriggerKey::new(1, TriggerKind::Main), TimerHandle(1)), Liveness::Superseded);
    }

    #[test]
    fn remove_is_idempotent_and_tombstones_the_handle() {
        let store = TriggerStore::new();
        let key = TriggerKey::new(1, TriggerKind::Escalation);
        store.insert(reg(1, TriggerKind::Escalation, 9));
        assert!(store.remove(&key).is_some());
        assert!(store.remove(&key).is_none());
        assert_eq!(store.liveness(&key, TimerHandle(9)), Liveness::Cancelled);
        assert_eq!(store.liveness(&key, TimerHandle(10)), Liveness::Unknown);
    }

    #[test]
    fn mark_fired_only_clears_matching_handle() {
        let store = TriggerStore::new();
        let key = TriggerKey::new(1, TriggerKind::Main);
        store.insert(reg(1, TriggerKind::Main, 2));
        store.mark_fired(&key, TimerHandle(1));
        assert!(store.get(&key).is_some());
        store.mark_fired(&key, TimerHandle(2));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn for_owner_filters_and_orders_by_kind() {
        let store = TriggerStore::new();
        store.insert(reg(1, TriggerKind::Main, 1));
        store.insert(reg(1, TriggerKind::PreNotice, 2));
        store.insert(reg(2, TriggerKind::Main, 3));
        let kinds: Vec<_> = store.for_owner(1).iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![TriggerKind::PreNotice, TriggerKind::Main]);
    }

    #[test]
    fn precision_modes_parse_by_name() {
        assert_eq!("exact".parse::<PrecisionMode>().unwrap(), PrecisionMode::Exact);
        assert!("fast".parse::<PrecisionMode>().is_err());
        assert!(!PrecisionMode::Inexact.is_precise());
    }
}
