//! Integration tests running the engine over the SQLite store and timer host.
//!
//! Every "process" opens the database file afresh, so state that survives
//! only does so through disk.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Local, TimeZone, Timelike, Utc};
use tempfile::tempdir;

use medtrack_core::host::memory::{MemoryWakeLock, RecordingAlertSink};
use medtrack_core::reminder::DiscardReason;
use medtrack_core::storage::HostConfig;
use medtrack_core::{
    ActionOutcome, Clock, Collaborators, Database, DispatchOutcome, DoseOutcome, EngineSettings,
    ManualClock, NewMedication, ReminderEngine, SqliteTimerHost, TimeOfDay, TriggerKind,
    UserAction,
};

struct Process {
    engine: ReminderEngine,
    db: Arc<Database>,
    timers: Arc<SqliteTimerHost>,
    alerts: Arc<RecordingAlertSink>,
}

fn start(path: &Path, clock: Arc<ManualClock>) -> Process {
    let db = Arc::new(Database::open_at(path).unwrap());
    let timers = Arc::new(SqliteTimerHost::new(db.clone(), &HostConfig::default()));
    let alerts = Arc::new(RecordingAlertSink::new());
    let engine = ReminderEngine::new(
        Collaborators {
            store: db.clone(),
            timers: timers.clone(),
            alerts: alerts.clone(),
            wake: Arc::new(MemoryWakeLock::new()),
            dedup: db.clone(),
            clock,
        },
        EngineSettings::default(),
    );
    Process {
        engine,
        db,
        timers,
        alerts,
    }
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 15, 8, 0, 0).unwrap()))
}

fn due_in(clock: &ManualClock, minutes: i64) -> TimeOfDay {
    let at = (clock.now() + Duration::minutes(minutes)).with_timezone(&Local);
    TimeOfDay::new(at.hour() as u8, at.minute() as u8).unwrap()
}

#[test]
fn timers_and_records_survive_a_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("medtrack.db");
    let clock = clock();

    let first = start(&path, clock.clone());
    let med = first
        .db
        .add_medication(&NewMedication::new("Metformin", "500mg", due_in(&clock, 10)))
        .unwrap();
    first.engine.schedule(&med).unwrap();
    drop(first);

    let second = start(&path, clock.clone());
    let pending = second.timers.pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert!(second.engine.triggers().is_empty());

    // recovery re-registers the same instants
    let report = second.engine.recover_now().unwrap();
    assert_eq!(report.scheduled.len(), 1);
    let after = second.timers.pending().unwrap();
    assert_eq!(
        after.iter().map(|r| r.fire_at).collect::<Vec<_>>(),
        pending.iter().map(|r| r.fire_at).collect::<Vec<_>>()
    );
}

#[test]
fn timer_fired_after_restart_is_trusted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("medtrack.db");
    let clock = clock();

    let first = start(&path, clock.clone());
    let med = first
        .db
        .add_medication(&NewMedication::new("Aspirin", "81mg", due_in(&clock, 3)))
        .unwrap();
    first.engine.schedule(&med).unwrap();
    drop(first);

    clock.advance(Duration::minutes(3));
    let second = start(&path, clock.clone());
    let fired = second.timers.due(clock.now()).unwrap();
    assert_eq!(fired.len(), 1);
    let outcome = second.engine.on_trigger_fired(fired[0]);
    assert!(outcome.is_delivered());
    assert_eq!(second.alerts.delivered()[0].name, "Aspirin");

    let kinds: Vec<_> = second
        .timers
        .pending()
        .unwrap()
        .into_iter()
        .map(|r| r.key.kind)
        .collect();
    assert_eq!(kinds, vec![TriggerKind::Escalation]);
}

#[test]
fn dedup_window_spans_processes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("medtrack.db");
    let clock = clock();

    let first = start(&path, clock.clone());
    let med = first
        .db
        .add_medication(&NewMedication::new("Aspirin", "81mg", due_in(&clock, 3)))
        .unwrap();
    first.engine.schedule(&med).unwrap();
    clock.advance(Duration::minutes(3));
    let fired = first.timers.due(clock.now()).unwrap();
    assert!(first.engine.on_trigger_fired(fired[0]).is_delivered());
    drop(first);

    clock.advance(Duration::seconds(5));
    let second = start(&path, clock.clone());
    assert_eq!(second.engine.on_trigger_fired(fired[0]), DispatchOutcome::Duplicate);
    assert!(second.alerts.delivered().is_empty());
}

#[test]
fn acknowledge_after_restart_clears_everything() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("medtrack.db");
    let clock = clock();

    let first = start(&path, clock.clone());
    let med = first
        .db
        .add_medication(&NewMedication::new("Warfarin", "5mg", due_in(&clock, 30)))
        .unwrap();
    first.engine.schedule(&med).unwrap();
    drop(first);

    let second = start(&path, clock.clone());
    let outcome = second.engine.handle_action(med.id, UserAction::Acknowledge).unwrap();
    assert_eq!(outcome, ActionOutcome::Recorded { outcome: DoseOutcome::Taken });
    assert!(second.timers.pending().unwrap().is_empty());
    assert!(second.db.get_medication(med.id).unwrap().is_none());

    let history = second.db.list_history(None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].medication_name, "Warfarin");
    assert_eq!(history[0].outcome, DoseOutcome::Taken);
}

#[test]
fn firing_for_deleted_record_cancels_leftovers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("medtrack.db");
    let clock = clock();

    let proc = start(&path, clock.clone());
    let med = proc
        .db
        .add_medication(&NewMedication::new("Aspirin", "81mg", due_in(&clock, 10)))
        .unwrap();
    proc.engine.schedule(&med).unwrap();
    proc.db.delete_medication(med.id).unwrap();

    clock.advance(Duration::minutes(5));
    let fired = proc.timers.due(clock.now()).unwrap();
    assert_eq!(
        proc.engine.on_trigger_fired(fired[0]),
        DispatchOutcome::Discarded {
            reason: DiscardReason::OwnerMissing
        }
    );
    assert!(proc.timers.pending().unwrap().is_empty());
}

#[test]
fn recovery_skips_inactive_medications() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("medtrack.db");
    let clock = clock();

    let proc = start(&path, clock.clone());
    let on = proc
        .db
        .add_medication(&NewMedication::new("On", "1", due_in(&clock, 30)))
        .unwrap();
    let off = proc
        .db
        .add_medication(&NewMedication::new("Off", "1", due_in(&clock, 45)))
        .unwrap();
    proc.db.set_active(off.id, false).unwrap();

    let report = proc.engine.recover_all().unwrap();
    assert_eq!(report.scheduled.len(), 1);
    assert_eq!(report.scheduled[0].owner_id, on.id);
    assert!(report.failed.is_empty());
    assert_eq!(clock.sleeps(), vec![std::time::Duration::from_secs(5)]);
}
