//! SQLite-based medication storage.
//!
//! Provides persistent storage for:
//! - Medication records
//! - Dose history (taken / missed)
//! - Key-value store for application state, including dedup records

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{data_dir, migrations};
use crate::error::{CoreError, Result, StoreError};
use crate::host::{DedupLedger, ScheduleStore};
use crate::reminder::TriggerKey;
use crate::schedule::{DoseOutcome, HistoryEntry, MedicationSchedule, NewMedication, TimeOfDay};

/// Dose outcome totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseCounts {
    pub taken: u64,
    pub missed: u64,
}

impl DoseCounts {
    pub fn total(&self) -> u64 {
        self.taken + self.missed
    }
}

/// Full export of medications and history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub medications: Vec<MedicationSchedule>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Backup {
    pub const VERSION: u32 = 1;
}

const MEDICATION_COLUMNS: &str =
    "id, name, dosage, instructions, reminder_time, start_date, frequency, is_active";

fn conversion_failure<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn medication_from_row(row: &Row<'_>) -> rusqlite::Result<MedicationSchedule> {
    let time: String = row.get(4)?;
    Ok(MedicationSchedule {
        id: row.get(0)?,
        name: row.get(1)?,
        dosage: row.get(2)?,
        instructions: row.get(3)?,
        time_of_day: time
            .parse::<TimeOfDay>()
            .map_err(|e| conversion_failure(4, e))?,
        start_date: row.get(5)?,
        frequency_label: row.get(6)?,
        active: row.get(7)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let recorded_at: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        medication_name: row.get(1)?,
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
            .map_err(|e| conversion_failure(2, e))?
            .with_timezone(&Utc),
        outcome: status.parse().map_err(|e| conversion_failure(3, e))?,
    })
}

fn dedup_key(key: &TriggerKey) -> String {
    format!("dedup:{}:{}", key.owner_id, key.kind)
}

/// SQLite database for medications and dose history.
///
/// The connection sits behind a mutex so one handle can be shared by the
/// engine's collaborators.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Lock the underlying SQLite connection.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the database at `~/.config/medtrack/medtrack.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(&data_dir()?.join("medtrack.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Store a new medication and return it with its assigned id.
    pub fn add_medication(&self, medication: &NewMedication) -> Result<MedicationSchedule> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO medications
                (name, dosage, instructions, reminder_time, start_date, frequency, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            params![
                medication.name,
                medication.dosage,
                medication.instructions,
                medication.time_of_day.to_string(),
                medication.start_date,
                medication.frequency_label,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(medication.clone().with_id(conn.last_insert_rowid()))
    }

    /// Overwrite every mutable field of an existing medication.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownOwner`] if no medication has that id.
    pub fn update_medication(&self, medication: &MedicationSchedule) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE medications
             SET name = ?2, dosage = ?3, instructions = ?4, reminder_time = ?5,
                 start_date = ?6, frequency = ?7, is_active = ?8
             WHERE id = ?1",
            params![
                medication.id,
                medication.name,
                medication.dosage,
                medication.instructions,
                medication.time_of_day.to_string(),
                medication.start_date,
                medication.frequency_label,
                medication.active,
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::UnknownOwner(medication.id));
        }
        Ok(())
    }

    pub fn get_medication(&self, id: i64) -> Result<Option<MedicationSchedule>> {
        let conn = self.conn();
        let medication = conn
            .query_row(
                &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"),
                params![id],
                medication_from_row,
            )
            .optional()?;
        Ok(medication)
    }

    /// All medications ordered by reminder time.
    pub fn list_medications(&self) -> Result<Vec<MedicationSchedule>> {
        self.query_medications("1 = 1", params![])
    }

    pub fn list_active(&self) -> Result<Vec<MedicationSchedule>> {
        self.query_medications("is_active = 1", params![])
    }

    /// Medications whose name contains `query`, case-insensitively.
    pub fn search_medications(&self, query: &str) -> Result<Vec<MedicationSchedule>> {
        let pattern = format!(
            "%{}%",
            query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        self.query_medications("name LIKE ?1 ESCAPE '\\'", params![pattern])
    }

    fn query_medications(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<MedicationSchedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDICATION_COLUMNS} FROM medications WHERE {filter}
             ORDER BY reminder_time, id"
        ))?;
        let rows = stmt.query_map(args, medication_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE medications SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        if changed == 0 {
            return Err(CoreError::UnknownOwner(id));
        }
        Ok(())
    }

    /// Delete a medication. Returns whether a row was removed.
    pub fn delete_medication(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM medications WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn add_history(
        &self,
        medication_name: &str,
        outcome: DoseOutcome,
        recorded_at: DateTime<Utc>,
    ) -> Result<HistoryEntry> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO history (medication_name, recorded_at, status) VALUES (?1, ?2, ?3)",
            params![medication_name, recorded_at.to_rfc3339(), outcome.as_str()],
        )?;
        Ok(HistoryEntry {
            id: conn.last_insert_rowid(),
            medication_name: medication_name.to_string(),
            recorded_at,
            outcome,
        })
    }

    /// History, newest first.
    pub fn list_history(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn();
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let mut stmt = conn.prepare(
            "SELECT id, medication_name, recorded_at, status FROM history
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], history_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn dose_counts(&self) -> Result<DoseCounts> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM history GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut counts = DoseCounts::default();
        for row in rows {
            let (status, count) = row?;
            match status.parse::<DoseOutcome>() {
                Ok(DoseOutcome::Taken) => counts.taken += count,
                Ok(DoseOutcome::Missed) => counts.missed += count,
                Err(_) => tracing::warn!(status = %status, "unknown history status ignored"),
            }
        }
        Ok(counts)
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn export_backup(&self) -> Result<Backup> {
        Ok(Backup {
            version: Backup::VERSION,
            exported_at: Utc::now(),
            medications: self.list_medications()?,
            history: self.list_history(None)?,
        })
    }

    /// Replace all medications and history with the backup's contents,
    /// keeping their ids.
    pub fn import_backup(&self, backup: &Backup) -> Result<()> {
        if backup.version > Backup::VERSION {
            return Err(CoreError::Custom(format!(
                "backup version {} is newer than supported version {}",
                backup.version,
                Backup::VERSION
            )));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM medications", [])?;
        tx.execute("DELETE FROM history", [])?;
        let created_at = Utc::now().to_rfc3339();
        for med in &backup.medications {
            tx.execute(
                "INSERT INTO medications
                    (id, name, dosage, instructions, reminder_time, start_date, frequency, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    med.id,
                    med.name,
                    med.dosage,
                    med.instructions,
                    med.time_of_day.to_string(),
                    med.start_date,
                    med.frequency_label,
                    med.active,
                    created_at,
                ],
            )?;
        }
        for entry in &backup.history {
            tx.execute(
                "INSERT INTO history (id, medication_name, recorded_at, status) VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.id,
                    entry.medication_name,
                    entry.recorded_at.to_rfc3339(),
                    entry.outcome.as_str(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl ScheduleStore for Database {
    fn active_schedules(&self) -> Result<Vec<MedicationSchedule>> {
        self.list_active()
    }

    fn get_by_id(&self, id: i64) -> Result<Option<MedicationSchedule>> {
        self.get_medication(id)
    }

    fn record_dose_outcome(&self, id: i64, outcome: DoseOutcome) -> Result<()> {
        let medication = self.get_medication(id)?.ok_or(CoreError::UnknownOwner(id))?;
        self.add_history(&medication.name, outcome, Utc::now())?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.delete_medication(id)?;
        Ok(())
    }
}

impl DedupLedger for Database {
    fn last_fired(&self, key: &TriggerKey) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.kv_get(&dedup_key(key))? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                // an unreadable record must not block deliveries
                tracing::warn!(key = %key, "ignoring unreadable dedup record: {e}");
                Ok(None)
            }
        }
    }

    fn record_fired(&self, key: &TriggerKey, at: DateTime<Utc>) -> Result<()> {
        self.kv_set(&dedup_key(key), &at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::TriggerKind;
    use chrono::TimeZone;

    fn med(name: &str, time: &str) -> NewMedication {
        NewMedication::new(name, "10mg", time.parse().unwrap())
    }

    #[test]
    fn add_get_update_delete() {
        let db = Database::open_memory().unwrap();
        let mut stored = db.add_medication(&med("Lisinopril", "08:30")).unwrap();
        assert_eq!(db.get_medication(stored.id).unwrap().as_ref(), Some(&stored));

        stored.time_of_day = "21:00".parse().unwrap();
        stored.dosage = "20mg".into();
        db.update_medication(&stored).unwrap();
        assert_eq!(db.get_medication(stored.id).unwrap(), Some(stored.clone()));

        assert!(db.delete_medication(stored.id).unwrap());
        assert!(!db.delete_medication(stored.id).unwrap());
        assert!(db.get_medication(stored.id).unwrap().is_none());
    }

    #[test]
    fn update_of_missing_medication_fails() {
        let db = Database::open_memory().unwrap();
        let ghost = med("Ghost", "10:00").with_id(99);
        assert!(matches!(db.update_medication(&ghost), Err(CoreError::UnknownOwner(99))));
        assert!(matches!(db.set_active(99, false), Err(CoreError::UnknownOwner(99))));
    }

    #[test]
    fn active_filter_and_ordering() {
        let db = Database::open_memory().unwrap();
        let late = db.add_medication(&med("Statin", "22:00")).unwrap();
        let early = db.add_medication(&med("Thyroxine", "06:00")).unwrap();
        db.set_active(late.id, false).unwrap();

        let names: Vec<_> = db.list_medications().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Thyroxine", "Statin"]);
        let active = db.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, early.id);
    }

    #[test]
    fn search_matches_substrings_literally() {
        let db = Database::open_memory().unwrap();
        db.add_medication(&med("Vitamin D", "09:00")).unwrap();
        db.add_medication(&med("Vitamin B12", "09:00")).unwrap();
        db.add_medication(&med("Iron 100%", "12:00")).unwrap();

        assert_eq!(db.search_medications("vitamin").unwrap().len(), 2);
        assert_eq!(db.search_medications("%").unwrap().len(), 1);
        assert!(db.search_medications("zinc").unwrap().is_empty());
    }

    #[test]
    fn history_and_counts() {
        let db = Database::open_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        db.add_history("Aspirin", DoseOutcome::Taken, t0).unwrap();
        db.add_history("Aspirin", DoseOutcome::Missed, t0 + chrono::Duration::days(1))
            .unwrap();
        db.add_history("Aspirin", DoseOutcome::Taken, t0 + chrono::Duration::days(2))
            .unwrap();

        let history = db.list_history(Some(2)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].recorded_at, t0 + chrono::Duration::days(2));

        let counts = db.dose_counts().unwrap();
        assert_eq!(counts, DoseCounts { taken: 2, missed: 1 });
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn record_outcome_writes_history_by_name() {
        let db = Database::open_memory().unwrap();
        let stored = db.add_medication(&med("Warfarin", "18:00")).unwrap();
        db.record_dose_outcome(stored.id, DoseOutcome::Taken).unwrap();
        ScheduleStore::delete(&db, stored.id).unwrap();

        let history = db.list_history(None).unwrap();
        assert_eq!(history[0].medication_name, "Warfarin");
        assert!(db.get_by_id(stored.id).unwrap().is_none());
        assert!(matches!(
            db.record_dose_outcome(stored.id, DoseOutcome::Taken),
            Err(CoreError::UnknownOwner(_))
        ));
    }

    #[test]
    fn dedup_records_survive_in_kv() {
        let db = Database::open_memory().unwrap();
        let key = TriggerKey::new(4, TriggerKind::Escalation);
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        assert!(db.last_fired(&key).unwrap().is_none());
        db.record_fired(&key, at).unwrap();
        assert_eq!(db.last_fired(&key).unwrap(), Some(at));
        assert!(db.kv_get("dedup:4:escalation").unwrap().is_some());

        db.kv_set("dedup:4:escalation", "garbage").unwrap();
        assert!(db.last_fired(&key).unwrap().is_none());
    }

    #[test]
    fn corrupt_time_is_reported() {
        let db = Database::open_memory().unwrap();
        let stored = db.add_medication(&med("Aspirin", "08:00")).unwrap();
        db.conn()
            .execute("UPDATE medications SET reminder_time = '8 am' WHERE id = ?1", params![stored.id])
            .unwrap();
        assert!(matches!(
            db.get_medication(stored.id),
            Err(CoreError::Store(StoreError::CorruptRow(_)))
        ));
    }

    #[test]
    fn backup_round_trip_replaces_contents() {
        let source = Database::open_memory().unwrap();
        let kept = source.add_medication(&med("Metformin", "07:00")).unwrap();
        source
            .add_history("Metformin", DoseOutcome::Taken, Utc.with_ymd_and_hms(2026, 5, 1, 7, 0, 0).unwrap())
            .unwrap();
        let backup = source.export_backup().unwrap();

        let target = Database::open_memory().unwrap();
        target.add_medication(&med("Stale", "10:00")).unwrap();
        target.import_backup(&backup).unwrap();

        let meds = target.list_medications().unwrap();
        assert_eq!(meds, vec![kept]);
        assert_eq!(target.list_history(None).unwrap(), backup.history);
    }

    #[test]
    fn newer_backup_versions_are_refused() {
        let db = Database::open_memory().unwrap();
        let mut backup = db.export_backup().unwrap();
        backup.version = Backup::VERSION + 1;
        assert!(db.import_backup(&backup).is_err());
    }
}
