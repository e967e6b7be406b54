//! Database schema migrations for medtrack.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!("failed to read schema_version: {e}");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: medications, dose history and the key-value table.
///
/// `reminder_time` is `HH:MM`. `history.status` is `Taken` or `Missed`.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS medications (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT NOT NULL,
            dosage        TEXT NOT NULL DEFAULT '',
            instructions  TEXT NOT NULL DEFAULT '',
            reminder_time TEXT NOT NULL,
            start_date    TEXT NOT NULL DEFAULT '',
            frequency     TEXT NOT NULL DEFAULT 'Daily',
            is_active     INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS history (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            medication_name TEXT NOT NULL,
            recorded_at     TEXT NOT NULL,
            status          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_medications_active ON medications(is_active);
        CREATE INDEX IF NOT EXISTS idx_history_recorded_at ON history(recorded_at);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: pending timers of the desktop timer host.
///
/// One row per `(owner_id, kind)`; re-registering replaces the row.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS pending_triggers (
            owner_id  INTEGER NOT NULL,
            kind      TEXT NOT NULL,
            fire_at   TEXT NOT NULL,
            precision TEXT NOT NULL,
            handle    INTEGER NOT NULL,
            PRIMARY KEY (owner_id, kind)
        );

        CREATE INDEX IF NOT EXISTS idx_pending_triggers_fire_at ON pending_triggers(fire_at);",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(schema_version(&conn), SCHEMA_VERSION);

        for table in ["medications", "history", "kv", "pending_triggers"] {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(schema_version(&conn), SCHEMA_VERSION);
    }

    /// A v1 database keeps its rows and gains the timer table.
    #[test]
    fn test_incremental_migration() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        conn.execute(
            "INSERT INTO medications (name, reminder_time, created_at)
             VALUES ('Aspirin', '08:00', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        assert_eq!(schema_version(&conn), 1);

        migrate(&conn).unwrap();

        assert_eq!(schema_version(&conn), 2);
        let name: String = conn
            .query_row("SELECT name FROM medications", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "Aspirin");
        conn.prepare("SELECT owner_id, kind, fire_at, precision, handle FROM pending_triggers")
            .unwrap();
    }
}
