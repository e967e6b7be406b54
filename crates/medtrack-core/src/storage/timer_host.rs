//! Timer host backed by the `pending_triggers` table.
//!
//! On the desktop nothing wakes the process at a trigger's time, so pending
//! timers are stored and a front end polls [`SqliteTimerHost::due`] to
//! collect the ones whose time has come.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::debug;

use super::config::HostConfig;
use super::database::Database;
use crate::error::{HostError, Result};
use crate::host::TimerHost;
use crate::reminder::{FiredTrigger, PrecisionMode, TimerHandle, TriggerKey, TriggerRegistration};

const NEXT_HANDLE_KEY: &str = "timer_host:next_handle";

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn storage(err: impl std::fmt::Display) -> HostError {
    HostError::Storage(err.to_string())
}

pub struct SqliteTimerHost {
    db: Arc<Database>,
    precise_permitted: bool,
    unavailable_modes: HashSet<PrecisionMode>,
}

impl SqliteTimerHost {
    pub fn new(db: Arc<Database>, config: &HostConfig) -> Self {
        Self {
            db,
            precise_permitted: config.precise_permitted,
            unavailable_modes: config.unavailable_modes.iter().copied().collect(),
        }
    }

    /// Every stored timer, earliest first.
    pub fn pending(&self) -> Result<Vec<TriggerRegistration>> {
        self.select("1 = 1", None)
    }

    /// Remove and return the timers due at `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<FiredTrigger>> {
        let due = self.select("fire_at <= ?1", Some(stamp(now).as_str()))?;
        let conn = self.db.conn();
        for registration in &due {
            conn.execute(
                "DELETE FROM pending_triggers WHERE owner_id = ?1 AND kind = ?2 AND handle = ?3",
                params![
                    registration.key.owner_id,
                    registration.key.kind.as_str(),
                    registration.handle.0 as i64
                ],
            )?;
        }
        Ok(due
            .into_iter()
            .map(|r| FiredTrigger::new(r.key, r.handle))
            .collect())
    }

    /// Remove one timer so it can be fired ahead of time.
    pub fn take(&self, key: &TriggerKey) -> Result<Option<FiredTrigger>> {
        let conn = self.db.conn();
        let handle = conn
            .query_row(
                "SELECT handle FROM pending_triggers WHERE owner_id = ?1 AND kind = ?2",
                params![key.owner_id, key.kind.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        conn.execute(
            "DELETE FROM pending_triggers WHERE owner_id = ?1 AND kind = ?2",
            params![key.owner_id, key.kind.as_str()],
        )?;
        Ok(handle.map(|h| FiredTrigger::new(*key, TimerHandle(h as u64))))
    }

    fn select(&self, filter: &str, arg: Option<&str>) -> Result<Vec<TriggerRegistration>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT owner_id, kind, fire_at, precision, handle FROM pending_triggers
             WHERE {filter} ORDER BY fire_at, owner_id, kind"
        ))?;
        let rows = stmt.query_map(params_from_iter(arg), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (owner_id, kind, fire_at, precision, handle) = row?;
            out.push(TriggerRegistration {
                key: TriggerKey::new(owner_id, kind.parse()?),
                fire_at: DateTime::parse_from_rfc3339(&fire_at)
                    .map_err(|e| crate::error::StoreError::CorruptRow(e.to_string()))?
                    .with_timezone(&Utc),
                handle: TimerHandle(handle as u64),
                precision: precision.parse()?,
            });
        }
        Ok(out)
    }

    fn next_handle(&self) -> Result<TimerHandle, HostError> {
        let current = self
            .db
            .kv_get(NEXT_HANDLE_KEY)
            .map_err(storage)?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1);
        self.db
            .kv_set(NEXT_HANDLE_KEY, &(current + 1).to_string())
            .map_err(storage)?;
        Ok(TimerHandle(current))
    }
}

impl TimerHost for SqliteTimerHost {
    fn register_one_shot(
        &self,
        key: TriggerKey,
        fire_at: DateTime<Utc>,
        mode: PrecisionMode,
    ) -> Result<TimerHandle, HostError> {
        if self.unavailable_modes.contains(&mode) || (mode.is_precise() && !self.precise_permitted) {
            return Err(HostError::ModeUnavailable(mode));
        }
        let handle = self.next_handle()?;
        self.db
            .conn()
            .execute(
                "INSERT OR REPLACE INTO pending_triggers (owner_id, kind, fire_at, precision, handle)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key.owner_id,
                    key.kind.as_str(),
                    stamp(fire_at),
                    mode.as_str(),
                    handle.0 as i64
                ],
            )
            .map_err(storage)?;
        debug!(key = %key, handle = %handle, fire_at = %fire_at, mode = %mode, "timer stored");
        Ok(handle)
    }

    fn cancel(&self, key: &TriggerKey) -> Result<(), HostError> {
        self.db
            .conn()
            .execute(
                "DELETE FROM pending_triggers WHERE owner_id = ?1 AND kind = ?2",
                params![key.owner_id, key.kind.as_str()],
            )
            .map_err(storage)?;
        Ok(())
    }

    fn is_precise_scheduling_permitted(&self) -> bool {
        self.precise_permitted
    }
}
