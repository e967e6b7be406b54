//! Desktop host adapters and engine wiring for the CLI.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use medtrack_core::{
    AlertError, AlertRequest, AlertSink, Collaborators, Config, Database, EngineSettings,
    HostError, ReminderEngine, SqliteTimerHost, SystemClock, TriggerKind, WakeLockHost, WakeToken,
};

/// Prints alerts to stdout.
pub struct TerminalAlertSink;

impl AlertSink for TerminalAlertSink {
    fn deliver(&self, request: &AlertRequest) -> Result<(), AlertError> {
        let headline = match request.kind {
            TriggerKind::PreNotice => "Upcoming dose",
            TriggerKind::Main => "Time to take your medication",
            TriggerKind::Escalation => "Reminder: dose not yet taken",
            TriggerKind::Snooze => "Snoozed reminder",
        };
        let bell = if request.sound { "\x07" } else { "" };
        println!(
            "{bell}[{}] {headline}: {} ({})",
            request.owner_id, request.name, request.dosage
        );
        Ok(())
    }

    fn dismiss(&self, owner_id: i64) {
        tracing::debug!(owner_id, "alert dismissed");
    }
}

/// A terminal process has nothing to keep awake; holds are only logged.
#[derive(Default)]
pub struct LoggingWakeLock {
    next: AtomicU64,
}

impl WakeLockHost for LoggingWakeLock {
    fn acquire(&self, tag: &str, max_hold: Duration) -> Result<WakeToken, HostError> {
        let token = WakeToken(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(tag, token = token.0, max_hold_secs = max_hold.as_secs(), "wake hold acquired");
        Ok(token)
    }

    fn release(&self, token: WakeToken) {
        tracing::debug!(token = token.0, "wake hold released");
    }
}

/// Everything a command needs.
pub struct App {
    pub db: Arc<Database>,
    pub timers: Arc<SqliteTimerHost>,
    pub engine: ReminderEngine,
}

impl App {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let db = Arc::new(Database::open()?);
        let timers = Arc::new(SqliteTimerHost::new(db.clone(), &config.host));
        let engine = ReminderEngine::new(
            Collaborators {
                store: db.clone(),
                timers: timers.clone(),
                alerts: Arc::new(TerminalAlertSink),
                wake: Arc::new(LoggingWakeLock::default()),
                dedup: db.clone(),
                clock: Arc::new(SystemClock),
            },
            EngineSettings::from_config(&config),
        );
        Ok(Self { db, timers, engine })
    }
}
