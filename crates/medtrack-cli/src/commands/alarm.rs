//! Pending alarm commands for CLI.
//!
//! The desktop has no OS alarm service, so `run-due` (or `run-due --watch`)
//! stands in for the host waking the engine when a timer's time comes.

use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use medtrack_core::reminder::TimerHandle;
use medtrack_core::{FiredTrigger, TriggerKey};

use super::med::describe;
use crate::host::App;

#[derive(Subcommand)]
pub enum AlarmAction {
    /// List pending alarms
    Pending,
    /// Deliver every alarm whose time has come
    RunDue {
        /// Keep polling every N seconds instead of exiting
        #[arg(long)]
        watch: Option<u64>,
    },
    /// Fire one alarm now, e.g. `3:main`
    Fire {
        /// Trigger key as <medication id>:<kind>
        key: TriggerKey,
    },
    /// Cancel all alarms of a medication
    Cancel {
        id: i64,
    },
    /// Recompute the alarms of a medication
    Reschedule {
        id: i64,
    },
    /// Report whether precise alarms are permitted
    Permission,
}

fn run_due(app: &App) -> Result<usize, Box<dyn std::error::Error>> {
    let fired = app.timers.due(Utc::now())?;
    for trigger in &fired {
        let outcome = app.engine.on_trigger_fired(*trigger);
        println!("{} {}", trigger.key, serde_json::to_string(&outcome)?);
    }
    Ok(fired.len())
}

pub fn run(action: AlarmAction) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::open()?;

    match action {
        AlarmAction::Pending => {
            let pending = app.timers.pending()?;
            println!("{}", serde_json::to_string_pretty(&pending)?);
        }
        AlarmAction::RunDue { watch: None } => {
            let count = run_due(&app)?;
            if count == 0 {
                println!("no alarms due");
            }
        }
        AlarmAction::RunDue {
            watch: Some(interval),
        } => {
            let interval = Duration::from_secs(interval.max(1));
            tracing::info!(interval_secs = interval.as_secs(), "watching for due alarms");
            loop {
                run_due(&app)?;
                std::thread::sleep(interval);
            }
        }
        AlarmAction::Fire { key } => {
            // Nothing pending: the handle is unknown to this process, which
            // the dispatcher treats as a live trigger.
            let trigger = app
                .timers
                .take(&key)?
                .unwrap_or_else(|| FiredTrigger::new(key, TimerHandle(0)));
            let outcome = app.engine.on_trigger_fired(trigger);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        AlarmAction::Cancel { id } => {
            app.engine.cancel(id)?;
            println!("Alarms cancelled for medication {id}");
        }
        AlarmAction::Reschedule { id } => {
            println!("{}", describe(&app.engine.reschedule(id)?));
        }
        AlarmAction::Permission => {
            if app.engine.can_schedule_exact_triggers() {
                println!("precise alarms permitted");
            } else {
                println!("precise alarms not permitted; reminders may be delayed");
            }
        }
    }
    Ok(())
}
