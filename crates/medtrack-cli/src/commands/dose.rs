use std::time::Duration;

use clap::Subcommand;
use medtrack_core::{ActionOutcome, UserAction};

use crate::host::App;

#[derive(Subcommand)]
pub enum DoseAction {
    /// Mark the dose as taken
    Taken {
        /// Medication ID
        id: i64,
    },
    /// Remind again later
    Snooze {
        /// Medication ID
        id: i64,
        /// Minutes until the next reminder (default from config)
        #[arg(long)]
        minutes: Option<u64>,
    },
    /// Silence the current alert and stop its repeats; the dose is not recorded
    Dismiss {
        /// Medication ID
        id: i64,
    },
    /// Record the dose as missed
    Missed {
        /// Medication ID
        id: i64,
    },
}

pub fn run(action: DoseAction) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::open()?;

    let (id, outcome) = match action {
        DoseAction::Taken { id } => (id, app.engine.handle_action(id, UserAction::Acknowledge)?),
        DoseAction::Snooze { id, minutes: None } => (id, app.engine.snooze_default(id)?),
        DoseAction::Snooze {
            id,
            minutes: Some(minutes),
        } => {
            let duration = Duration::from_secs(minutes.saturating_mul(60));
            (id, app.engine.handle_action(id, UserAction::Snooze(duration))?)
        }
        DoseAction::Dismiss { id } => (id, app.engine.handle_action(id, UserAction::Dismiss)?),
        DoseAction::Missed { id } => (id, app.engine.handle_action(id, UserAction::Missed)?),
    };

    match outcome {
        ActionOutcome::Recorded { outcome } => {
            println!("Dose recorded as {outcome}; medication {id} removed")
        }
        ActionOutcome::Snoozed { registration } => println!(
            "Snoozed until {}",
            registration.fire_at.with_timezone(&chrono::Local).format("%H:%M")
        ),
        ActionOutcome::Dismissed => println!("Alert dismissed"),
        ActionOutcome::AlreadyHandled => println!("Nothing to do: medication {id} already handled"),
    }
    Ok(())
}
