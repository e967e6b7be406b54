//! Medication management commands for CLI.
//!
//! Every change goes through the engine: alarms are cancelled before a
//! record is destroyed and rebuilt after a record is saved.

use clap::Subcommand;
use medtrack_core::{NewMedication, ScheduleReport, TimeOfDay};

use crate::host::App;

#[derive(Subcommand)]
pub enum MedAction {
    /// Add a medication and schedule its reminder
    Add {
        /// Medication name
        name: String,
        /// Dosage, e.g. "500mg"
        #[arg(long)]
        dosage: String,
        /// Daily reminder time (HH:MM, local time)
        #[arg(long)]
        time: TimeOfDay,
        /// Free-form instructions
        #[arg(long, default_value = "")]
        instructions: String,
        /// Start date as you want it shown
        #[arg(long, default_value = "")]
        start_date: String,
        /// Frequency label (informational)
        #[arg(long, default_value = "Daily")]
        frequency: String,
    },
    /// List medications
    List {
        /// Only active medications
        #[arg(long)]
        active: bool,
    },
    /// Show one medication
    Show {
        /// Medication ID
        id: i64,
    },
    /// Update a medication
    Edit {
        /// Medication ID
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        dosage: Option<String>,
        /// New reminder time (HH:MM)
        #[arg(long)]
        time: Option<TimeOfDay>,
        #[arg(long)]
        instructions: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        frequency: Option<String>,
    },
    /// Delete a medication and its alarms
    Delete {
        /// Medication ID
        id: i64,
    },
    /// Search medications by name
    Search {
        query: String,
    },
    /// Resume reminders for a medication
    Activate {
        id: i64,
    },
    /// Pause reminders for a medication without deleting it
    Deactivate {
        id: i64,
    },
}

/// One-line summary of what a scheduling call registered.
pub fn describe(report: &ScheduleReport) -> String {
    if !report.active {
        return format!("medication {}: inactive, no alarms pending", report.owner_id);
    }
    let mut line = format!("medication {}:", report.owner_id);
    if let Some(main) = &report.main {
        line.push_str(&format!(
            " alarm at {} ({})",
            main.fire_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            main.precision
        ));
    }
    if let Some(pre) = &report.pre_notice {
        line.push_str(&format!(
            ", pre-notice at {}",
            pre.fire_at.with_timezone(&chrono::Local).format("%H:%M")
        ));
    }
    if report.degraded {
        line.push_str(" [best-effort timing]");
    }
    line
}

pub fn run(action: MedAction) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::open()?;

    match action {
        MedAction::Add {
            name,
            dosage,
            time,
            instructions,
            start_date,
            frequency,
        } => {
            let new = NewMedication {
                name,
                dosage,
                instructions,
                time_of_day: time,
                start_date,
                frequency_label: frequency,
            };
            let med = app.db.add_medication(&new)?;
            let report = app.engine.schedule(&med)?;
            println!("Medication added: {}", med.id);
            println!("{}", describe(&report));
        }
        MedAction::List { active } => {
            let meds = if active {
                app.db.list_active()?
            } else {
                app.db.list_medications()?
            };
            println!("{}", serde_json::to_string_pretty(&meds)?);
        }
        MedAction::Show { id } => match app.db.get_medication(id)? {
            Some(med) => println!("{}", serde_json::to_string_pretty(&med)?),
            None => return Err(format!("Medication not found: {id}").into()),
        },
        MedAction::Edit {
            id,
            name,
            dosage,
            time,
            instructions,
            start_date,
            frequency,
        } => {
            let mut med = app
                .db
                .get_medication(id)?
                .ok_or(format!("Medication not found: {id}"))?;

            if let Some(n) = name { med.name = n; }
            if let Some(d) = dosage { med.dosage = d; }
            if let Some(t) = time { med.time_of_day = t; }
            if let Some(i) = instructions { med.instructions = i; }
            if let Some(s) = start_date { med.start_date = s; }
            if let Some(f) = frequency { med.frequency_label = f; }

            app.db.update_medication(&med)?;
            let report = app.engine.schedule(&med)?;
            println!("Medication updated:");
            println!("{}", serde_json::to_string_pretty(&med)?);
            println!("{}", describe(&report));
        }
        MedAction::Delete { id } => {
            app.engine.cancel(id)?;
            if app.db.delete_medication(id)? {
                println!("Medication deleted: {id}");
            } else {
                return Err(format!("Medication not found: {id}").into());
            }
        }
        MedAction::Search { query } => {
            let meds = app.db.search_medications(&query)?;
            println!("{}", serde_json::to_string_pretty(&meds)?);
        }
        MedAction::Activate { id } => {
            app.db.set_active(id, true)?;
            println!("{}", describe(&app.engine.reschedule(id)?));
        }
        MedAction::Deactivate { id } => {
            app.db.set_active(id, false)?;
            println!("{}", describe(&app.engine.reschedule(id)?));
        }
    }
    Ok(())
}
