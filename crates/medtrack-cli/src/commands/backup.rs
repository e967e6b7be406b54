use std::path::PathBuf;

use clap::Subcommand;
use medtrack_core::storage::Backup;

use crate::host::App;

#[derive(Subcommand)]
pub enum BackupAction {
    /// Write medications and history as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replace all medications and history from a JSON backup
    Import {
        /// Backup file
        path: PathBuf,
    },
}

pub fn run(action: BackupAction) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::open()?;

    match action {
        BackupAction::Export { output } => {
            let backup = app.db.export_backup()?;
            let json = serde_json::to_string_pretty(&backup)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!(
                        "Exported {} medication(s) to {}",
                        backup.medications.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }
        BackupAction::Import { path } => {
            let content = std::fs::read_to_string(&path)?;
            let backup: Backup = serde_json::from_str(&content)?;

            let previous = app.db.list_medications()?;
            // cancel only once the import has committed
            app.db.import_backup(&backup)?;

            let active = app.db.list_active()?;
            for med in &previous {
                if !active.iter().any(|m| m.id == med.id) {
                    app.engine.cancel(med.id)?;
                }
            }
            // scheduling replaces the triggers of ids that stay active
            for med in &active {
                app.engine.schedule(med)?;
            }
            let scheduled = active.len();
            println!(
                "Imported {} medication(s), {} scheduled",
                backup.medications.len(),
                scheduled
            );
        }
    }
    Ok(())
}
