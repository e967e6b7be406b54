use chrono::Local;

use crate::host::App;

pub fn run(json: bool, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::open()?;
    let entries = app.db.list_history(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No dose history yet");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{}  {:<6}  {}",
            entry.recorded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.outcome.as_str(),
            entry.medication_name
        );
    }
    let counts = app.db.dose_counts()?;
    println!("Taken: {}  Missed: {}  Total: {}", counts.taken, counts.missed, counts.total());
    Ok(())
}
