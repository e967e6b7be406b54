use super::med::describe;
use crate::host::App;

/// Rebuild every alarm from the stored medications.
pub fn run(no_settle: bool) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::open()?;
    let report = if no_settle {
        app.engine.recover_now()?
    } else {
        app.engine.on_host_restarted()?
    };

    for scheduled in &report.scheduled {
        println!("{}", describe(scheduled));
    }
    for failure in &report.failed {
        eprintln!("medication {}: {}", failure.owner_id, failure.message);
    }
    println!(
        "Recovered {} medication(s), {} failed, {} with best-effort timing",
        report.scheduled.len(),
        report.failed.len(),
        report.degraded()
    );
    Ok(())
}
