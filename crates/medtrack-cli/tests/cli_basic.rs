//! Basic CLI E2E tests.
//!
//! Each test runs the built `medtrack` binary against its own data
//! directory.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_medtrack"))
        .args(args)
        .env("MEDTRACK_DATA_DIR", data_dir)
        .env("MEDTRACK_LOG", "off")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_ok(data_dir: &Path, args: &[&str]) -> String {
    let (stdout, stderr, code) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    stdout
}

fn add_aspirin(data_dir: &Path) {
    let out = run_ok(
        data_dir,
        &["med", "add", "Aspirin", "--dosage", "81mg", "--time", "23:59"],
    );
    assert!(out.contains("Medication added: 1"), "unexpected output: {out}");
}

fn pending_kinds(data_dir: &Path) -> Vec<String> {
    let out = run_ok(data_dir, &["alarm", "pending"]);
    let pending: serde_json::Value = serde_json::from_str(&out).unwrap();
    pending
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["key"]["kind"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_med_add_schedules_alarm() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());

    let list = run_ok(dir.path(), &["med", "list"]);
    let meds: serde_json::Value = serde_json::from_str(&list).unwrap();
    assert_eq!(meds[0]["name"], "Aspirin");
    assert_eq!(meds[0]["time_of_day"], "23:59");

    assert!(pending_kinds(dir.path()).contains(&"main".to_string()));
}

#[test]
fn test_med_add_rejects_bad_time() {
    let dir = TempDir::new().unwrap();
    let (_, _, code) = run_cli(
        dir.path(),
        &["med", "add", "Aspirin", "--dosage", "81mg", "--time", "25:00"],
    );
    assert_ne!(code, 0);
}

#[test]
fn test_fire_delivers_and_chains_escalation() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());

    let out = run_ok(dir.path(), &["alarm", "fire", "1:main"]);
    assert!(out.contains("Time to take your medication: Aspirin (81mg)"));
    assert!(out.contains("\"outcome\": \"delivered\""));

    assert!(pending_kinds(dir.path()).contains(&"escalation".to_string()));
}

#[test]
fn test_taken_records_history_and_clears_alarms() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());

    let out = run_ok(dir.path(), &["dose", "taken", "1"]);
    assert!(out.contains("Dose recorded as Taken"));
    assert!(pending_kinds(dir.path()).is_empty());

    let history = run_ok(dir.path(), &["history", "--json"]);
    let entries: serde_json::Value = serde_json::from_str(&history).unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["medication_name"], "Aspirin");
    assert_eq!(entries[0]["outcome"], "Taken");

    // acknowledging again is harmless
    let again = run_ok(dir.path(), &["dose", "taken", "1"]);
    assert!(again.contains("already handled"));
}

#[test]
fn test_snooze_validation_and_unknown_medication() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());

    let (_, stderr, code) = run_cli(dir.path(), &["dose", "snooze", "1", "--minutes", "0"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("error:"));

    let out = run_ok(dir.path(), &["dose", "snooze", "1", "--minutes", "10"]);
    assert!(out.contains("Snoozed until"));
    assert!(pending_kinds(dir.path()).contains(&"snooze".to_string()));

    let (_, _, code) = run_cli(dir.path(), &["dose", "dismiss", "42"]);
    assert_ne!(code, 0);
}

#[test]
fn test_delete_and_deactivate_cancel_alarms() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());

    let out = run_ok(dir.path(), &["med", "deactivate", "1"]);
    assert!(out.contains("inactive"));
    assert!(pending_kinds(dir.path()).is_empty());

    run_ok(dir.path(), &["med", "activate", "1"]);
    assert!(!pending_kinds(dir.path()).is_empty());

    run_ok(dir.path(), &["med", "delete", "1"]);
    assert!(pending_kinds(dir.path()).is_empty());
    let (_, _, code) = run_cli(dir.path(), &["med", "show", "1"]);
    assert_ne!(code, 0);
}

#[test]
fn test_recover_reschedules_active_medications() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());
    run_ok(dir.path(), &["alarm", "cancel", "1"]);
    assert!(pending_kinds(dir.path()).is_empty());

    let out = run_ok(dir.path(), &["recover", "--no-settle"]);
    assert!(out.contains("Recovered 1 medication(s), 0 failed"));
    assert!(pending_kinds(dir.path()).contains(&"main".to_string()));
}

#[test]
fn test_config_get_set() {
    let dir = TempDir::new().unwrap();
    assert_eq!(run_ok(dir.path(), &["config", "get", "reminders.default_snooze_mins"]).trim(), "5");

    run_ok(dir.path(), &["config", "set", "reminders.default_snooze_mins", "15"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "reminders.default_snooze_mins"]).trim(), "15");

    let (_, _, code) = run_cli(dir.path(), &["config", "get", "nope.nothing"]);
    assert_ne!(code, 0);
    let (_, _, code) = run_cli(dir.path(), &["config", "set", "alerts.silent_mode", "maybe"]);
    assert_ne!(code, 0);

    // a dedup window that swallows the next escalation is refused and not saved
    let (_, stderr, code) = run_cli(dir.path(), &["config", "set", "reminders.dedup_window_secs", "600"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("dedup_window_secs"));
    assert_eq!(run_ok(dir.path(), &["config", "get", "reminders.dedup_window_secs"]).trim(), "30");
}

#[test]
fn test_backup_roundtrip_reschedules() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());
    let file = dir.path().join("backup.json");
    run_ok(dir.path(), &["backup", "export", "--output", file.to_str().unwrap()]);

    let other = TempDir::new().unwrap();
    let out = run_ok(other.path(), &["backup", "import", file.to_str().unwrap()]);
    assert!(out.contains("Imported 1 medication(s), 1 scheduled"));
    assert!(pending_kinds(other.path()).contains(&"main".to_string()));
}

#[test]
fn test_rejected_backup_keeps_current_alarms() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());
    let before = pending_kinds(dir.path());
    assert!(before.contains(&"main".to_string()));

    let out = run_ok(dir.path(), &["backup", "export"]);
    let mut backup: serde_json::Value = serde_json::from_str(&out).unwrap();
    let med = backup["medications"][0].clone();
    backup["medications"].as_array_mut().unwrap().push(med);
    let file = dir.path().join("duplicate.json");
    std::fs::write(&file, backup.to_string()).unwrap();

    let (_, _, code) = run_cli(dir.path(), &["backup", "import", file.to_str().unwrap()]);
    assert_ne!(code, 0);

    assert_eq!(pending_kinds(dir.path()), before);
    let list = run_ok(dir.path(), &["med", "list", "--active"]);
    let meds: serde_json::Value = serde_json::from_str(&list).unwrap();
    assert_eq!(meds.as_array().unwrap().len(), 1);
}

#[test]
fn test_dismiss_stops_repeats_without_recording() {
    let dir = TempDir::new().unwrap();
    add_aspirin(dir.path());
    run_ok(dir.path(), &["alarm", "fire", "1:main"]);
    assert!(pending_kinds(dir.path()).contains(&"escalation".to_string()));

    let out = run_ok(dir.path(), &["dose", "dismiss", "1"]);
    assert!(out.contains("Alert dismissed"));
    assert!(!pending_kinds(dir.path()).contains(&"escalation".to_string()));

    let history = run_ok(dir.path(), &["history", "--json"]);
    let entries: serde_json::Value = serde_json::from_str(&history).unwrap();
    assert!(entries.as_array().unwrap().is_empty());

    let help = run_ok(dir.path(), &["dose", "--help"]);
    assert!(help.contains("stop its repeats"));
}
