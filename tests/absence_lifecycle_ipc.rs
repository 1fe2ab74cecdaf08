mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn str_field(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {}", key))
        .to_string()
}

fn monday_morning_status(week: &serde_json::Value) -> String {
    week.get("rows")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("days"))
        .and_then(|v| v.as_array())
        .and_then(|days| days.first())
        .and_then(|d| d.get("slots"))
        .and_then(|s| s.get("morning"))
        .and_then(|s| s.get("status"))
        .and_then(|v| v.as_str())
        .expect("monday morning status")
        .to_string()
}

#[test]
fn absence_lifecycle_drives_resolution() {
    let workspace = temp_dir("planif-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "trainers.create",
        json!({ "lastName": "Cycle", "firstName": "T" }),
    );
    let trainer_id = str_field(&r, "trainerId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "templates.set",
        json!({
            "ownerKind": "trainer",
            "ownerId": trainer_id,
            "day": "Monday",
            "slot": "morning",
            "status": "available",
            "validated": true
        }),
    );
    let template_id = str_field(&r, "templateId");

    let week = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.weekView",
        json!({ "monday": "2025-09-01" }),
    );
    assert_eq!(monday_morning_status(&week), "availableUnchosen");

    // A pending absence has no effect on resolution.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "absences.create",
        json!({
            "ownerId": trainer_id,
            "kind": "absence",
            "date": "2025-09-01"
        }),
    );
    let absence_id = str_field(&r, "absenceId");
    let week = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.weekView",
        json!({ "monday": "2025-09-01" }),
    );
    assert_eq!(monday_morning_status(&week), "availableUnchosen");

    // Validation makes it authoritative; cancellation withdraws it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "absences.validate",
        json!({ "absenceId": absence_id }),
    );
    let week = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.weekView",
        json!({ "monday": "2025-09-01" }),
    );
    assert_eq!(monday_morning_status(&week), "absent");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "absences.cancel",
        json!({ "absenceId": absence_id }),
    );
    let week = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "schedule.weekView",
        json!({ "monday": "2025-09-01" }),
    );
    assert_eq!(monday_morning_status(&week), "availableUnchosen");

    // Re-setting the same (owner, day, slot) updates in place rather than
    // creating a duplicate row.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "templates.set",
        json!({
            "ownerKind": "trainer",
            "ownerId": trainer_id,
            "day": "Monday",
            "slot": "morning",
            "status": "available",
            "validated": true
        }),
    );
    assert_eq!(str_field(&r, "templateId"), template_id);
    let list = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "templates.list",
        json!({ "ownerKind": "trainer", "ownerId": trainer_id }),
    );
    assert_eq!(
        list.get("templates").and_then(|v| v.as_array()).map(|v| v.len()),
        Some(1)
    );

    // Un-validating the template removes the standing availability.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "templates.validate",
        json!({ "templateId": template_id, "validated": false }),
    );
    let week = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "schedule.weekView",
        json!({ "monday": "2025-09-01" }),
    );
    assert_eq!(monday_morning_status(&week), "notScheduled");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
