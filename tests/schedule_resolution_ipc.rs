mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn slot_status<'a>(
    week_view: &'a serde_json::Value,
    trainer_id: &str,
    date: &str,
    slot: &str,
) -> &'a str {
    let row = week_view
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .find(|r| r.get("trainerId").and_then(|v| v.as_str()) == Some(trainer_id))
        .expect("trainer row");
    let day = row
        .get("days")
        .and_then(|v| v.as_array())
        .expect("days")
        .iter()
        .find(|d| d.get("date").and_then(|v| v.as_str()) == Some(date))
        .expect("day entry");
    day.get("slots")
        .and_then(|s| s.get(slot))
        .and_then(|s| s.get("status"))
        .and_then(|v| v.as_str())
        .expect("slot status")
}

fn str_field(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {}", key))
        .to_string()
}

fn candidate_ids(result: &serde_json::Value) -> Vec<String> {
    result
        .get("candidates")
        .and_then(|v| v.as_array())
        .expect("candidates")
        .iter()
        .filter_map(|c| c.get("trainerId").and_then(|v| v.as_str()))
        .map(str::to_string)
        .collect()
}

#[test]
fn priority_chain_across_week_view_and_dashboard() {
    let workspace = temp_dir("planif-resolution");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let location = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "locations.create",
        json!({ "name": "Main hall", "initial": "M" }),
    );
    let location_id = str_field(&location, "locationId");

    let r = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "trainers.create",
        json!({ "lastName": "Exception", "firstName": "T" }),
    );
    let exception_trainer = str_field(&r, "trainerId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "trainers.create",
        json!({ "lastName": "Absent", "firstName": "T" }),
    );
    let absent_trainer = str_field(&r, "trainerId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "trainers.create",
        json!({ "lastName": "Assigned", "firstName": "T" }),
    );
    let assigned_trainer = str_field(&r, "trainerId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "trainers.create",
        json!({ "lastName": "Bare", "firstName": "T" }),
    );
    let bare_trainer = str_field(&r, "trainerId");

    // Exception trainer: validated Tuesday-morning template AND a validated
    // exceptional availability on that Tuesday. The exception must win.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "templates.set",
        json!({
            "ownerKind": "trainer",
            "ownerId": exception_trainer,
            "day": "Tuesday",
            "slot": "morning",
            "status": "available",
            "validated": true
        }),
    );
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "absences.create",
        json!({
            "ownerId": exception_trainer,
            "kind": "exceptional-availability",
            "date": "2025-09-02"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "absences.validate",
        json!({ "absenceId": str_field(&r, "absenceId") }),
    );

    // Absent trainer: validated absence range plus a coordinator cell
    // inside it. The absence must suppress the assignment.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "absences.create",
        json!({
            "ownerId": absent_trainer,
            "kind": "absence",
            "startDate": "2025-08-30",
            "endDate": "2025-09-10"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "absences.validate",
        json!({ "absenceId": str_field(&r, "absenceId") }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "planning.setCell",
        json!({
            "date": "2025-09-03",
            "slot": "morning",
            "locationId": location_id,
            "trainerIds": [absent_trainer, assigned_trainer]
        }),
    );

    // Assigned trainer also has a Monday template; the Wednesday cell is a
    // plain coordinator assignment for them.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "templates.set",
        json!({
            "ownerKind": "trainer",
            "ownerId": assigned_trainer,
            "day": "Monday",
            "slot": "morning",
            "status": "available",
            "locationId": location_id,
            "validated": true
        }),
    );

    // Bare trainer: no template at all, exception on the Tuesday.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "absences.create",
        json!({
            "ownerId": bare_trainer,
            "kind": "exceptional-availability",
            "date": "2025-09-02"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "absences.validate",
        json!({ "absenceId": str_field(&r, "absenceId") }),
    );

    let week = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "schedule.weekView",
        json!({ "monday": "2025-09-01" }),
    );

    assert_eq!(
        slot_status(&week, &exception_trainer, "2025-09-02", "morning"),
        "exceptionalAvailability"
    );
    assert_eq!(
        slot_status(&week, &absent_trainer, "2025-09-03", "morning"),
        "absent"
    );
    assert_eq!(
        slot_status(&week, &assigned_trainer, "2025-09-03", "morning"),
        "assignedByCoordinator"
    );
    assert_eq!(
        slot_status(&week, &assigned_trainer, "2025-09-01", "morning"),
        "availableUnchosen"
    );
    assert_eq!(
        slot_status(&week, &assigned_trainer, "2025-09-01", "afternoon"),
        "notScheduled"
    );

    // Dashboard: the template-less trainer surfaces through the
    // exceptional filter.
    let candidates = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "schedule.dayCandidates",
        json!({ "date": "2025-09-02", "filter": "exceptional" }),
    );
    let listed = candidate_ids(&candidates);
    assert!(listed.contains(&bare_trainer));
    assert!(listed.contains(&exception_trainer));
    assert!(!listed.contains(&absent_trainer));

    // The absent trainer never shows up as assignable that Wednesday.
    let candidates = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "schedule.dayCandidates",
        json!({ "date": "2025-09-03", "filter": "all" }),
    );
    let listed = candidate_ids(&candidates);
    assert!(!listed.contains(&absent_trainer));
    assert!(listed.contains(&assigned_trainer));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
