mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn str_field(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {}", key))
        .to_string()
}

#[test]
fn presence_declarations_follow_consistency_rules() {
    let workspace = temp_dir("planif-attendance");
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
        json!({ "lastName": "Blocked", "firstName": "T" }),
    );
    let blocked = str_field(&r, "trainerId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "trainers.create",
        json!({ "lastName": "Adhoc", "firstName": "T" }),
    );
    let adhoc = str_field(&r, "trainerId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "trainers.create",
        json!({ "lastName": "Office", "firstName": "T", "office": true }),
    );
    let office = str_field(&r, "trainerId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "trainers.create",
        json!({ "lastName": "Placed", "firstName": "T" }),
    );
    let placed = str_field(&r, "trainerId");

    // Blocked is validated-absent on the target Monday.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "absences.create",
        json!({
            "ownerId": blocked,
            "kind": "absence",
            "date": "2025-09-01"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "absences.validate",
        json!({ "absenceId": str_field(&r, "absenceId") }),
    );

    // Placed has a coordinator cell that morning.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "locations.create",
        json!({ "name": "Annex", "initial": "X" }),
    );
    let annex = str_field(&r, "locationId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "planning.setCell",
        json!({
            "date": "2025-09-01",
            "slot": "morning",
            "locationId": annex,
            "trainerIds": [placed]
        }),
    );

    // Declaring present over a validated absence is a hard error and
    // nothing is saved.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.declare",
        json!({
            "trainerId": blocked,
            "date": "2025-09-01",
            "slot": "morning",
            "present": true
        }),
    );
    assert_eq!(code, "presence_conflict");
    let list = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.list",
        json!({ "trainerId": blocked }),
    );
    assert_eq!(
        list.get("declarations").and_then(|v| v.as_array()).map(|v| v.len()),
        Some(0)
    );

    // Declaring not-present is never blocked.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.declare",
        json!({
            "trainerId": blocked,
            "date": "2025-09-01",
            "slot": "morning",
            "present": false
        }),
    );
    assert_eq!(r.get("flag").and_then(|v| v.as_str()), Some("consistent"));

    // Unscheduled presence is allowed but flagged.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "attendance.declare",
        json!({
            "trainerId": adhoc,
            "date": "2025-09-01",
            "slot": "morning",
            "present": true
        }),
    );
    assert_eq!(r.get("flag").and_then(|v| v.as_str()), Some("warning"));
    assert_eq!(
        r.get("expectedStatus").and_then(|v| v.as_str()),
        Some("notScheduled")
    );

    // The office flag turns the unscheduled warning into consistency.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "attendance.declare",
        json!({
            "trainerId": office,
            "date": "2025-09-01",
            "slot": "morning",
            "present": true
        }),
    );
    assert_eq!(r.get("flag").and_then(|v| v.as_str()), Some("consistent"));

    // Presence matching a coordinator assignment is consistent.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "attendance.declare",
        json!({
            "trainerId": placed,
            "date": "2025-09-01",
            "slot": "morning",
            "present": true
        }),
    );
    assert_eq!(r.get("flag").and_then(|v| v.as_str()), Some("consistent"));
    assert_eq!(
        r.get("expectedStatus").and_then(|v| v.as_str()),
        Some("assignedByCoordinator")
    );

    // Unknown trainer and malformed date are rejected outright.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "16",
        "attendance.declare",
        json!({
            "trainerId": "nobody",
            "date": "2025-09-01",
            "slot": "morning",
            "present": true
        }),
    );
    assert_eq!(code, "not_found");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "17",
        "attendance.declare",
        json!({
            "trainerId": placed,
            "date": "01/09/2025",
            "slot": "morning",
            "present": true
        }),
    );
    assert_eq!(code, "bad_params");

    // The weekly sheet lists the declared and expected states.
    let csv_out = workspace.join("sheet.csv");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "attendance.sheetExport",
        json!({ "monday": "2025-09-01", "outPath": csv_out.to_string_lossy() }),
    );
    assert!(r.get("lines").and_then(|v| v.as_u64()).unwrap_or(0) >= 2);
    let sheet = std::fs::read_to_string(&csv_out).expect("read sheet");
    assert!(sheet.starts_with("date,day,slot,kind,name,expected,declaredPresent"));
    assert!(sheet.contains("absent"));
    assert!(sheet.contains("assignedByCoordinator"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
