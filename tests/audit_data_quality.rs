mod test_support;

use rusqlite::Connection;
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn str_field(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {}", key))
        .to_string()
}

// Duplicate templates and orphan absences cannot be produced through the
// IPC surface; seed them straight into the workspace db the way legacy
// data did.
#[test]
fn audit_reports_duplicates_and_orphans_and_cleanup_removes_orphans() {
    let workspace = temp_dir("planif-audit");
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
        json!({ "lastName": "Doubled", "firstName": "T" }),
    );
    let trainer_id = str_field(&r, "trainerId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "locations.create",
        json!({ "name": "Workshop", "initial": "W" }),
    );
    let workshop = str_field(&r, "locationId");
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "locations.create",
        json!({ "name": "Lab", "initial": "L" }),
    );
    let lab = str_field(&r, "locationId");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "templates.set",
        json!({
            "ownerKind": "trainer",
            "ownerId": trainer_id,
            "day": "Monday",
            "slot": "morning",
            "status": "available",
            "locationId": workshop,
            "validated": true
        }),
    );

    drop(stdin);
    let _ = child.wait();

    {
        let conn = Connection::open(workspace.join("planif.sqlite3")).expect("open workspace db");
        // A second validated row for the same (owner, day, slot), created
        // earlier than the clean one.
        conn.execute(
            "INSERT INTO weekly_templates(id, owner_kind, owner_id, day, slot, status, location_id, validated, created_at)
             VALUES('dup-template', 'trainer', ?, 'Monday', 'morning', 'available', ?, 1, 1)",
            (&trainer_id, &lab),
        )
        .expect("insert duplicate template");
        // An absence pointing at a trainer that no longer exists.
        conn.execute(
            "INSERT INTO absences(id, owner_kind, owner_id, kind, status, start_date, end_date, slot, created_at)
             VALUES('orphan-absence', 'trainer', 'gone-trainer', 'absence', 'validated', '2025-09-01', '2025-09-05', NULL, 1)",
            [],
        )
        .expect("insert orphan absence");
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let report = request_ok(&mut stdin, &mut reader, "7", "audit.run", json!({}));
    let duplicates = report
        .get("duplicateTemplates")
        .and_then(|v| v.as_array())
        .expect("duplicateTemplates");
    assert_eq!(duplicates.len(), 1);
    assert_eq!(
        duplicates[0].get("ownerId").and_then(|v| v.as_str()),
        Some(trainer_id.as_str())
    );
    // First by creation order: the seeded legacy row precedes the clean one.
    assert_eq!(
        duplicates[0]
            .get("templateIds")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str()),
        Some("dup-template")
    );
    let orphans = report
        .get("orphanAbsences")
        .and_then(|v| v.as_array())
        .expect("orphanAbsences");
    assert_eq!(orphans.len(), 1);
    assert_eq!(
        orphans[0].get("absenceId").and_then(|v| v.as_str()),
        Some("orphan-absence")
    );

    // Resolution keeps working over the duplicate and picks the
    // earliest-created row's location.
    let week = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.weekView",
        json!({ "monday": "2025-09-01" }),
    );
    let monday = week
        .get("rows")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("days"))
        .and_then(|v| v.as_array())
        .and_then(|days| days.first())
        .expect("monday entry");
    let morning = monday
        .get("slots")
        .and_then(|s| s.get("morning"))
        .expect("morning slot");
    assert_eq!(
        morning.get("status").and_then(|v| v.as_str()),
        Some("availableUnchosen")
    );
    assert_eq!(
        morning.get("locationId").and_then(|v| v.as_str()),
        Some(lab.as_str())
    );

    let r = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "absences.cleanupOrphans",
        json!({}),
    );
    assert_eq!(r.get("removed").and_then(|v| v.as_u64()), Some(1));
    let report = request_ok(&mut stdin, &mut reader, "10", "audit.run", json!({}));
    assert_eq!(
        report
            .get("orphanAbsences")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
