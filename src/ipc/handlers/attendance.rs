use crate::ipc::helpers::{
    date_str, load_absences, load_planning_cells, load_suspensions, load_templates,
    load_trainee_windows, load_trainees, load_trainers, now_ts, optional_str, required_bool,
    required_date, required_slot, required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    self, AbsenceStatus, ConsistencyResult, Slot, SlotStatus, WorkDay,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn resolve_for_trainer(
    conn: &Connection,
    trainer_id: &str,
    date: chrono::NaiveDate,
    day: WorkDay,
    slot: Slot,
) -> Result<SlotStatus, HandlerErr> {
    let templates = load_templates(conn, "trainer")?;
    let absences = load_absences(conn, "trainer", &[AbsenceStatus::Validated])?;
    let cells = load_planning_cells(conn, date, date)?;
    Ok(schedule::resolve(
        trainer_id, day, slot, date, &templates, &absences, &cells,
    ))
}

/// Record a self-declared presence after checking it against the resolved
/// expectation. A contradiction with a validated absence blocks the save.
fn attendance_declare(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let trainer_id = required_str(params, "trainerId")?;
    let date = required_date(params, "date")?;
    let slot = required_slot(params, "slot")?;
    let present = required_bool(params, "present")?;
    let Some(day) = WorkDay::from_date(date) else {
        return Err(HandlerErr::bad_params("date falls on a weekend"));
    };

    let office: Option<i64> = conn
        .query_row("SELECT office FROM trainers WHERE id = ?", [&trainer_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(office) = office else {
        return Err(HandlerErr::not_found("trainer not found"));
    };

    let status = resolve_for_trainer(conn, &trainer_id, date, day, slot)?;
    let check = schedule::check_presence(present, &status, office != 0);

    let (flag, reason) = match &check {
        ConsistencyResult::Error(reason) => {
            return Err(HandlerErr {
                code: "presence_conflict",
                message: reason.clone(),
                details: Some(json!({ "expectedStatus": status.label() })),
            });
        }
        ConsistencyResult::Warning(reason) => ("warning", Some(reason.clone())),
        ConsistencyResult::Consistent => ("consistent", None),
    };

    conn.execute(
        "INSERT INTO presence_declarations(id, trainer_id, date, slot, present, expected_status, flag, reason, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(trainer_id, date, slot) DO UPDATE SET
           present = excluded.present,
           expected_status = excluded.expected_status,
           flag = excluded.flag,
           reason = excluded.reason",
        (
            Uuid::new_v4().to_string(),
            &trainer_id,
            date_str(date),
            slot.as_str(),
            present as i64,
            status.label(),
            flag,
            &reason,
            now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "presence_declarations"))?;

    Ok(json!({
        "flag": flag,
        "reason": reason,
        "expectedStatus": status.label(),
    }))
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let trainer_id = optional_str(params, "trainerId");
    let date = optional_str(params, "date");
    if let Some(raw) = &date {
        // Reject malformed filters instead of matching nothing.
        crate::schedule::parse_date(raw)
            .map_err(|e| HandlerErr::bad_params(format!("date: {}", e.message)))?;
    }
    let mut stmt = conn
        .prepare(
            "SELECT id, trainer_id, date, slot, present, expected_status, flag, reason
             FROM presence_declarations
             WHERE (?1 IS NULL OR trainer_id = ?1)
               AND (?2 IS NULL OR date = ?2)
             ORDER BY date, slot, trainer_id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&trainer_id, &date), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "trainerId": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "slot": r.get::<_, String>(3)?,
                "present": r.get::<_, i64>(4)? != 0,
                "expectedStatus": r.get::<_, String>(5)?,
                "flag": r.get::<_, String>(6)?,
                "reason": r.get::<_, Option<String>>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "declarations": rows }))
}

/// Weekly attendance sheet as CSV: one line per person per day/slot with
/// the resolved expectation and any declared presence.
fn attendance_sheet_export(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let monday = required_date(params, "monday")?;
    let out_path = required_str(params, "outPath")?;
    let days = schedule::week_working_days(monday)
        .map_err(|e| HandlerErr::bad_params(e.message))?;

    let trainers = load_trainers(conn, false)?;
    let templates = load_templates(conn, "trainer")?;
    let absences = load_absences(conn, "trainer", &[AbsenceStatus::Validated])?;
    let cells = load_planning_cells(conn, days[0], days[4])?;

    let trainees = load_trainees(conn, false)?;
    let trainee_windows = load_trainee_windows(conn)?;
    let trainee_templates = load_templates(conn, "trainee")?;
    let trainee_absences = load_absences(conn, "trainee", &[AbsenceStatus::Validated])?;
    let suspensions = load_suspensions(conn)?;

    let mut declared: std::collections::HashMap<(String, String, &'static str), bool> =
        std::collections::HashMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT trainer_id, date, slot, present FROM presence_declarations
                 WHERE date >= ? AND date <= ?",
            )
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map((date_str(days[0]), date_str(days[4])), |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)? != 0,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        for (trainer_id, date, slot, present) in rows {
            if let Some(slot) = Slot::parse(&slot) {
                declared.insert((trainer_id, date, slot.as_str()), present);
            }
        }
    }

    let mut writer = csv::Writer::from_path(&out_path).map_err(|e| HandlerErr {
        code: "export_failed",
        message: e.to_string(),
        details: Some(json!({ "outPath": out_path })),
    })?;
    writer
        .write_record(["date", "day", "slot", "kind", "name", "expected", "declaredPresent"])
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;

    let mut line_count = 0usize;
    for (&date, &day) in days.iter().zip(WorkDay::ALL.iter()) {
        for slot in Slot::ALL {
            for t in &trainers {
                let status =
                    schedule::resolve(&t.id, day, slot, date, &templates, &absences, &cells);
                if status == SlotStatus::NotScheduled {
                    continue;
                }
                let key = (t.id.clone(), date_str(date), slot.as_str());
                let declared_cell = declared
                    .get(&key)
                    .map(|p| if *p { "yes" } else { "no" })
                    .unwrap_or("");
                let date_field = date_str(date);
                let name = format!("{}, {}", t.last_name, t.first_name);
                writer
                    .write_record([
                        date_field.as_str(),
                        day.as_str(),
                        slot.as_str(),
                        "trainer",
                        name.as_str(),
                        status.label(),
                        declared_cell,
                    ])
                    .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
                line_count += 1;
            }
            for tr in &trainees {
                let Some(window) = trainee_windows.iter().find(|w| w.id == tr.id) else {
                    continue;
                };
                if !schedule::date_in_range(date, window.enrollment_start, window.enrollment_end) {
                    continue;
                }
                let suspended = suspensions.iter().any(|s| {
                    s.trainee_id == tr.id && schedule::date_in_range(date, s.start_date, s.end_date)
                });
                let absent = schedule::classify(&tr.id, date, slot, &trainee_absences).absent;
                let entry = schedule::template_for(&tr.id, day, slot, &trainee_templates);
                let expected = if suspended {
                    "suspended"
                } else if absent {
                    "absent"
                } else if entry.is_some() {
                    "expected"
                } else {
                    continue;
                };
                let date_field = date_str(date);
                let name = format!("{}, {}", tr.last_name, tr.first_name);
                writer
                    .write_record([
                        date_field.as_str(),
                        day.as_str(),
                        slot.as_str(),
                        "trainee",
                        name.as_str(),
                        expected,
                        "",
                    ])
                    .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
                line_count += 1;
            }
        }
    }
    writer
        .flush()
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;

    Ok(json!({ "outPath": out_path, "lines": line_count }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.declare" => Some(with_db(state, req, |c| attendance_declare(c, &req.params))),
        "attendance.list" => Some(with_db(state, req, |c| attendance_list(c, &req.params))),
        "attendance.sheetExport" => Some(with_db(state, req, |c| {
            attendance_sheet_export(c, &req.params)
        })),
        _ => None,
    }
}
