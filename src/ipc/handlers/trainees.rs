use crate::ipc::helpers::{
    date_str, load_trainees, now_ts, optional_bool, optional_str, required_date, required_str,
    trainee_exists, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn trainees_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_archived = optional_bool(params, "includeArchived", false)?;
    let rows = load_trainees(conn, include_archived)?;
    let trainees: Vec<serde_json::Value> = rows
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "lastName": t.last_name,
                "firstName": t.first_name,
                "enrollmentStart": t.enrollment_start,
                "enrollmentEnd": t.enrollment_end,
                "archived": t.archived,
                "endNotified": t.end_notified,
            })
        })
        .collect();
    Ok(json!({ "trainees": trainees }))
}

fn trainees_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let start = required_date(params, "enrollmentStart")?;
    let end = required_date(params, "enrollmentEnd")?;
    if end < start {
        return Err(HandlerErr::bad_params("enrollmentEnd before enrollmentStart"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO trainees(id, last_name, first_name, enrollment_start, enrollment_end, archived, end_notified, created_at)
         VALUES(?, ?, ?, ?, ?, 0, 0, ?)",
        (
            &id,
            &last_name,
            &first_name,
            date_str(start),
            date_str(end),
            now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "trainees"))?;
    Ok(json!({ "traineeId": id }))
}

fn trainees_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let trainee_id = required_str(params, "traineeId")?;
    if !trainee_exists(conn, &trainee_id)? {
        return Err(HandlerErr::not_found("trainee not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE trainees SET last_name = ? WHERE id = ?",
            (v.trim(), &trainee_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainees"))?;
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE trainees SET first_name = ? WHERE id = ?",
            (v.trim(), &trainee_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainees"))?;
    }
    if let Some(v) = patch.get("enrollmentStart") {
        let d = parse_patch_date(v, "enrollmentStart")?;
        conn.execute(
            "UPDATE trainees SET enrollment_start = ? WHERE id = ?",
            (date_str(d), &trainee_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainees"))?;
    }
    if let Some(v) = patch.get("enrollmentEnd") {
        // A moved end date re-arms the end-of-enrollment notice.
        let d = parse_patch_date(v, "enrollmentEnd")?;
        conn.execute(
            "UPDATE trainees SET enrollment_end = ?, end_notified = 0 WHERE id = ?",
            (date_str(d), &trainee_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainees"))?;
    }

    Ok(json!({ "ok": true }))
}

fn parse_patch_date(v: &serde_json::Value, key: &str) -> Result<chrono::NaiveDate, HandlerErr> {
    let raw = v
        .as_str()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a date string", key)))?;
    crate::schedule::parse_date(raw).map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e.message)))
}

fn trainees_archive(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let trainee_id = required_str(params, "traineeId")?;
    let archived = optional_bool(params, "archived", true)?;
    if !trainee_exists(conn, &trainee_id)? {
        return Err(HandlerErr::not_found("trainee not found"));
    }
    conn.execute(
        "UPDATE trainees SET archived = ? WHERE id = ?",
        (archived as i64, &trainee_id),
    )
    .map_err(|e| HandlerErr::update(e, "trainees"))?;
    Ok(json!({ "ok": true }))
}

fn suspensions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let trainee_id = optional_str(params, "traineeId");
    let mut stmt = conn
        .prepare(
            "SELECT id, trainee_id, start_date, end_date, reason
             FROM suspensions
             WHERE (?1 IS NULL OR trainee_id = ?1)
             ORDER BY start_date",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&trainee_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "traineeId": r.get::<_, String>(1)?,
                "startDate": r.get::<_, String>(2)?,
                "endDate": r.get::<_, String>(3)?,
                "reason": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "suspensions": rows }))
}

fn suspensions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let trainee_id = required_str(params, "traineeId")?;
    if !trainee_exists(conn, &trainee_id)? {
        return Err(HandlerErr::not_found("trainee not found"));
    }
    let start = required_date(params, "startDate")?;
    let end = required_date(params, "endDate")?;
    if end < start {
        return Err(HandlerErr::bad_params("endDate before startDate"));
    }
    let reason = optional_str(params, "reason");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO suspensions(id, trainee_id, start_date, end_date, reason)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &trainee_id, date_str(start), date_str(end), &reason),
    )
    .map_err(|e| HandlerErr::update(e, "suspensions"))?;
    Ok(json!({ "suspensionId": id }))
}

fn suspensions_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let suspension_id = required_str(params, "suspensionId")?;
    let n = conn
        .execute("DELETE FROM suspensions WHERE id = ?", [&suspension_id])
        .map_err(|e| HandlerErr::update(e, "suspensions"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("suspension not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "trainees.list" => Some(with_db(state, req, |c| trainees_list(c, &req.params))),
        "trainees.create" => Some(with_db(state, req, |c| trainees_create(c, &req.params))),
        "trainees.update" => Some(with_db(state, req, |c| trainees_update(c, &req.params))),
        "trainees.archive" => Some(with_db(state, req, |c| trainees_archive(c, &req.params))),
        "suspensions.list" => Some(with_db(state, req, |c| suspensions_list(c, &req.params))),
        "suspensions.create" => Some(with_db(state, req, |c| suspensions_create(c, &req.params))),
        "suspensions.delete" => Some(with_db(state, req, |c| suspensions_delete(c, &req.params))),
        _ => None,
    }
}
