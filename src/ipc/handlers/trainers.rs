use crate::ipc::helpers::{
    load_trainers, now_ts, optional_bool, optional_str, required_str, trainer_exists, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn trainers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_archived = optional_bool(params, "includeArchived", false)?;
    let rows = load_trainers(conn, include_archived)?;
    let trainers: Vec<serde_json::Value> = rows
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "lastName": t.last_name,
                "firstName": t.first_name,
                "email": t.email,
                "archived": t.archived,
                "office": t.office,
                "sortOrder": t.sort_order,
            })
        })
        .collect();
    Ok(json!({ "trainers": trainers }))
}

fn trainers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let email = optional_str(params, "email");
    let office = optional_bool(params, "office", false)?;
    let id = Uuid::new_v4().to_string();

    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM trainers",
            [],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    conn.execute(
        "INSERT INTO trainers(id, last_name, first_name, email, archived, office, sort_order, created_at)
         VALUES(?, ?, ?, ?, 0, ?, ?, ?)",
        (
            &id,
            &last_name,
            &first_name,
            &email,
            office as i64,
            sort_order,
            now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "trainers"))?;
    Ok(json!({ "trainerId": id }))
}

fn trainers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let trainer_id = required_str(params, "trainerId")?;
    if !trainer_exists(conn, &trainer_id)? {
        return Err(HandlerErr::not_found("trainer not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE trainers SET last_name = ? WHERE id = ?",
            (v.trim(), &trainer_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainers"))?;
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE trainers SET first_name = ? WHERE id = ?",
            (v.trim(), &trainer_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainers"))?;
    }
    if let Some(v) = patch.get("email") {
        let email = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        conn.execute(
            "UPDATE trainers SET email = ? WHERE id = ?",
            (&email, &trainer_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainers"))?;
    }
    if let Some(v) = patch.get("office").and_then(|v| v.as_bool()) {
        conn.execute(
            "UPDATE trainers SET office = ? WHERE id = ?",
            (v as i64, &trainer_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainers"))?;
    }
    if let Some(v) = patch.get("sortOrder").and_then(|v| v.as_i64()) {
        conn.execute(
            "UPDATE trainers SET sort_order = ? WHERE id = ?",
            (v, &trainer_id),
        )
        .map_err(|e| HandlerErr::update(e, "trainers"))?;
    }

    Ok(json!({ "ok": true }))
}

fn trainers_archive(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let trainer_id = required_str(params, "trainerId")?;
    let archived = optional_bool(params, "archived", true)?;
    if !trainer_exists(conn, &trainer_id)? {
        return Err(HandlerErr::not_found("trainer not found"));
    }
    conn.execute(
        "UPDATE trainers SET archived = ? WHERE id = ?",
        (archived as i64, &trainer_id),
    )
    .map_err(|e| HandlerErr::update(e, "trainers"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "trainers.list" => Some(with_db(state, req, |c| trainers_list(c, &req.params))),
        "trainers.create" => Some(with_db(state, req, |c| trainers_create(c, &req.params))),
        "trainers.update" => Some(with_db(state, req, |c| trainers_update(c, &req.params))),
        "trainers.archive" => Some(with_db(state, req, |c| trainers_archive(c, &req.params))),
        _ => None,
    }
}
