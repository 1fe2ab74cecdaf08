use crate::ipc::helpers::{
    location_exists, optional_bool, optional_str, required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn locations_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_archived = optional_bool(params, "includeArchived", false)?;
    let sql = if include_archived {
        "SELECT id, name, initial, color, archived FROM locations ORDER BY name"
    } else {
        "SELECT id, name, initial, color, archived FROM locations WHERE archived = 0 ORDER BY name"
    };
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "initial": r.get::<_, String>(2)?,
                "color": r.get::<_, Option<String>>(3)?,
                "archived": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "locations": rows }))
}

fn locations_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let initial = optional_str(params, "initial")
        .or_else(|| name.chars().next().map(|c| c.to_uppercase().to_string()))
        .ok_or_else(|| HandlerErr::bad_params("missing initial"))?;
    let color = optional_str(params, "color");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO locations(id, name, initial, color, archived) VALUES(?, ?, ?, ?, 0)",
        (&id, &name, &initial, &color),
    )
    .map_err(|e| HandlerErr::update(e, "locations"))?;
    Ok(json!({ "locationId": id }))
}

fn locations_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let location_id = required_str(params, "locationId")?;
    if !location_exists(conn, &location_id)? {
        return Err(HandlerErr::not_found("location not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE locations SET name = ? WHERE id = ?",
            (v.trim(), &location_id),
        )
        .map_err(|e| HandlerErr::update(e, "locations"))?;
    }
    if let Some(v) = patch.get("initial").and_then(|v| v.as_str()) {
        conn.execute(
            "UPDATE locations SET initial = ? WHERE id = ?",
            (v.trim(), &location_id),
        )
        .map_err(|e| HandlerErr::update(e, "locations"))?;
    }
    if let Some(v) = patch.get("color") {
        let color = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        conn.execute(
            "UPDATE locations SET color = ? WHERE id = ?",
            (&color, &location_id),
        )
        .map_err(|e| HandlerErr::update(e, "locations"))?;
    }
    Ok(json!({ "ok": true }))
}

fn locations_archive(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let location_id = required_str(params, "locationId")?;
    let archived = optional_bool(params, "archived", true)?;
    if !location_exists(conn, &location_id)? {
        return Err(HandlerErr::not_found("location not found"));
    }
    conn.execute(
        "UPDATE locations SET archived = ? WHERE id = ?",
        (archived as i64, &location_id),
    )
    .map_err(|e| HandlerErr::update(e, "locations"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "locations.list" => Some(with_db(state, req, |c| locations_list(c, &req.params))),
        "locations.create" => Some(with_db(state, req, |c| locations_create(c, &req.params))),
        "locations.update" => Some(with_db(state, req, |c| locations_update(c, &req.params))),
        "locations.archive" => Some(with_db(state, req, |c| locations_archive(c, &req.params))),
        _ => None,
    }
}
