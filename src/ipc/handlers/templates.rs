use crate::ipc::helpers::{
    location_exists, now_ts, optional_bool, optional_str, required_day, required_slot,
    required_str, trainee_exists, trainer_exists, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::TemplateStatus;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn required_owner(conn: &Connection, params: &serde_json::Value) -> Result<(String, String), HandlerErr> {
    let owner_kind = required_str(params, "ownerKind")?;
    let owner_id = required_str(params, "ownerId")?;
    let exists = match owner_kind.as_str() {
        "trainer" => trainer_exists(conn, &owner_id)?,
        "trainee" => trainee_exists(conn, &owner_id)?,
        _ => return Err(HandlerErr::bad_params("ownerKind must be trainer or trainee")),
    };
    if !exists {
        return Err(HandlerErr::not_found(format!("{} not found", owner_kind)));
    }
    Ok((owner_kind, owner_id))
}

fn templates_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let owner_kind = required_str(params, "ownerKind")?;
    let owner_id = optional_str(params, "ownerId");
    let mut stmt = conn
        .prepare(
            "SELECT id, owner_id, day, slot, status, location_id, validated, created_at
             FROM weekly_templates
             WHERE owner_kind = ?1 AND (?2 IS NULL OR owner_id = ?2)
             ORDER BY owner_id, created_at, id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&owner_kind, &owner_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "ownerId": r.get::<_, String>(1)?,
                "day": r.get::<_, String>(2)?,
                "slot": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "locationId": r.get::<_, Option<String>>(5)?,
                "validated": r.get::<_, i64>(6)? != 0,
                "createdAt": r.get::<_, i64>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "templates": rows }))
}

fn templates_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (owner_kind, owner_id) = required_owner(conn, params)?;
    let day = required_day(params, "day")?;
    let slot = required_slot(params, "slot")?;
    let status_raw = required_str(params, "status")?;
    let status = TemplateStatus::parse(&status_raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be available or exceptional"))?;
    let location_id = optional_str(params, "locationId");
    if let Some(loc) = &location_id {
        if !location_exists(conn, loc)? {
            return Err(HandlerErr::not_found("location not found"));
        }
    }
    let validated = optional_bool(params, "validated", false)?;

    // No UNIQUE constraint backs (owner, day, slot): historical duplicates
    // must stay representable for the audit. Set updates the earliest row
    // when one exists, so it never creates a new duplicate itself.
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM weekly_templates
             WHERE owner_kind = ? AND owner_id = ? AND day = ? AND slot = ?
             ORDER BY created_at, id LIMIT 1",
            (&owner_kind, &owner_id, day.as_str(), slot.as_str()),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let template_id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE weekly_templates SET status = ?, location_id = ?, validated = ? WHERE id = ?",
                (status.as_str(), &location_id, validated as i64, &id),
            )
            .map_err(|e| HandlerErr::update(e, "weekly_templates"))?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO weekly_templates(id, owner_kind, owner_id, day, slot, status, location_id, validated, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &owner_kind,
                    &owner_id,
                    day.as_str(),
                    slot.as_str(),
                    status.as_str(),
                    &location_id,
                    validated as i64,
                    now_ts(),
                ),
            )
            .map_err(|e| HandlerErr::update(e, "weekly_templates"))?;
            id
        }
    };
    Ok(json!({ "templateId": template_id }))
}

fn templates_validate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let template_id = required_str(params, "templateId")?;
    let validated = optional_bool(params, "validated", true)?;
    let n = conn
        .execute(
            "UPDATE weekly_templates SET validated = ? WHERE id = ?",
            (validated as i64, &template_id),
        )
        .map_err(|e| HandlerErr::update(e, "weekly_templates"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("template not found"));
    }
    Ok(json!({ "ok": true }))
}

fn templates_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let template_id = required_str(params, "templateId")?;
    let n = conn
        .execute("DELETE FROM weekly_templates WHERE id = ?", [&template_id])
        .map_err(|e| HandlerErr::update(e, "weekly_templates"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("template not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "templates.list" => Some(with_db(state, req, |c| templates_list(c, &req.params))),
        "templates.set" => Some(with_db(state, req, |c| templates_set(c, &req.params))),
        "templates.validate" => Some(with_db(state, req, |c| templates_validate(c, &req.params))),
        "templates.delete" => Some(with_db(state, req, |c| templates_delete(c, &req.params))),
        _ => None,
    }
}
