use crate::ipc::helpers::{
    date_str, now_ts, optional_str, required_str, trainee_exists, trainer_exists, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{AbsenceKind, AbsenceStatus, Slot};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn absences_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let owner_kind = optional_str(params, "ownerKind");
    let owner_id = optional_str(params, "ownerId");
    let statuses: Vec<String> = match params.get("statuses").and_then(|v| v.as_array()) {
        Some(arr) => {
            let mut out = Vec::new();
            for v in arr {
                let raw = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("statuses must be strings"))?;
                let s = AbsenceStatus::parse(raw)
                    .ok_or_else(|| HandlerErr::bad_params(format!("unknown status {:?}", raw)))?;
                out.push(s.as_str().to_string());
            }
            out
        }
        None => vec![
            AbsenceStatus::Pending.as_str().to_string(),
            AbsenceStatus::Validated.as_str().to_string(),
        ],
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, owner_kind, owner_id, kind, status, start_date, end_date, slot, created_at
             FROM absences
             WHERE (?1 IS NULL OR owner_kind = ?1)
               AND (?2 IS NULL OR owner_id = ?2)
             ORDER BY start_date, created_at, id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&owner_kind, &owner_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, Option<String>>(7)?,
                r.get::<_, i64>(8)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let absences: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, _, _, _, status, ..)| statuses.iter().any(|s| s == status))
        .map(
            |(id, owner_kind, owner_id, kind, status, start, end, slot, created_at)| {
                json!({
                    "id": id,
                    "ownerKind": owner_kind,
                    "ownerId": owner_id,
                    "kind": kind,
                    "status": status,
                    "startDate": start,
                    "endDate": end,
                    "slot": slot,
                    "createdAt": created_at,
                })
            },
        )
        .collect();
    Ok(json!({ "absences": absences }))
}

fn absences_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let owner_kind = optional_str(params, "ownerKind").unwrap_or_else(|| "trainer".to_string());
    let owner_id = required_str(params, "ownerId")?;
    let exists = match owner_kind.as_str() {
        "trainer" => trainer_exists(conn, &owner_id)?,
        "trainee" => trainee_exists(conn, &owner_id)?,
        _ => return Err(HandlerErr::bad_params("ownerKind must be trainer or trainee")),
    };
    if !exists {
        return Err(HandlerErr::not_found(format!("{} not found", owner_kind)));
    }

    let kind_raw = required_str(params, "kind")?;
    let kind = AbsenceKind::parse(&kind_raw).ok_or_else(|| {
        HandlerErr::bad_params("kind must be absence or exceptional-availability")
    })?;

    // Either a [startDate, endDate] range or a single date (optionally
    // slot-qualified).
    let (start, end) = match optional_str(params, "date") {
        Some(raw) => {
            let d = crate::schedule::parse_date(&raw)
                .map_err(|e| HandlerErr::bad_params(format!("date: {}", e.message)))?;
            (d, d)
        }
        None => {
            let start = crate::ipc::helpers::required_date(params, "startDate")?;
            let end = crate::ipc::helpers::required_date(params, "endDate")?;
            (start, end)
        }
    };
    if end < start {
        return Err(HandlerErr::bad_params("endDate before startDate"));
    }
    let slot = match optional_str(params, "slot") {
        None => None,
        Some(raw) => Some(
            Slot::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params("slot must be morning or afternoon"))?,
        ),
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO absences(id, owner_kind, owner_id, kind, status, start_date, end_date, slot, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &owner_kind,
            &owner_id,
            kind.as_str(),
            AbsenceStatus::Pending.as_str(),
            date_str(start),
            date_str(end),
            slot.map(|s| s.as_str()),
            now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "absences"))?;
    Ok(json!({ "absenceId": id, "status": "pending" }))
}

fn absences_set_status(
    conn: &Connection,
    params: &serde_json::Value,
    status: AbsenceStatus,
) -> Result<serde_json::Value, HandlerErr> {
    let absence_id = required_str(params, "absenceId")?;
    let n = conn
        .execute(
            "UPDATE absences SET status = ? WHERE id = ?",
            (status.as_str(), &absence_id),
        )
        .map_err(|e| HandlerErr::update(e, "absences"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("absence not found"));
    }
    tracing::info!(%absence_id, status = status.as_str(), "absence status changed");
    Ok(json!({ "ok": true, "status": status.as_str() }))
}

/// Remove absence rows whose owner no longer exists. The only hard-delete
/// path for absences.
fn absences_cleanup_orphans(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let removed = conn
        .execute(
            "DELETE FROM absences
             WHERE (owner_kind = 'trainer' AND owner_id NOT IN (SELECT id FROM trainers))
                OR (owner_kind = 'trainee' AND owner_id NOT IN (SELECT id FROM trainees))",
            [],
        )
        .map_err(|e| HandlerErr::update(e, "absences"))?;
    if removed > 0 {
        tracing::info!(removed, "orphan absences removed");
    }
    Ok(json!({ "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "absences.list" => Some(with_db(state, req, |c| absences_list(c, &req.params))),
        "absences.create" => Some(with_db(state, req, |c| absences_create(c, &req.params))),
        "absences.validate" => Some(with_db(state, req, |c| {
            absences_set_status(c, &req.params, AbsenceStatus::Validated)
        })),
        "absences.cancel" => Some(with_db(state, req, |c| {
            absences_set_status(c, &req.params, AbsenceStatus::Cancelled)
        })),
        "absences.cleanupOrphans" => Some(with_db(state, req, |c| absences_cleanup_orphans(c))),
        _ => None,
    }
}
