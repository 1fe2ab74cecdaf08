use crate::ipc::helpers::{
    date_str, load_absences, load_placement_history, load_planning_cells, load_suspensions,
    load_templates, load_trainee_windows, load_trainers, location_exists, now_ts, required_date,
    required_slot, required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, AbsenceStatus, MaterializeInput, WorkDay};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn cell_json(c: &crate::schedule::PlanningCell) -> serde_json::Value {
    json!({
        "date": date_str(c.date),
        "slot": c.slot.as_str(),
        "locationId": c.location_id,
        "trainerIds": c.trainer_ids,
        "traineeIds": c.trainee_ids,
    })
}

fn planning_week_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let monday = required_date(params, "monday")?;
    let days = schedule::week_working_days(monday)
        .map_err(|e| HandlerErr::bad_params(e.message))?;
    let cells = load_planning_cells(conn, days[0], days[4])?;
    Ok(json!({
        "weekDays": days.iter().map(|d| date_str(*d)).collect::<Vec<_>>(),
        "cells": cells.iter().map(cell_json).collect::<Vec<_>>(),
    }))
}

fn string_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let s = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of ids", key)))?
            .trim()
            .to_string();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    Ok(out)
}

fn planning_set_cell(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = required_date(params, "date")?;
    let Some(day) = WorkDay::from_date(date) else {
        return Err(HandlerErr::bad_params("date falls on a weekend"));
    };
    let slot = required_slot(params, "slot")?;
    let location_id = required_str(params, "locationId")?;
    if !location_exists(conn, &location_id)? {
        return Err(HandlerErr::not_found("location not found"));
    }
    let trainer_ids = string_array(params, "trainerIds")?;
    let trainee_ids = string_array(params, "traineeIds")?;

    conn.execute(
        "INSERT INTO planning_cells(id, date, day, slot, location_id, trainer_ids, trainee_ids, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(date, slot, location_id) DO UPDATE SET
           trainer_ids = excluded.trainer_ids,
           trainee_ids = excluded.trainee_ids",
        (
            Uuid::new_v4().to_string(),
            date_str(date),
            day.as_str(),
            slot.as_str(),
            &location_id,
            serde_json::to_string(&trainer_ids).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&trainee_ids).unwrap_or_else(|_| "[]".to_string()),
            now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "planning_cells"))?;
    Ok(json!({ "ok": true }))
}

fn planning_clear_cell(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = required_date(params, "date")?;
    let slot = required_slot(params, "slot")?;
    let location_id = required_str(params, "locationId")?;
    let n = conn
        .execute(
            "DELETE FROM planning_cells WHERE date = ? AND slot = ? AND location_id = ?",
            (date_str(date), slot.as_str(), &location_id),
        )
        .map_err(|e| HandlerErr::update(e, "planning_cells"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("cell not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Seed the target week from the standing templates and replace any draft
/// already stored for that week.
fn planning_generate_next_week(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let monday = required_date(params, "monday")?;
    let days = schedule::week_working_days(monday)
        .map_err(|e| HandlerErr::bad_params(e.message))?;

    let trainer_ids: Vec<String> = load_trainers(conn, false)?
        .into_iter()
        .map(|t| t.id)
        .collect();
    let templates = load_templates(conn, "trainer")?;
    let absences = load_absences(conn, "trainer", &[AbsenceStatus::Validated])?;
    let trainees = load_trainee_windows(conn)?;
    let trainee_templates = load_templates(conn, "trainee")?;
    let trainee_absences = load_absences(conn, "trainee", &[AbsenceStatus::Validated])?;
    let suspensions = load_suspensions(conn)?;
    let history = load_placement_history(conn, monday)?;

    let draft = schedule::materialize(&MaterializeInput {
        week: &days,
        trainers: &trainer_ids,
        templates: &templates,
        absences: &absences,
        trainees: &trainees,
        trainee_templates: &trainee_templates,
        trainee_absences: &trainee_absences,
        suspensions: &suspensions,
        history: &history,
    })
    .map_err(|e| HandlerErr::bad_params(e.message))?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute(
        "DELETE FROM planning_cells WHERE date >= ? AND date <= ?",
        (date_str(days[0]), date_str(days[4])),
    )
    .map_err(|e| HandlerErr::update(e, "planning_cells"))?;
    for cell in &draft.cells {
        tx.execute(
            "INSERT INTO planning_cells(id, date, day, slot, location_id, trainer_ids, trainee_ids, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                date_str(cell.date),
                cell.day.as_str(),
                cell.slot.as_str(),
                &cell.location_id,
                serde_json::to_string(&cell.trainer_ids).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&cell.trainee_ids).unwrap_or_else(|_| "[]".to_string()),
                now_ts(),
            ),
        )
        .map_err(|e| HandlerErr::update(e, "planning_cells"))?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    tracing::info!(week = %date_str(monday), cells = draft.cells.len(), "week draft generated");

    let cells: Vec<serde_json::Value> = draft
        .cells
        .iter()
        .map(|c| {
            json!({
                "date": date_str(c.date),
                "day": c.day.as_str(),
                "slot": c.slot.as_str(),
                "locationId": c.location_id,
                "locationIndex": c.location_index,
                "trainerIds": c.trainer_ids,
                "traineeIds": c.trainee_ids,
            })
        })
        .collect();
    Ok(json!({ "cellCount": draft.cells.len(), "cells": cells }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "planning.weekOpen" => Some(with_db(state, req, |c| planning_week_open(c, &req.params))),
        "planning.setCell" => Some(with_db(state, req, |c| planning_set_cell(c, &req.params))),
        "planning.clearCell" => Some(with_db(state, req, |c| planning_clear_cell(c, &req.params))),
        "planning.generateNextWeek" => Some(with_db(state, req, |c| {
            planning_generate_next_week(c, &req.params)
        })),
        _ => None,
    }
}
