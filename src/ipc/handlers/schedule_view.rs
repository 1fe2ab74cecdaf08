use crate::ipc::helpers::{
    date_str, load_absences, load_planning_cells, load_templates, load_trainers, optional_str,
    required_date, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, AbsenceStatus, Slot, SlotStatus, WorkDay};
use rusqlite::Connection;
use serde_json::json;

fn status_json(status: &SlotStatus) -> serde_json::Value {
    json!({
        "status": status.label(),
        "locationId": status.location_id(),
    })
}

/// Resolved status per trainer, day and slot for one displayed week. One
/// snapshot fetch per request; the resolver runs in memory per cell.
fn schedule_week_view(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let monday = required_date(params, "monday")?;
    let days = schedule::week_working_days(monday)
        .map_err(|e| HandlerErr::bad_params(e.message))?;

    let trainers = load_trainers(conn, false)?;
    let templates = load_templates(conn, "trainer")?;
    let absences = load_absences(conn, "trainer", &[AbsenceStatus::Validated])?;
    let cells = load_planning_cells(conn, days[0], days[4])?;

    let mut rows = Vec::with_capacity(trainers.len());
    for t in &trainers {
        let mut day_entries = Vec::with_capacity(days.len());
        for (&date, &day) in days.iter().zip(WorkDay::ALL.iter()) {
            let mut slots = serde_json::Map::new();
            for slot in Slot::ALL {
                let status =
                    schedule::resolve(&t.id, day, slot, date, &templates, &absences, &cells);
                slots.insert(slot.as_str().to_string(), status_json(&status));
            }
            day_entries.push(json!({
                "date": date_str(date),
                "day": day.as_str(),
                "slots": slots,
            }));
        }
        rows.push(json!({
            "trainerId": t.id,
            "displayName": format!("{}, {}", t.last_name, t.first_name),
            "days": day_entries,
        }));
    }

    Ok(json!({
        "weekDays": days.iter().map(|d| date_str(*d)).collect::<Vec<_>>(),
        "rows": rows,
    }))
}

/// Coordinator dashboard: assignable trainers for one date, grouped by
/// resolved status. Trainers with no template at all still appear when an
/// exceptional availability covers the date.
fn schedule_day_candidates(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = required_date(params, "date")?;
    let Some(day) = WorkDay::from_date(date) else {
        return Err(HandlerErr::bad_params("date falls on a weekend"));
    };
    let filter = optional_str(params, "filter").unwrap_or_else(|| "all".to_string());
    if !matches!(filter.as_str(), "all" | "available" | "exceptional") {
        return Err(HandlerErr::bad_params(
            "filter must be all, available or exceptional",
        ));
    }

    let trainers = load_trainers(conn, false)?;
    let templates = load_templates(conn, "trainer")?;
    let absences = load_absences(conn, "trainer", &[AbsenceStatus::Validated])?;
    let cells = load_planning_cells(conn, date, date)?;

    let wanted = |status: &SlotStatus| match filter.as_str() {
        "available" => matches!(status, SlotStatus::AvailableUnchosen { .. }),
        "exceptional" => matches!(status, SlotStatus::ExceptionalAvailability),
        _ => matches!(
            status,
            SlotStatus::AvailableUnchosen { .. }
                | SlotStatus::ExceptionalAvailability
                | SlotStatus::AssignedByCoordinator { .. }
        ),
    };

    let mut candidates = Vec::new();
    for t in &trainers {
        let mut slots = serde_json::Map::new();
        let mut keep = false;
        for slot in Slot::ALL {
            let status = schedule::resolve(&t.id, day, slot, date, &templates, &absences, &cells);
            keep = keep || wanted(&status);
            slots.insert(slot.as_str().to_string(), status_json(&status));
        }
        if keep {
            candidates.push(json!({
                "trainerId": t.id,
                "displayName": format!("{}, {}", t.last_name, t.first_name),
                "slots": slots,
            }));
        }
    }

    Ok(json!({
        "date": date_str(date),
        "day": day.as_str(),
        "filter": filter,
        "candidates": candidates,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.weekView" => Some(with_db(state, req, |c| schedule_week_view(c, &req.params))),
        "schedule.dayCandidates" => Some(with_db(state, req, |c| {
            schedule_day_candidates(c, &req.params)
        })),
        _ => None,
    }
}
