use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ipc::error::err;
use crate::schedule::{
    AbsenceKind, AbsenceRecord, AbsenceStatus, PastPlacement, PlanningCell, Slot, Suspension,
    TemplateEntry, TemplateStatus, TraineeWindow, WorkDay,
};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn update(e: rusqlite::Error, table: &str) -> Self {
        Self {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn with_db<F>(
    state: &crate::ipc::types::AppState,
    req: &crate::ipc::types::Request,
    f: F,
) -> serde_json::Value
where
    F: FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_bool(params: &serde_json::Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

/// Unparseable dates are rejected loudly, never coerced.
pub fn required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    crate::schedule::parse_date(&raw)
        .map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e.message)))
}

pub fn required_slot(params: &serde_json::Value, key: &str) -> Result<Slot, HandlerErr> {
    let raw = required_str(params, key)?;
    Slot::parse(&raw).ok_or_else(|| HandlerErr::bad_params(format!("{} must be morning or afternoon", key)))
}

pub fn required_day(params: &serde_json::Value, key: &str) -> Result<WorkDay, HandlerErr> {
    let raw = required_str(params, key)?;
    WorkDay::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a working day name", key)))
}

pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn parse_db_date(raw: &str, table: &str) -> Option<NaiveDate> {
    match crate::schedule::parse_date(raw) {
        Ok(d) => Some(d),
        Err(_) => {
            tracing::warn!(table, raw, "skipping row with unparseable date");
            None
        }
    }
}

/// All template rows for one owner kind, as core snapshot entries. Rows
/// with unrecognized day/slot/status values are skipped with a warning;
/// one bad row must not take down resolution for everyone else.
pub fn load_templates(conn: &Connection, owner_kind: &str) -> Result<Vec<TemplateEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, owner_id, day, slot, status, location_id, validated, created_at
             FROM weekly_templates
             WHERE owner_kind = ?
             ORDER BY created_at, id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([owner_kind], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, i64>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, owner_id, day, slot, status, location_id, validated, created_at) in rows {
        let (Some(day), Some(slot), Some(status)) = (
            WorkDay::parse(&day),
            Slot::parse(&slot),
            TemplateStatus::parse(&status),
        ) else {
            tracing::warn!(%id, "skipping weekly_templates row with unrecognized fields");
            continue;
        };
        out.push(TemplateEntry {
            id,
            owner_id,
            day,
            slot,
            status,
            location_id,
            validated: validated != 0,
            created_at,
        });
    }
    Ok(out)
}

/// Absence records for one owner kind. `statuses` selects which lifecycle
/// states the caller treats as authoritative (resolution wants validated
/// only; display call sites may widen to pending).
pub fn load_absences(
    conn: &Connection,
    owner_kind: &str,
    statuses: &[AbsenceStatus],
) -> Result<Vec<AbsenceRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, owner_id, kind, status, start_date, end_date, slot, created_at
             FROM absences
             WHERE owner_kind = ?
             ORDER BY created_at, id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([owner_kind], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, Option<String>>(6)?,
                r.get::<_, i64>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, owner_id, kind, status, start_date, end_date, slot, created_at) in rows {
        let (Some(kind), Some(status)) = (AbsenceKind::parse(&kind), AbsenceStatus::parse(&status))
        else {
            tracing::warn!(%id, "skipping absences row with unrecognized kind/status");
            continue;
        };
        if !statuses.contains(&status) {
            continue;
        }
        let (Some(start_date), Some(end_date)) = (
            parse_db_date(&start_date, "absences"),
            parse_db_date(&end_date, "absences"),
        ) else {
            continue;
        };
        let slot = match slot {
            None => None,
            Some(raw) => match Slot::parse(&raw) {
                Some(s) => Some(s),
                None => {
                    tracing::warn!(%id, "skipping absences row with unrecognized slot");
                    continue;
                }
            },
        };
        out.push(AbsenceRecord {
            id,
            person_id: owner_id,
            kind,
            status,
            start_date,
            end_date,
            slot,
            created_at,
        });
    }
    Ok(out)
}

/// Coordinator cells with dates inside [from, to].
pub fn load_planning_cells(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<PlanningCell>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT date, slot, location_id, trainer_ids, trainee_ids
             FROM planning_cells
             WHERE date >= ? AND date <= ?
             ORDER BY date, slot, location_id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([date_str(from), date_str(to)], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut out = Vec::with_capacity(rows.len());
    for (date, slot, location_id, trainer_ids, trainee_ids) in rows {
        let (Some(date), Some(slot)) = (parse_db_date(&date, "planning_cells"), Slot::parse(&slot))
        else {
            continue;
        };
        out.push(PlanningCell {
            date,
            slot,
            location_id,
            trainer_ids: parse_id_list(&trainer_ids),
            trainee_ids: parse_id_list(&trainee_ids),
        });
    }
    Ok(out)
}

pub fn parse_id_list(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

pub struct TrainerRow {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub archived: bool,
    pub office: bool,
    pub sort_order: i64,
}

pub fn load_trainers(conn: &Connection, include_archived: bool) -> Result<Vec<TrainerRow>, HandlerErr> {
    let sql = if include_archived {
        "SELECT id, last_name, first_name, email, archived, office, sort_order
         FROM trainers ORDER BY sort_order, last_name, first_name"
    } else {
        "SELECT id, last_name, first_name, email, archived, office, sort_order
         FROM trainers WHERE archived = 0 ORDER BY sort_order, last_name, first_name"
    };
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        Ok(TrainerRow {
            id: r.get(0)?,
            last_name: r.get(1)?,
            first_name: r.get(2)?,
            email: r.get(3)?,
            archived: r.get::<_, i64>(4)? != 0,
            office: r.get::<_, i64>(5)? != 0,
            sort_order: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub struct TraineeRow {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    pub enrollment_start: String,
    pub enrollment_end: String,
    pub archived: bool,
    pub end_notified: bool,
}

pub fn load_trainees(conn: &Connection, include_archived: bool) -> Result<Vec<TraineeRow>, HandlerErr> {
    let sql = if include_archived {
        "SELECT id, last_name, first_name, enrollment_start, enrollment_end, archived, end_notified
         FROM trainees ORDER BY last_name, first_name"
    } else {
        "SELECT id, last_name, first_name, enrollment_start, enrollment_end, archived, end_notified
         FROM trainees WHERE archived = 0 ORDER BY last_name, first_name"
    };
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        Ok(TraineeRow {
            id: r.get(0)?,
            last_name: r.get(1)?,
            first_name: r.get(2)?,
            enrollment_start: r.get(3)?,
            enrollment_end: r.get(4)?,
            archived: r.get::<_, i64>(5)? != 0,
            end_notified: r.get::<_, i64>(6)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub fn load_trainee_windows(conn: &Connection) -> Result<Vec<TraineeWindow>, HandlerErr> {
    let rows = load_trainees(conn, false)?;
    let mut out = Vec::with_capacity(rows.len());
    for t in rows {
        let (Some(start), Some(end)) = (
            parse_db_date(&t.enrollment_start, "trainees"),
            parse_db_date(&t.enrollment_end, "trainees"),
        ) else {
            continue;
        };
        out.push(TraineeWindow {
            id: t.id,
            enrollment_start: start,
            enrollment_end: end,
        });
    }
    Ok(out)
}

pub fn load_suspensions(conn: &Connection) -> Result<Vec<Suspension>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT trainee_id, start_date, end_date FROM suspensions ORDER BY start_date")
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let mut out = Vec::with_capacity(rows.len());
    for (trainee_id, start, end) in rows {
        let (Some(start_date), Some(end_date)) = (
            parse_db_date(&start, "suspensions"),
            parse_db_date(&end, "suspensions"),
        ) else {
            continue;
        };
        out.push(Suspension {
            trainee_id,
            start_date,
            end_date,
        });
    }
    Ok(out)
}

/// Historical placements strictly before `cutoff`, flattened per trainer.
/// Feeds the most-frequent-location fallback.
pub fn load_placement_history(
    conn: &Connection,
    cutoff: NaiveDate,
) -> Result<Vec<PastPlacement>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT date, day, slot, location_id, trainer_ids
             FROM planning_cells
             WHERE date < ?
             ORDER BY date, slot, location_id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([date_str(cutoff)], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut out = Vec::new();
    for (_date, day, slot, location_id, trainer_ids) in rows {
        let (Some(day), Some(slot)) = (WorkDay::parse(&day), Slot::parse(&slot)) else {
            continue;
        };
        for trainer_id in parse_id_list(&trainer_ids) {
            out.push(PastPlacement {
                trainer_id,
                day,
                slot,
                location_id: location_id.clone(),
            });
        }
    }
    Ok(out)
}

pub fn trainer_exists(conn: &Connection, trainer_id: &str) -> Result<bool, HandlerErr> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT 1 FROM trainers WHERE id = ?", [trainer_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

pub fn trainee_exists(conn: &Connection, trainee_id: &str) -> Result<bool, HandlerErr> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT 1 FROM trainees WHERE id = ?", [trainee_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

pub fn location_exists(conn: &Connection, location_id: &str) -> Result<bool, HandlerErr> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT 1 FROM locations WHERE id = ?", [location_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}
