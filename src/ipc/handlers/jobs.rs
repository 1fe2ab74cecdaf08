use crate::db;
use crate::ipc::helpers::{date_str, now_ts, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const DEFAULT_NOTICE_DAYS: i64 = 14;
const DEFAULT_RETENTION_DAYS: i64 = 30;
const JOBS_RECIPIENT: &str = "coordinator";

fn job_setting_i64(conn: &Connection, key: &str, field: &str, default: i64) -> i64 {
    db::settings_get_json(conn, key)
        .ok()
        .flatten()
        .and_then(|v| v.get(field).and_then(|n| n.as_i64()))
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

fn today_param(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("today").and_then(|v| v.as_str()) {
        Some(raw) => crate::schedule::parse_date(raw)
            .map_err(|e| HandlerErr::bad_params(format!("today: {}", e.message))),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

/// Externally triggered daily scan: trainees whose enrollment ends inside
/// the notice window get one coordinator message. `end_notified` is
/// checked before acting, so re-running the scan emits nothing new.
fn jobs_enrollment_scan(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today_param(params)?;
    let notice_days = job_setting_i64(conn, "jobs.enrollmentScan", "noticeDays", DEFAULT_NOTICE_DAYS);
    let horizon = today + chrono::Duration::days(notice_days);

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, enrollment_end
             FROM trainees
             WHERE archived = 0 AND end_notified = 0
               AND enrollment_end >= ? AND enrollment_end <= ?
             ORDER BY enrollment_end, id",
        )
        .map_err(HandlerErr::query)?;
    let due = stmt
        .query_map((date_str(today), date_str(horizon)), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut notified = 0usize;
    for (trainee_id, last_name, first_name, enrollment_end) in &due {
        tx.execute(
            "INSERT INTO messages(id, sender, recipient, subject, body, read, created_at)
             VALUES(?, 'system', ?, ?, ?, 0, ?)",
            (
                Uuid::new_v4().to_string(),
                JOBS_RECIPIENT,
                format!("Enrollment ending: {}, {}", last_name, first_name),
                format!(
                    "Enrollment of {}, {} ends on {}.",
                    last_name, first_name, enrollment_end
                ),
                now_ts(),
            ),
        )
        .map_err(|e| HandlerErr::update(e, "messages"))?;
        tx.execute(
            "UPDATE trainees SET end_notified = 1 WHERE id = ?",
            [trainee_id],
        )
        .map_err(|e| HandlerErr::update(e, "trainees"))?;
        notified += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    tracing::info!(notified, "enrollment scan complete");
    Ok(json!({ "notified": notified }))
}

/// On-demand cleanup of read messages past the retention window.
fn jobs_message_cleanup(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let retention_days = match params.get("retentionDays").and_then(|v| v.as_i64()) {
        Some(n) if n > 0 => n,
        Some(_) => return Err(HandlerErr::bad_params("retentionDays must be positive")),
        None => job_setting_i64(conn, "jobs.messageCleanup", "retentionDays", DEFAULT_RETENTION_DAYS),
    };
    let cutoff = now_ts() - retention_days * 86_400;
    let removed = conn
        .execute(
            "DELETE FROM messages WHERE read = 1 AND created_at < ?",
            [cutoff],
        )
        .map_err(|e| HandlerErr::update(e, "messages"))?;
    tracing::info!(removed, "message cleanup complete");
    Ok(json!({ "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "jobs.enrollmentScan" => Some(with_db(state, req, |c| jobs_enrollment_scan(c, &req.params))),
        "jobs.messageCleanup" => Some(with_db(state, req, |c| jobs_message_cleanup(c, &req.params))),
        _ => None,
    }
}
