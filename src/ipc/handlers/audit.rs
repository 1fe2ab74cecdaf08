use crate::ipc::helpers::{
    date_str, load_absences, load_templates, load_trainees, load_trainers, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, AbsenceStatus};
use rusqlite::Connection;
use serde_json::json;

const ALL_STATUSES: [AbsenceStatus; 3] = [
    AbsenceStatus::Pending,
    AbsenceStatus::Validated,
    AbsenceStatus::Cancelled,
];

/// Data-quality report: duplicate validated template rows and orphan
/// absence records. Findings are payload, never failures.
fn audit_run(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut duplicates = Vec::new();
    for owner_kind in ["trainer", "trainee"] {
        let templates = load_templates(conn, owner_kind)?;
        for d in schedule::find_duplicate_templates(&templates) {
            duplicates.push(json!({
                "ownerKind": owner_kind,
                "ownerId": d.owner_id,
                "day": d.day.as_str(),
                "slot": d.slot.as_str(),
                "templateIds": d.entry_ids,
            }));
        }
    }

    // Archived people still exist; only a missing row makes an orphan.
    let trainer_ids: Vec<String> = load_trainers(conn, true)?.into_iter().map(|t| t.id).collect();
    let trainee_ids: Vec<String> = load_trainees(conn, true)?.into_iter().map(|t| t.id).collect();

    let mut orphans = Vec::new();
    for (owner_kind, known) in [("trainer", &trainer_ids), ("trainee", &trainee_ids)] {
        let absences = load_absences(conn, owner_kind, &ALL_STATUSES)?;
        for a in schedule::find_orphan_absences(&absences, known) {
            orphans.push(json!({
                "absenceId": a.id,
                "ownerKind": owner_kind,
                "ownerId": a.person_id,
                "kind": a.kind.as_str(),
                "status": a.status.as_str(),
                "startDate": date_str(a.start_date),
                "endDate": date_str(a.end_date),
            }));
        }
    }

    if !duplicates.is_empty() || !orphans.is_empty() {
        tracing::warn!(
            duplicates = duplicates.len(),
            orphans = orphans.len(),
            "audit found data-quality issues"
        );
    }

    Ok(json!({
        "duplicateTemplates": duplicates,
        "orphanAbsences": orphans,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.run" => Some(with_db(state, req, |c| audit_run(c))),
        _ => None,
    }
}
