use crate::ipc::helpers::{now_ts, required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const SESSION_TTL_SECS: i64 = 8 * 3600;
const LOCK_STALE_SECS: i64 = 90;

// Tokens are random; only their digest is stored.
fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn session_login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_name = required_str(params, "userName")?;
    let role = required_str(params, "role")?;
    if !matches!(role.as_str(), "admin" | "coordinator" | "trainer") {
        return Err(HandlerErr::bad_params(
            "role must be admin, coordinator or trainer",
        ));
    }

    let session_id = Uuid::new_v4().to_string();
    let token = Uuid::new_v4().to_string();
    let now = now_ts();
    let expires_at = now + SESSION_TTL_SECS;
    conn.execute(
        "INSERT INTO sessions(id, token_hash, user_name, role, expires_at, refreshed_at, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &session_id,
            token_digest(&token),
            &user_name,
            &role,
            expires_at,
            now,
            now,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "sessions"))?;

    tracing::info!(user = %user_name, role = %role, "session opened");
    Ok(json!({
        "sessionId": session_id,
        "token": token,
        "expiresAt": expires_at,
    }))
}

fn session_refresh(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let token = required_str(params, "token")?;
    let digest = token_digest(&token);
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT id, expires_at FROM sessions WHERE token_hash = ?",
            [&digest],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((session_id, expires_at)) = row else {
        return Err(HandlerErr::new("session_invalid", "unknown token"));
    };
    let now = now_ts();
    if now >= expires_at {
        conn.execute("DELETE FROM sessions WHERE id = ?", [&session_id])
            .map_err(|e| HandlerErr::update(e, "sessions"))?;
        return Err(HandlerErr::new("session_expired", "session expired; log in again"));
    }
    let new_expiry = now + SESSION_TTL_SECS;
    conn.execute(
        "UPDATE sessions SET expires_at = ?, refreshed_at = ? WHERE id = ?",
        (new_expiry, now, &session_id),
    )
    .map_err(|e| HandlerErr::update(e, "sessions"))?;
    Ok(json!({ "sessionId": session_id, "expiresAt": new_expiry }))
}

fn session_logout(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let token = required_str(params, "token")?;
    let n = conn
        .execute(
            "DELETE FROM sessions WHERE token_hash = ?",
            [token_digest(&token)],
        )
        .map_err(|e| HandlerErr::update(e, "sessions"))?;
    Ok(json!({ "removed": n }))
}

/// The session behind `sessionId` must be a live admin session.
fn require_admin_session(conn: &Connection, params: &serde_json::Value) -> Result<String, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT role, expires_at FROM sessions WHERE id = ?",
            [&session_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((role, expires_at)) = row else {
        return Err(HandlerErr::new("session_invalid", "unknown session"));
    };
    if now_ts() >= expires_at {
        return Err(HandlerErr::new("session_expired", "session expired; log in again"));
    }
    if role != "admin" {
        return Err(HandlerErr::new("forbidden", "admin session required"));
    }
    Ok(session_id)
}

struct LockRow {
    holder_session_id: String,
    acquired_at: i64,
    heartbeat_at: i64,
}

fn read_lock(conn: &Connection) -> Result<Option<LockRow>, HandlerErr> {
    conn.query_row(
        "SELECT holder_session_id, acquired_at, heartbeat_at FROM admin_lock WHERE id = 1",
        [],
        |r| {
            Ok(LockRow {
                holder_session_id: r.get(0)?,
                acquired_at: r.get(1)?,
                heartbeat_at: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn lock_json(lock: &LockRow, stale: bool) -> serde_json::Value {
    json!({
        "holderSessionId": lock.holder_session_id,
        "acquiredAt": lock.acquired_at,
        "heartbeatAt": lock.heartbeat_at,
        "stale": stale,
    })
}

fn write_lock(conn: &Connection, session_id: &str, now: i64) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO admin_lock(id, holder_session_id, acquired_at, heartbeat_at)
         VALUES(1, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           holder_session_id = excluded.holder_session_id,
           acquired_at = excluded.acquired_at,
           heartbeat_at = excluded.heartbeat_at",
        (session_id, now, now),
    )
    .map_err(|e| HandlerErr::update(e, "admin_lock"))?;
    Ok(())
}

/// Acquire only succeeds against a free lock (or one this session already
/// holds). A stale lock is reported, never silently taken; stealing is an
/// explicit separate call.
fn admin_lock_acquire(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = require_admin_session(conn, params)?;
    let now = now_ts();
    match read_lock(conn)? {
        None => {
            write_lock(conn, &session_id, now)?;
            tracing::info!(%session_id, "admin lock acquired");
            Ok(json!({ "acquired": true }))
        }
        Some(lock) if lock.holder_session_id == session_id => {
            conn.execute(
                "UPDATE admin_lock SET heartbeat_at = ? WHERE id = 1",
                [now],
            )
            .map_err(|e| HandlerErr::update(e, "admin_lock"))?;
            Ok(json!({ "acquired": true }))
        }
        Some(lock) => {
            let stale = now - lock.heartbeat_at > LOCK_STALE_SECS;
            let code = if stale { "lock_stale" } else { "locked" };
            Err(HandlerErr {
                code,
                message: "another admin session holds the lock".to_string(),
                details: Some(lock_json(&lock, stale)),
            })
        }
    }
}

fn admin_lock_heartbeat(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = require_admin_session(conn, params)?;
    let Some(lock) = read_lock(conn)? else {
        return Err(HandlerErr::new("not_lock_holder", "no admin lock is held"));
    };
    if lock.holder_session_id != session_id {
        return Err(HandlerErr::new("not_lock_holder", "lock held by another session"));
    }
    conn.execute("UPDATE admin_lock SET heartbeat_at = ? WHERE id = 1", [now_ts()])
        .map_err(|e| HandlerErr::update(e, "admin_lock"))?;
    Ok(json!({ "ok": true }))
}

fn admin_lock_release(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = require_admin_session(conn, params)?;
    let Some(lock) = read_lock(conn)? else {
        return Ok(json!({ "released": false }));
    };
    if lock.holder_session_id != session_id {
        return Err(HandlerErr::new("not_lock_holder", "lock held by another session"));
    }
    conn.execute("DELETE FROM admin_lock WHERE id = 1", [])
        .map_err(|e| HandlerErr::update(e, "admin_lock"))?;
    tracing::info!(%session_id, "admin lock released");
    Ok(json!({ "released": true }))
}

/// Take over a lock whose holder stopped heartbeating. A fresh lock
/// cannot be stolen.
fn admin_lock_steal(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = require_admin_session(conn, params)?;
    let now = now_ts();
    match read_lock(conn)? {
        None => {
            write_lock(conn, &session_id, now)?;
            Ok(json!({ "stolen": false, "acquired": true }))
        }
        Some(lock) if lock.holder_session_id == session_id => Ok(json!({
            "stolen": false,
            "acquired": true,
        })),
        Some(lock) => {
            if now - lock.heartbeat_at <= LOCK_STALE_SECS {
                return Err(HandlerErr {
                    code: "locked",
                    message: "lock holder is still active".to_string(),
                    details: Some(lock_json(&lock, false)),
                });
            }
            write_lock(conn, &session_id, now)?;
            tracing::warn!(
                %session_id,
                previous = %lock.holder_session_id,
                "stale admin lock stolen"
            );
            Ok(json!({ "stolen": true, "acquired": true }))
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(with_db(state, req, |c| session_login(c, &req.params))),
        "session.refresh" => Some(with_db(state, req, |c| session_refresh(c, &req.params))),
        "session.logout" => Some(with_db(state, req, |c| session_logout(c, &req.params))),
        "adminLock.acquire" => Some(with_db(state, req, |c| admin_lock_acquire(c, &req.params))),
        "adminLock.heartbeat" => Some(with_db(state, req, |c| admin_lock_heartbeat(c, &req.params))),
        "adminLock.release" => Some(with_db(state, req, |c| admin_lock_release(c, &req.params))),
        "adminLock.steal" => Some(with_db(state, req, |c| admin_lock_steal(c, &req.params))),
        _ => None,
    }
}
