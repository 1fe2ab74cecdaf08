use crate::ipc::helpers::{now_ts, optional_bool, required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn messages_send(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let sender = required_str(params, "sender")?;
    let recipient = required_str(params, "recipient")?;
    let subject = required_str(params, "subject")?;
    let body = required_str(params, "body")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO messages(id, sender, recipient, subject, body, read, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (&id, &sender, &recipient, &subject, &body, now_ts()),
    )
    .map_err(|e| HandlerErr::update(e, "messages"))?;
    Ok(json!({ "messageId": id }))
}

fn messages_inbox(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let recipient = required_str(params, "recipient")?;
    let unread_only = optional_bool(params, "unreadOnly", false)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, sender, subject, body, read, created_at
             FROM messages
             WHERE recipient = ?1 AND (?2 = 0 OR read = 0)
             ORDER BY created_at DESC, id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&recipient, unread_only as i64), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sender": r.get::<_, String>(1)?,
                "subject": r.get::<_, String>(2)?,
                "body": r.get::<_, String>(3)?,
                "read": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "messages": rows }))
}

fn messages_mark_read(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let message_id = required_str(params, "messageId")?;
    let n = conn
        .execute("UPDATE messages SET read = 1 WHERE id = ?", [&message_id])
        .map_err(|e| HandlerErr::update(e, "messages"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("message not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.send" => Some(with_db(state, req, |c| messages_send(c, &req.params))),
        "messages.inbox" => Some(with_db(state, req, |c| messages_inbox(c, &req.params))),
        "messages.markRead" => Some(with_db(state, req, |c| messages_mark_read(c, &req.params))),
        _ => None,
    }
}
