use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("planif.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trainers(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            email TEXT,
            archived INTEGER NOT NULL DEFAULT 0,
            office INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    ensure_trainers_office(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trainees(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            enrollment_start TEXT NOT NULL,
            enrollment_end TEXT NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0,
            end_notified INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    ensure_trainees_end_notified(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS locations(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            initial TEXT NOT NULL,
            color TEXT,
            archived INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_templates(
            id TEXT PRIMARY KEY,
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            day TEXT NOT NULL,
            slot TEXT NOT NULL,
            status TEXT NOT NULL,
            location_id TEXT,
            validated INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_templates_owner ON weekly_templates(owner_kind, owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS absences(
            id TEXT PRIMARY KEY,
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            slot TEXT,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absences_owner ON absences(owner_kind, owner_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absences_dates ON absences(start_date, end_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS planning_cells(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            day TEXT NOT NULL,
            slot TEXT NOT NULL,
            location_id TEXT NOT NULL,
            trainer_ids TEXT NOT NULL,
            trainee_ids TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(date, slot, location_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_planning_cells_date ON planning_cells(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS presence_declarations(
            id TEXT PRIMARY KEY,
            trainer_id TEXT NOT NULL,
            date TEXT NOT NULL,
            slot TEXT NOT NULL,
            present INTEGER NOT NULL,
            expected_status TEXT NOT NULL,
            flag TEXT NOT NULL,
            reason TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(trainer_id, date, slot)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_presence_declarations_date ON presence_declarations(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS suspensions(
            id TEXT PRIMARY KEY,
            trainee_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            reason TEXT,
            FOREIGN KEY(trainee_id) REFERENCES trainees(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_suspensions_trainee ON suspensions(trainee_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            token_hash TEXT NOT NULL UNIQUE,
            user_name TEXT NOT NULL,
            role TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            refreshed_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Single-row advisory lock; the row id is always 1.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admin_lock(
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder_session_id TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            heartbeat_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_trainers_office(conn: &Connection) -> anyhow::Result<()> {
    // Workspaces created before the office-day exception existed lack the
    // column.
    if table_has_column(conn, "trainers", "office")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE trainers ADD COLUMN office INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_trainees_end_notified(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "trainees", "end_notified")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE trainees ADD COLUMN end_notified INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    use rusqlite::OptionalExtension;
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
