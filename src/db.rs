use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "studytrack.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            avatar_path TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    // Existing workspaces may predate avatar support. Add the column if needed.
    ensure_users_avatar_path(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_entries(
            id TEXT PRIMARY KEY,
            weekday INTEGER NOT NULL,
            subject TEXT NOT NULL,
            time_range TEXT NOT NULL,
            room TEXT NOT NULL,
            attendance_status TEXT NOT NULL DEFAULT 'unmarked',
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    ensure_schedule_entries_sort_order(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_entries_weekday ON schedule_entries(weekday, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE(subject, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_subject ON attendance_records(subject)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_date ON attendance_records(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notes(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            subject TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notes_subject ON notes(subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS note_attachments(
            id TEXT PRIMARY KEY,
            note_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            stored_path TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(note_id) REFERENCES notes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_note_attachments_note ON note_attachments(note_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_users_avatar_path(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "avatar_path")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN avatar_path TEXT", [])?;
    Ok(())
}

fn ensure_schedule_entries_sort_order(conn: &Connection) -> anyhow::Result<()> {
    // If the column already exists, we're done.
    if table_has_column(conn, "schedule_entries", "sort_order")? {
        return Ok(());
    }

    conn.execute(
        "ALTER TABLE schedule_entries ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
        [],
    )?;

    // Backfill per weekday using existing insert order as a best-effort.
    let mut stmt =
        conn.prepare("SELECT id FROM schedule_entries WHERE weekday = ? ORDER BY rowid")?;
    for weekday in 0..7i64 {
        let entry_ids = stmt
            .query_map([weekday], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for (i, id) in entry_ids.iter().enumerate() {
            conn.execute(
                "UPDATE schedule_entries SET sort_order = ? WHERE id = ?",
                (i as i64, id),
            )?;
        }
    }

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
