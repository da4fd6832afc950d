use rusqlite::{Connection, Result};

/// Initialise dialogue tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_sessions_table(conn)?;
    create_turns_table(conn)?;
    create_messages_table(conn)?;
    create_invocations_table(conn)?;
    Ok(())
}

fn create_sessions_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id            TEXT PRIMARY KEY,
            owner_id      TEXT NOT NULL,
            kind          TEXT NOT NULL,
            participants  TEXT NOT NULL,
            tags          TEXT NOT NULL DEFAULT '{}',
            created_at    TEXT NOT NULL,
            last_activity TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_owner
            ON sessions(owner_id, last_activity DESC);",
    )
}

fn create_turns_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS turns (
            id             TEXT PRIMARY KEY,
            session_id     TEXT NOT NULL,
            ordinal        INTEGER NOT NULL,
            initiator_id   TEXT NOT NULL,
            initiator_kind TEXT NOT NULL,
            responder_id   TEXT NOT NULL,
            responder_kind TEXT NOT NULL,
            status         TEXT NOT NULL,
            started_at     TEXT NOT NULL,
            ended_at       TEXT,
            tags           TEXT NOT NULL DEFAULT '{}',
            UNIQUE(session_id, ordinal)
        );
        CREATE INDEX IF NOT EXISTS idx_turns_session
            ON turns(session_id, ordinal);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            turn_id     TEXT NOT NULL,
            direction   TEXT NOT NULL,
            content     TEXT NOT NULL,
            kind        TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            sender_kind TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            tags        TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_messages_turn
            ON messages(turn_id, created_at);",
    )
}

fn create_invocations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tool_invocations (
            id           TEXT PRIMARY KEY,
            turn_id      TEXT NOT NULL,
            tool_name    TEXT NOT NULL,
            tool_version TEXT,
            args         TEXT NOT NULL,
            status       TEXT NOT NULL,
            result       TEXT,
            error        TEXT,
            created_at   TEXT NOT NULL,
            completed_at TEXT,
            tags         TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_invocations_turn
            ON tool_invocations(turn_id, created_at);",
    )
}
