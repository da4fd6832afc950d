use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};

use colloquy_core::types::{
    InvocationStatus, MessageRecord, Participant, Session, ToolInvocationRecord, Turn, TurnStatus,
};

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// Pagination bounds for owner listings.
const LIST_LIMIT_MAX: usize = 100;
const LIST_LIMIT_DEFAULT: usize = 10;

/// Thread-safe store for sessions and everything they own.
///
/// Wraps a single SQLite connection in a `Mutex`. For high-concurrency
/// deployments consider a connection pool, but a Mutex is sufficient for a
/// single-node engine and keeps the per-key linearizability the dialogue
/// manager relies on.
pub struct SessionStore {
    db: Mutex<Connection>,
}

impl SessionStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store, mainly for tests and ephemeral deployments.
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    // --- sessions ----------------------------------------------------------

    #[instrument(skip(self, session), fields(id = %session.id))]
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions
             (id, owner_id, kind, participants, tags, created_at, last_activity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                session.id,
                session.owner_id,
                session.kind.to_string(),
                serde_json::to_string(&session.participants)?,
                serde_json::to_string(&session.tags)?,
                session.created_at.to_rfc3339(),
                session.last_activity.to_rfc3339(),
            ],
        )?;
        debug!("session created");
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, owner_id, kind, participants, tags, created_at, last_activity
             FROM sessions WHERE id = ?1",
            rusqlite::params![id],
            row_to_session,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                entity: "session",
                id: id.to_string(),
            },
            other => StoreError::Database(other),
        })
    }

    /// List a user's sessions, most recently active first. `limit` is clamped
    /// to 1..=100 (default 10); `offset` skips from the head of the ordering.
    #[instrument(skip(self))]
    pub fn list_for_owner(
        &self,
        owner_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Session>> {
        let limit = limit.unwrap_or(LIST_LIMIT_DEFAULT).clamp(1, LIST_LIMIT_MAX);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, owner_id, kind, participants, tags, created_at, last_activity
             FROM sessions
             WHERE owner_id = ?1
             ORDER BY last_activity DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![owner_id, limit as i64, offset as i64],
            row_to_session,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Advance `last_activity`. The guard keeps it monotonically
    /// non-decreasing even if callers race with skewed clocks.
    pub fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET last_activity = ?1
             WHERE id = ?2 AND last_activity <= ?1",
            rusqlite::params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Delete a session and cascade to its turns, messages, and invocations.
    #[instrument(skip(self))]
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE turn_id IN
                 (SELECT id FROM turns WHERE session_id = ?1)",
            rusqlite::params![id],
        )?;
        tx.execute(
            "DELETE FROM tool_invocations WHERE turn_id IN
                 (SELECT id FROM turns WHERE session_id = ?1)",
            rusqlite::params![id],
        )?;
        tx.execute("DELETE FROM turns WHERE session_id = ?1", rusqlite::params![id])?;
        let n = tx.execute("DELETE FROM sessions WHERE id = ?1", rusqlite::params![id])?;
        tx.commit()?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: id.to_string(),
            });
        }
        debug!("session deleted with cascade");
        Ok(())
    }

    // --- turns -------------------------------------------------------------

    /// Next dense ordinal for a session (prior max + 1, starting at 0).
    pub fn next_ordinal(&self, session_id: &str) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let next: i64 = db.query_row(
            "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM turns WHERE session_id = ?1",
            rusqlite::params![session_id],
            |row| row.get(0),
        )?;
        Ok(next as u64)
    }

    pub fn create_turn(&self, turn: &Turn) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO turns
             (id, session_id, ordinal, initiator_id, initiator_kind,
              responder_id, responder_kind, status, started_at, ended_at, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                turn.id,
                turn.session_id,
                turn.ordinal as i64,
                turn.initiator_id,
                turn.initiator_kind.to_string(),
                turn.responder_id,
                turn.responder_kind.to_string(),
                turn.status.to_string(),
                turn.started_at.to_rfc3339(),
                turn.ended_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&turn.tags)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_turn(&self, id: &str) -> Result<Turn> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, session_id, ordinal, initiator_id, initiator_kind,
                    responder_id, responder_kind, status, started_at, ended_at, tags
             FROM turns WHERE id = ?1",
            rusqlite::params![id],
            row_to_turn,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                entity: "turn",
                id: id.to_string(),
            },
            other => StoreError::Database(other),
        })
    }

    pub fn list_turns(&self, session_id: &str) -> Result<Vec<Turn>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_id, ordinal, initiator_id, initiator_kind,
                    responder_id, responder_kind, status, started_at, ended_at, tags
             FROM turns WHERE session_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id], row_to_turn)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Move a turn through its one-way state machine, optionally stamping the
    /// end time. Rejects transitions the machine does not allow.
    #[instrument(skip(self))]
    pub fn set_turn_status(
        &self,
        id: &str,
        next: TurnStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let current = self.get_turn(id)?.status;
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE turns SET status = ?1, ended_at = COALESCE(?2, ended_at) WHERE id = ?3",
            rusqlite::params![next.to_string(), ended_at.map(|t| t.to_rfc3339()), id],
        )?;
        Ok(())
    }

    // --- messages ----------------------------------------------------------

    pub fn append_message(&self, msg: &MessageRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages
             (id, turn_id, direction, content, kind, sender_id, sender_kind, created_at, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                msg.id,
                msg.turn_id,
                msg.direction.to_string(),
                msg.content,
                msg.kind.to_string(),
                msg.sender_id,
                msg.sender_kind.to_string(),
                msg.created_at.to_rfc3339(),
                serde_json::to_string(&msg.tags)?,
            ],
        )?;
        Ok(())
    }

    pub fn list_messages_for_turn(&self, turn_id: &str) -> Result<Vec<MessageRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, turn_id, direction, content, kind, sender_id, sender_kind,
                    created_at, tags
             FROM messages WHERE turn_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![turn_id], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The last `limit` messages of a session, oldest first.
    pub fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT m.id, m.turn_id, m.direction, m.content, m.kind, m.sender_id,
                    m.sender_kind, m.created_at, m.tags
             FROM messages m JOIN turns t ON m.turn_id = t.id
             WHERE t.session_id = ?1
             ORDER BY t.ordinal DESC, m.created_at DESC, m.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id, limit as i64], row_to_message)?;
        let mut msgs: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        msgs.reverse();
        Ok(msgs)
    }

    // --- tool invocations --------------------------------------------------

    pub fn record_invocation(&self, inv: &ToolInvocationRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tool_invocations
             (id, turn_id, tool_name, tool_version, args, status, result, error,
              created_at, completed_at, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                inv.id,
                inv.turn_id,
                inv.tool_name,
                inv.tool_version,
                serde_json::to_string(&inv.args)?,
                inv.status.to_string(),
                inv.result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                inv.error,
                inv.created_at.to_rfc3339(),
                inv.completed_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&inv.tags)?,
            ],
        )?;
        Ok(())
    }

    pub fn update_invocation(
        &self,
        id: &str,
        status: InvocationStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE tool_invocations
             SET status = ?1,
                 result = COALESCE(?2, result),
                 error = COALESCE(?3, error),
                 completed_at = COALESCE(?4, completed_at)
             WHERE id = ?5",
            rusqlite::params![
                status.to_string(),
                result.map(serde_json::to_string).transpose()?,
                error,
                completed_at.map(|t| t.to_rfc3339()),
                id
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "tool_invocation",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn list_invocations(&self, turn_id: &str) -> Result<Vec<ToolInvocationRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, turn_id, tool_name, tool_version, args, status, result, error,
                    created_at, completed_at, tags
             FROM tool_invocations WHERE turn_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![turn_id], row_to_invocation)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Invocations still pending or running for a turn. Must be 0 once the
    /// turn is terminal.
    pub fn count_open_invocations(&self, turn_id: &str) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM tool_invocations
             WHERE turn_id = ?1 AND status IN ('pending', 'running')",
            rusqlite::params![turn_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

// --- row mappers -----------------------------------------------------------

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let kind_str: String = row.get(2)?;
    let participants_json: String = row.get(3)?;
    let tags_json: String = row.get(4)?;
    let created: String = row.get(5)?;
    let last: String = row.get(6)?;
    let participants: Vec<Participant> =
        serde_json::from_str(&participants_json).unwrap_or_default();
    Ok(Session {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        kind: kind_str
            .parse()
            .unwrap_or(colloquy_core::types::DialogueKind::HumanAiPrivate),
        participants,
        created_at: parse_ts(&created),
        last_activity: parse_ts(&last),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<Turn> {
    let initiator_kind: String = row.get(4)?;
    let responder_kind: String = row.get(6)?;
    let status: String = row.get(7)?;
    let started: String = row.get(8)?;
    let ended: Option<String> = row.get(9)?;
    let tags_json: String = row.get(10)?;
    Ok(Turn {
        id: row.get(0)?,
        session_id: row.get(1)?,
        ordinal: row.get::<_, i64>(2)? as u64,
        initiator_id: row.get(3)?,
        initiator_kind: colloquy_core::types::ParticipantKind::from_str(&initiator_kind)
            .unwrap_or(colloquy_core::types::ParticipantKind::Human),
        responder_id: row.get(5)?,
        responder_kind: colloquy_core::types::ParticipantKind::from_str(&responder_kind)
            .unwrap_or(colloquy_core::types::ParticipantKind::Ai),
        status: status.parse().unwrap_or(TurnStatus::Pending),
        started_at: parse_ts(&started),
        ended_at: ended.as_deref().map(parse_ts),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let direction: String = row.get(2)?;
    let kind: String = row.get(4)?;
    let sender_kind: String = row.get(6)?;
    let created: String = row.get(7)?;
    let tags_json: String = row.get(8)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        turn_id: row.get(1)?,
        direction: direction
            .parse()
            .unwrap_or(colloquy_core::types::MessageDirection::Request),
        content: row.get(3)?,
        kind: kind.parse().unwrap_or(colloquy_core::types::MessageKind::Text),
        sender_id: row.get(5)?,
        sender_kind: colloquy_core::types::ParticipantKind::from_str(&sender_kind)
            .unwrap_or(colloquy_core::types::ParticipantKind::Human),
        created_at: parse_ts(&created),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

fn row_to_invocation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolInvocationRecord> {
    let args_json: String = row.get(4)?;
    let status: String = row.get(5)?;
    let result_json: Option<String> = row.get(6)?;
    let created: String = row.get(8)?;
    let completed: Option<String> = row.get(9)?;
    let tags_json: String = row.get(10)?;
    Ok(ToolInvocationRecord {
        id: row.get(0)?,
        turn_id: row.get(1)?,
        tool_name: row.get(2)?,
        tool_version: row.get(3)?,
        args: serde_json::from_str(&args_json).unwrap_or(serde_json::Value::Null),
        status: status.parse().unwrap_or(InvocationStatus::Pending),
        result: result_json.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        error: row.get(7)?,
        created_at: parse_ts(&created),
        completed_at: completed.as_deref().map(parse_ts),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use colloquy_core::types::{
        DialogueKind, MessageDirection, MessageKind, Participant, ParticipantKind,
    };
    use uuid::Uuid;

    fn store() -> SessionStore {
        SessionStore::in_memory().unwrap()
    }

    fn sample_session(owner: &str) -> Session {
        Session::new(
            owner,
            DialogueKind::HumanAiPrivate,
            vec![
                Participant::new(owner, "User", ParticipantKind::Human),
                Participant::new("assistant", "Assistant", ParticipantKind::Ai),
            ],
        )
    }

    fn sample_turn(session_id: &str, ordinal: u64) -> Turn {
        Turn {
            id: Uuid::now_v7().to_string(),
            session_id: session_id.to_string(),
            ordinal,
            initiator_id: "u1".into(),
            initiator_kind: ParticipantKind::Human,
            responder_id: "assistant".into(),
            responder_kind: ParticipantKind::Ai,
            status: TurnStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            tags: Default::default(),
        }
    }

    #[test]
    fn session_roundtrip() {
        let s = store();
        let session = sample_session("u1");
        s.create_session(&session).unwrap();
        let loaded = s.get_session(&session.id).unwrap();
        assert_eq!(loaded.owner_id, "u1");
        assert_eq!(loaded.kind, DialogueKind::HumanAiPrivate);
        assert_eq!(loaded.participants.len(), 2);
    }

    #[test]
    fn unknown_session_is_not_found() {
        let s = store();
        assert!(matches!(
            s.get_session("nope"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn ordinals_are_dense() {
        let s = store();
        let session = sample_session("u1");
        s.create_session(&session).unwrap();
        for expected in 0..4u64 {
            let ord = s.next_ordinal(&session.id).unwrap();
            assert_eq!(ord, expected);
            s.create_turn(&sample_turn(&session.id, ord)).unwrap();
        }
        let turns = s.list_turns(&session.id).unwrap();
        let ordinals: Vec<u64> = turns.iter().map(|t| t.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
    }

    #[test]
    fn turn_transitions_are_one_way() {
        let s = store();
        let session = sample_session("u1");
        s.create_session(&session).unwrap();
        let turn = sample_turn(&session.id, 0);
        s.create_turn(&turn).unwrap();

        s.set_turn_status(&turn.id, TurnStatus::InProgress, None)
            .unwrap();
        s.set_turn_status(&turn.id, TurnStatus::Completed, Some(Utc::now()))
            .unwrap();
        let err = s.set_turn_status(&turn.id, TurnStatus::InProgress, None);
        assert!(matches!(err, Err(StoreError::InvalidTransition { .. })));
    }

    #[test]
    fn touch_never_moves_backwards() {
        let s = store();
        let session = sample_session("u1");
        s.create_session(&session).unwrap();
        let later = session.last_activity + Duration::seconds(30);
        s.touch_session(&session.id, later).unwrap();
        s.touch_session(&session.id, later - Duration::seconds(60))
            .unwrap();
        let loaded = s.get_session(&session.id).unwrap();
        assert_eq!(loaded.last_activity.timestamp(), later.timestamp());
    }

    #[test]
    fn delete_cascades_to_children() {
        let s = store();
        let session = sample_session("u1");
        s.create_session(&session).unwrap();
        let turn = sample_turn(&session.id, 0);
        s.create_turn(&turn).unwrap();
        s.append_message(&MessageRecord {
            id: Uuid::now_v7().to_string(),
            turn_id: turn.id.clone(),
            direction: MessageDirection::Request,
            content: "hello".into(),
            kind: MessageKind::Text,
            sender_id: "u1".into(),
            sender_kind: ParticipantKind::Human,
            created_at: Utc::now(),
            tags: Default::default(),
        })
        .unwrap();

        s.delete_session(&session.id).unwrap();
        assert!(s.get_session(&session.id).is_err());
        assert!(s.list_messages_for_turn(&turn.id).unwrap().is_empty());
    }

    #[test]
    fn owner_listing_is_paginated_and_clamped() {
        let s = store();
        for _ in 0..15 {
            s.create_session(&sample_session("u1")).unwrap();
        }
        s.create_session(&sample_session("u2")).unwrap();

        assert_eq!(s.list_for_owner("u1", None, 0).unwrap().len(), 10);
        assert_eq!(s.list_for_owner("u1", Some(500), 0).unwrap().len(), 15);
        assert_eq!(s.list_for_owner("u1", Some(10), 10).unwrap().len(), 5);
        assert_eq!(s.list_for_owner("u2", None, 0).unwrap().len(), 1);
    }

    #[test]
    fn recent_messages_preserve_order() {
        let s = store();
        let session = sample_session("u1");
        s.create_session(&session).unwrap();
        let base = Utc::now();
        for i in 0..3u64 {
            let turn = sample_turn(&session.id, i);
            s.create_turn(&turn).unwrap();
            for (j, dir) in [MessageDirection::Request, MessageDirection::Response]
                .into_iter()
                .enumerate()
            {
                s.append_message(&MessageRecord {
                    id: Uuid::now_v7().to_string(),
                    turn_id: turn.id.clone(),
                    direction: dir,
                    content: format!("m{i}-{j}"),
                    kind: MessageKind::Text,
                    sender_id: "u1".into(),
                    sender_kind: ParticipantKind::Human,
                    created_at: base + Duration::seconds((i * 2 + j as u64) as i64),
                    tags: Default::default(),
                })
                .unwrap();
            }
        }
        let recent = s.recent_messages(&session.id, 4).unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1-0", "m1-1", "m2-0", "m2-1"]);
    }

    #[test]
    fn invocation_lifecycle_and_open_count() {
        let s = store();
        let session = sample_session("u1");
        s.create_session(&session).unwrap();
        let turn = sample_turn(&session.id, 0);
        s.create_turn(&turn).unwrap();

        let inv = ToolInvocationRecord {
            id: Uuid::now_v7().to_string(),
            turn_id: turn.id.clone(),
            tool_name: "calculator".into(),
            tool_version: Some("2.0.0".into()),
            args: serde_json::json!({"expression": "1+2"}),
            status: InvocationStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            tags: Default::default(),
        };
        s.record_invocation(&inv).unwrap();
        assert_eq!(s.count_open_invocations(&turn.id).unwrap(), 1);

        s.update_invocation(&inv.id, InvocationStatus::Running, None, None, None)
            .unwrap();
        s.update_invocation(
            &inv.id,
            InvocationStatus::Completed,
            Some(&serde_json::json!("3")),
            None,
            Some(Utc::now()),
        )
        .unwrap();
        assert_eq!(s.count_open_invocations(&turn.id).unwrap(), 0);

        let listed = s.list_invocations(&turn.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, InvocationStatus::Completed);
        assert!(listed[0].completed_at.is_some());
    }
}
