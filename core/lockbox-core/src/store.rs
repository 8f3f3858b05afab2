//! SQLite persistence for lock sessions and unlock attempts.
//!
//! This is the single-writer store backing the coordinator. The schema is
//! intentionally small: a `sessions` table holding one row per lock attempt
//! and an append-only `unlock_attempts` audit table. The single-active
//! invariant is enforced here at the storage boundary: `create` demotes any
//! stale `LOCKED` row inside the same transaction before inserting.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::PathBuf;

use crate::error::{LockboxError, Result};
use crate::session::{format_instant, parse_instant, Session, SessionStatus, UnlockAttempt};

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    /// Inserts a new `LOCKED` session and returns its id.
    ///
    /// Any session still marked `LOCKED` (left behind by an abnormal restart)
    /// is demoted to `PREMATURE` first, in the same transaction. That demotion
    /// is a consistency repair, not an override: the emergency flag stays
    /// false and no attempt row is written.
    pub fn create(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<i64> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| LockboxError::storage("begin create transaction", err))?;

            let repaired = tx
                .execute(
                    "UPDATE sessions SET status = 'PREMATURE' WHERE status = 'LOCKED'",
                    [],
                )
                .map_err(|err| LockboxError::storage("demote stale locked sessions", err))?;
            if repaired > 0 {
                tracing::warn!(repaired, "Demoted stale locked sessions before insert");
            }

            tx.execute(
                "INSERT INTO sessions \
                    (start_time, end_time, duration, status, emergency_unlocked) \
                 VALUES (?1, ?2, ?3, 'LOCKED', 0)",
                params![
                    format_instant(start_time),
                    format_instant(end_time),
                    duration_minutes
                ],
            )
            .map_err(|err| LockboxError::storage("insert session", err))?;
            let session_id = tx.last_insert_rowid();

            tx.commit()
                .map_err(|err| LockboxError::storage("commit create transaction", err))?;
            Ok(session_id)
        })
    }

    /// Returns the single `LOCKED` session, if any.
    pub fn current_locked(&self) -> Result<Option<Session>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, start_time, end_time, duration, status, emergency_unlocked \
                 FROM sessions WHERE status = 'LOCKED' ORDER BY id DESC LIMIT 1",
                [],
                session_from_row,
            )
            .optional()
            .map_err(|err| LockboxError::storage("query current locked session", err))
        })
    }

    pub fn get_session(&self, session_id: i64) -> Result<Option<Session>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, start_time, end_time, duration, status, emergency_unlocked \
                 FROM sessions WHERE id = ?1",
                params![session_id],
                session_from_row,
            )
            .optional()
            .map_err(|err| LockboxError::storage("query session by id", err))
        })
    }

    /// Marks a session `COMPLETED`. Idempotent: the guard on `LOCKED` means a
    /// second call, or a call racing an override, changes nothing and is not
    /// an error. Terminal states are never overwritten.
    pub fn mark_completed(&self, session_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE sessions SET status = 'COMPLETED' \
                 WHERE id = ?1 AND status = 'LOCKED'",
                params![session_id],
            )
            .map_err(|err| LockboxError::storage("mark session completed", err))?;
            Ok(())
        })
    }

    /// Marks a session `PREMATURE`. Same idempotence guard as
    /// [`mark_completed`](Self::mark_completed). `emergency_unlocked` is set
    /// only on the override path; the repair path in `create` leaves it false.
    pub fn mark_premature(&self, session_id: i64, emergency_unlocked: bool) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE sessions SET status = 'PREMATURE', emergency_unlocked = ?2 \
                 WHERE id = ?1 AND status = 'LOCKED'",
                params![session_id, emergency_unlocked as i64],
            )
            .map_err(|err| LockboxError::storage("mark session premature", err))?;
            Ok(())
        })
    }

    /// Appends one audit row. Never updates or deletes.
    pub fn record_attempt(&self, attempt: &UnlockAttempt) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO unlock_attempts (session_id, reason, decision, timestamp) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    attempt.session_id,
                    attempt.reason,
                    attempt.decision as i64,
                    format_instant(attempt.timestamp)
                ],
            )
            .map_err(|err| LockboxError::storage("insert unlock attempt", err))?;
            Ok(())
        })
    }

    pub fn list_attempts(&self, session_id: i64) -> Result<Vec<UnlockAttempt>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, reason, decision, timestamp \
                     FROM unlock_attempts WHERE session_id = ?1 ORDER BY id ASC",
                )
                .map_err(|err| LockboxError::storage("prepare attempts query", err))?;

            let rows = stmt
                .query_map(params![session_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|err| LockboxError::storage("read attempt rows", err))?;

            let mut attempts = Vec::new();
            for row in rows {
                let (session_id, reason, decision, timestamp) =
                    row.map_err(|err| LockboxError::storage("decode attempt row", err))?;
                let timestamp = parse_instant(&timestamp).ok_or_else(|| {
                    LockboxError::storage(
                        "parse attempt timestamp",
                        rusqlite::Error::InvalidQuery,
                    )
                })?;
                attempts.push(UnlockAttempt {
                    session_id,
                    reason,
                    decision: decision != 0,
                    timestamp,
                });
            }
            Ok(attempts)
        })
    }

    /// Counts sessions currently marked `LOCKED`. Exists for invariant checks
    /// in tests and the daemon health endpoint; always 0 or 1 in practice.
    pub fn locked_count(&self) -> Result<i64> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE status = 'LOCKED'",
                [],
                |row| row.get(0),
            )
            .map_err(|err| LockboxError::storage("count locked sessions", err))
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    start_time TEXT NOT NULL,
                    end_time TEXT NOT NULL,
                    duration INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    emergency_unlocked INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE TABLE IF NOT EXISTS unlock_attempts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id INTEGER NOT NULL,
                    reason TEXT NOT NULL,
                    decision INTEGER NOT NULL,
                    timestamp TEXT NOT NULL,
                    FOREIGN KEY(session_id) REFERENCES sessions(id)
                 );
                 COMMIT;",
            )
            .map_err(|err| LockboxError::storage("initialize schema", err))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| LockboxError::io("create store data dir", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| LockboxError::storage("open sqlite db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| LockboxError::storage("enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| LockboxError::storage("set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| LockboxError::storage("set busy_timeout", err))?;

        Ok(conn)
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let start_time: String = row.get(1)?;
    let end_time: String = row.get(2)?;
    let status: String = row.get(4)?;
    let emergency_unlocked: i64 = row.get(5)?;

    let parse = |value: &str, index: usize| {
        parse_instant(value).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(
                index,
                "timestamp".to_string(),
                rusqlite::types::Type::Text,
            )
        })
    };

    Ok(Session {
        id: row.get(0)?,
        start_time: parse(&start_time, 1)?,
        end_time: parse(&end_time, 2)?,
        duration_minutes: row.get(3)?,
        status: SessionStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(
                4,
                "status".to_string(),
                rusqlite::types::Type::Text,
            )
        })?,
        emergency_unlocked: emergency_unlocked != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_store() -> (tempfile::TempDir, SessionStore) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SessionStore::new(temp_dir.path().join("lockbox.db")).expect("store init");
        (temp_dir, store)
    }

    fn create_session(store: &SessionStore, minutes: i64) -> i64 {
        let start = Utc::now();
        store
            .create(start, start + Duration::minutes(minutes), minutes)
            .expect("create session")
    }

    #[test]
    fn create_returns_locked_session() {
        let (_guard, store) = test_store();
        let id = create_session(&store, 25);

        let session = store.current_locked().expect("query").expect("session");
        assert_eq!(session.id, id);
        assert_eq!(session.status, SessionStatus::Locked);
        assert_eq!(session.duration_minutes, 25);
        assert!(!session.emergency_unlocked);
    }

    #[test]
    fn create_demotes_stale_locked_session_without_emergency_flag() {
        let (_guard, store) = test_store();
        let stale = create_session(&store, 10);
        let fresh = create_session(&store, 5);

        assert_eq!(store.locked_count().expect("count"), 1);
        let current = store.current_locked().expect("query").expect("session");
        assert_eq!(current.id, fresh);

        let repaired = store.get_session(stale).expect("query").expect("session");
        assert_eq!(repaired.status, SessionStatus::Premature);
        assert!(!repaired.emergency_unlocked);
        assert!(store.list_attempts(stale).expect("attempts").is_empty());
    }

    #[test]
    fn mark_completed_is_idempotent() {
        let (_guard, store) = test_store();
        let id = create_session(&store, 1);

        store.mark_completed(id).expect("first mark");
        store.mark_completed(id).expect("second mark");

        let session = store.get_session(id).expect("query").expect("session");
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn terminal_states_are_never_overwritten() {
        let (_guard, store) = test_store();
        let id = create_session(&store, 1);

        store.mark_premature(id, true).expect("premature");
        store.mark_completed(id).expect("completed no-op");

        let session = store.get_session(id).expect("query").expect("session");
        assert_eq!(session.status, SessionStatus::Premature);
        assert!(session.emergency_unlocked);
    }

    #[test]
    fn attempts_append_in_order() {
        let (_guard, store) = test_store();
        let id = create_session(&store, 30);
        let now = Utc::now();

        for (reason, decision) in [("只是覺得無聊", false), ("我生病了需要去醫院", true)] {
            store
                .record_attempt(&UnlockAttempt {
                    session_id: id,
                    reason: reason.to_string(),
                    decision,
                    timestamp: now,
                })
                .expect("record attempt");
        }

        let attempts = store.list_attempts(id).expect("attempts");
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].decision);
        assert!(attempts[1].decision);
        assert_eq!(attempts[1].reason, "我生病了需要去醫院");
    }
}
