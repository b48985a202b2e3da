//! `SQLite` store.
//!
//! One connection behind a `Mutex`, WAL journaling, timestamps stored as
//! RFC 3339 UTC text so lexical order matches time order.

use super::Store;
use crate::models::{Capture, ScanSession, Spirit};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS spirits (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    object_type TEXT NOT NULL,
    personality TEXT NOT NULL,
    intro TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    child_id TEXT NOT NULL,
    child_age INTEGER NOT NULL,
    object_type TEXT NOT NULL,
    spirit_id TEXT NOT NULL,
    quiz_question TEXT NOT NULL,
    quiz_answer TEXT NOT NULL,
    fact TEXT NOT NULL,
    created_at TEXT NOT NULL,
    cache_hit INTEGER NOT NULL,
    captured INTEGER NOT NULL,
    captured_at TEXT,
    answer_given TEXT
);
CREATE TABLE IF NOT EXISTS captures (
    id TEXT PRIMARY KEY,
    child_id TEXT NOT NULL,
    spirit_id TEXT NOT NULL,
    spirit_name TEXT NOT NULL,
    object_type TEXT NOT NULL,
    fact TEXT NOT NULL,
    captured_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_captures_child ON captures (child_id, captured_at);
";

const SESSION_COLUMNS: &str = "id, child_id, child_age, object_type, spirit_id, quiz_question, \
     quiz_answer, fact, created_at, cache_hit, captured, captured_at, answer_given";

const CAPTURE_COLUMNS: &str =
    "id, child_id, spirit_id, spirit_name, object_type, fact, captured_at";

fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("cityling_sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

fn db_error(operation: &str) -> impl FnOnce(rusqlite::Error) -> Error + '_ {
    move |e| Error::operation(operation, e)
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::operation("parse_timestamp", format!("{value}: {e}")))
}

/// Columns read straight from a `spirits` row.
struct SpiritRow {
    id: String,
    name: String,
    object_type: String,
    personality: String,
    intro: String,
    created_at: String,
}

impl SpiritRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            object_type: row.get(2)?,
            personality: row.get(3)?,
            intro: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_spirit(self) -> Result<Spirit> {
        Ok(Spirit {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            name: self.name,
            object_type: self.object_type,
            personality: self.personality,
            intro: self.intro,
        })
    }
}

struct SessionRow {
    id: String,
    child_id: String,
    child_age: u32,
    object_type: String,
    spirit_id: String,
    quiz_question: String,
    quiz_answer: String,
    fact: String,
    created_at: String,
    cache_hit: bool,
    captured: bool,
    captured_at: Option<String>,
    answer_given: Option<String>,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            child_id: row.get(1)?,
            child_age: row.get(2)?,
            object_type: row.get(3)?,
            spirit_id: row.get(4)?,
            quiz_question: row.get(5)?,
            quiz_answer: row.get(6)?,
            fact: row.get(7)?,
            created_at: row.get(8)?,
            cache_hit: row.get(9)?,
            captured: row.get(10)?,
            captured_at: row.get(11)?,
            answer_given: row.get(12)?,
        })
    }

    fn into_session(self) -> Result<ScanSession> {
        Ok(ScanSession {
            created_at: parse_timestamp(&self.created_at)?,
            captured_at: self
                .captured_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            id: self.id,
            child_id: self.child_id,
            child_age: self.child_age,
            object_type: self.object_type,
            spirit_id: self.spirit_id,
            quiz_question: self.quiz_question,
            quiz_answer: self.quiz_answer,
            fact: self.fact,
            cache_hit: self.cache_hit,
            captured: self.captured,
            answer_given: self.answer_given,
        })
    }
}

struct CaptureRow {
    id: String,
    child_id: String,
    spirit_id: String,
    spirit_name: String,
    object_type: String,
    fact: String,
    captured_at: String,
}

impl CaptureRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            child_id: row.get(1)?,
            spirit_id: row.get(2)?,
            spirit_name: row.get(3)?,
            object_type: row.get(4)?,
            fact: row.get(5)?,
            captured_at: row.get(6)?,
        })
    }

    fn into_capture(self) -> Result<Capture> {
        Ok(Capture {
            captured_at: parse_timestamp(&self.captured_at)?,
            id: self.id,
            child_id: self.child_id,
            spirit_id: self.spirit_id,
            spirit_name: self.spirit_name,
            object_type: self.object_type,
            fact: self.fact,
        })
    }
}

/// `SQLite`-backed [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the directory or database cannot
    /// be created or the schema cannot be applied.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::operation("create_store_dir", e))?;
        }
        let conn = Connection::open(&db_path).map_err(db_error("open_store"))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the schema cannot be applied.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_error("open_store_memory"))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Default database location, `~/.config/cityling/cityling.db`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|d| {
            d.home_dir()
                .join(".config")
                .join("cityling")
                .join("cityling.db")
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        conn.execute_batch(SCHEMA).map_err(db_error("init_store_schema"))
    }

    fn query_captures(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Capture>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn.prepare(sql).map_err(db_error("list_captures"))?;
        let rows = stmt
            .query_map(args, CaptureRow::from_row)
            .map_err(db_error("list_captures"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error("list_captures"))?;
        rows.into_iter().map(CaptureRow::into_capture).collect()
    }
}

impl Store for SqliteStore {
    fn save_spirit(&self, spirit: &Spirit) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO spirits (id, name, object_type, personality, intro, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                spirit.id,
                spirit.name,
                spirit.object_type,
                spirit.personality,
                spirit.intro,
                timestamp(&spirit.created_at),
            ],
        )
        .map_err(db_error("save_spirit"))?;
        Ok(())
    }

    fn get_spirit(&self, id: &str) -> Result<Option<Spirit>> {
        let conn = acquire_lock(&self.conn);
        let row = conn
            .query_row(
                "SELECT id, name, object_type, personality, intro, created_at
                 FROM spirits WHERE id = ?1",
                params![id],
                SpiritRow::from_row,
            )
            .optional()
            .map_err(db_error("get_spirit"))?;
        row.map(SpiritRow::into_spirit).transpose()
    }

    fn save_session(&self, session: &ScanSession) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            &format!(
                "INSERT INTO sessions ({SESSION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                session.id,
                session.child_id,
                session.child_age,
                session.object_type,
                session.spirit_id,
                session.quiz_question,
                session.quiz_answer,
                session.fact,
                timestamp(&session.created_at),
                session.cache_hit,
                session.captured,
                session.captured_at.as_ref().map(timestamp),
                session.answer_given,
            ],
        )
        .map_err(db_error("save_session"))?;
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<ScanSession>> {
        let conn = acquire_lock(&self.conn);
        let row = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                SessionRow::from_row,
            )
            .optional()
            .map_err(db_error("get_session"))?;
        row.map(SessionRow::into_session).transpose()
    }

    fn update_session(&self, session: &ScanSession) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let updated = conn
            .execute(
                "UPDATE sessions SET child_id = ?2, child_age = ?3, object_type = ?4,
                     spirit_id = ?5, quiz_question = ?6, quiz_answer = ?7, fact = ?8,
                     created_at = ?9, cache_hit = ?10, captured = ?11, captured_at = ?12,
                     answer_given = ?13
                 WHERE id = ?1",
                params![
                    session.id,
                    session.child_id,
                    session.child_age,
                    session.object_type,
                    session.spirit_id,
                    session.quiz_question,
                    session.quiz_answer,
                    session.fact,
                    timestamp(&session.created_at),
                    session.cache_hit,
                    session.captured,
                    session.captured_at.as_ref().map(timestamp),
                    session.answer_given,
                ],
            )
            .map_err(db_error("update_session"))?;
        if updated == 0 {
            return Err(Error::SessionNotFound(session.id.clone()));
        }
        Ok(())
    }

    fn add_capture(&self, capture: &Capture) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            &format!("INSERT INTO captures ({CAPTURE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                capture.id,
                capture.child_id,
                capture.spirit_id,
                capture.spirit_name,
                capture.object_type,
                capture.fact,
                timestamp(&capture.captured_at),
            ],
        )
        .map_err(db_error("add_capture"))?;
        Ok(())
    }

    fn list_captures_by_child(&self, child_id: &str) -> Result<Vec<Capture>> {
        self.query_captures(
            &format!(
                "SELECT {CAPTURE_COLUMNS} FROM captures WHERE child_id = ?1 ORDER BY captured_at DESC"
            ),
            &[&child_id],
        )
    }

    fn list_captures_by_child_and_date(
        &self,
        child_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Capture>> {
        let day = date.format("%Y-%m-%d").to_string();
        self.query_captures(
            &format!(
                "SELECT {CAPTURE_COLUMNS} FROM captures
                 WHERE child_id = ?1 AND substr(captured_at, 1, 10) = ?2
                 ORDER BY captured_at DESC"
            ),
            &[&child_id, &day],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirit() -> Spirit {
        Spirit {
            id: "sp-1".to_string(),
            name: "邮邮".to_string(),
            object_type: "mailbox".to_string(),
            personality: "勇敢友善".to_string(),
            intro: "我是邮邮".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_spirit_round_trip_in_memory() {
        let store = SqliteStore::in_memory().unwrap();
        let spirit = spirit();
        store.save_spirit(&spirit).unwrap();
        let loaded = store.get_spirit("sp-1").unwrap().unwrap();
        assert_eq!(loaded.name, "邮邮");
        assert_eq!(
            timestamp(&loaded.created_at),
            timestamp(&spirit.created_at)
        );
        assert!(store.get_spirit("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_missing_session() {
        let store = SqliteStore::in_memory().unwrap();
        let session = ScanSession {
            id: "nope".to_string(),
            child_id: "kid".to_string(),
            child_age: 8,
            object_type: "tree".to_string(),
            spirit_id: "sp".to_string(),
            quiz_question: "q".to_string(),
            quiz_answer: "a".to_string(),
            fact: "f".to_string(),
            created_at: Utc::now(),
            cache_hit: false,
            captured: false,
            captured_at: None,
            answer_given: None,
        };
        assert!(matches!(
            store.update_session(&session),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_timestamp_is_sortable_utc() {
        let value = DateTime::parse_from_rfc3339("2026-03-01T09:00:00+08:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp(&value), "2026-03-01T01:00:00.000000Z");
        assert_eq!(parse_timestamp(&timestamp(&value)).unwrap(), value);
    }
}
