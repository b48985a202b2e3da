//! In-memory store.
//!
//! Default backend for tests and single-process runs. Nothing survives a
//! restart.

use super::Store;
use crate::models::{Capture, ScanSession, Spirit};
use crate::{Error, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    spirits: HashMap<String, Spirit>,
    sessions: HashMap<String, ScanSession>,
    captures: Vec<Capture>,
}

/// `RwLock`-guarded maps implementing [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Memory store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Memory store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Number of stored captures.
    #[must_use]
    pub fn capture_count(&self) -> usize {
        self.read().captures.len()
    }
}

fn newest_first(mut captures: Vec<Capture>) -> Vec<Capture> {
    captures.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
    captures
}

impl Store for MemoryStore {
    fn save_spirit(&self, spirit: &Spirit) -> Result<()> {
        self.write()
            .spirits
            .insert(spirit.id.clone(), spirit.clone());
        Ok(())
    }

    fn get_spirit(&self, id: &str) -> Result<Option<Spirit>> {
        Ok(self.read().spirits.get(id).cloned())
    }

    fn save_session(&self, session: &ScanSession) -> Result<()> {
        self.write()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<ScanSession>> {
        Ok(self.read().sessions.get(id).cloned())
    }

    fn update_session(&self, session: &ScanSession) -> Result<()> {
        let mut tables = self.write();
        match tables.sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            },
            None => Err(Error::SessionNotFound(session.id.clone())),
        }
    }

    fn add_capture(&self, capture: &Capture) -> Result<()> {
        self.write().captures.push(capture.clone());
        Ok(())
    }

    fn list_captures_by_child(&self, child_id: &str) -> Result<Vec<Capture>> {
        let captures = self
            .read()
            .captures
            .iter()
            .filter(|c| c.child_id == child_id)
            .cloned()
            .collect();
        Ok(newest_first(captures))
    }

    fn list_captures_by_child_and_date(
        &self,
        child_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Capture>> {
        let captures = self
            .read()
            .captures
            .iter()
            .filter(|c| c.child_id == child_id && c.captured_at.date_naive() == date)
            .cloned()
            .collect();
        Ok(newest_first(captures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn session(id: &str) -> ScanSession {
        ScanSession {
            id: id.to_string(),
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
        }
    }

    fn capture(id: &str, child_id: &str, at: chrono::DateTime<Utc>) -> Capture {
        Capture {
            id: id.to_string(),
            child_id: child_id.to_string(),
            spirit_id: "sp".to_string(),
            spirit_name: "木木".to_string(),
            object_type: "tree".to_string(),
            fact: "f".to_string(),
            captured_at: at,
        }
    }

    #[test]
    fn test_update_unknown_session_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update_session(&session("missing")),
            Err(Error::SessionNotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_update_replaces_session() {
        let store = MemoryStore::new();
        store.save_session(&session("s1")).unwrap();
        let mut updated = session("s1");
        updated.captured = true;
        store.update_session(&updated).unwrap();
        assert!(store.get_session("s1").unwrap().unwrap().captured);
    }

    #[test]
    fn test_captures_filtered_and_sorted() {
        let store = MemoryStore::new();
        let day = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        store.add_capture(&capture("c1", "kid", day)).unwrap();
        store
            .add_capture(&capture("c2", "kid", day + Duration::hours(2)))
            .unwrap();
        store
            .add_capture(&capture("c3", "kid", day + Duration::days(1)))
            .unwrap();
        store.add_capture(&capture("c4", "other", day)).unwrap();

        let all: Vec<String> = store
            .list_captures_by_child("kid")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(all, vec!["c3", "c2", "c1"]);

        let on_day: Vec<String> = store
            .list_captures_by_child_and_date("kid", day.date_naive())
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(on_day, vec!["c2", "c1"]);
        assert_eq!(store.capture_count(), 4);
    }
}
