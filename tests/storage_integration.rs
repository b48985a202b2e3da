//! Store contract tests.
//!
//! Runs the same scenarios against `MemoryStore` and `SqliteStore` so both
//! implementations stay interchangeable behind `Arc<dyn Store>`.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use cityling::models::{Capture, ScanSession, Spirit};
use cityling::storage::{MemoryStore, SqliteStore, Store};
use cityling::{Error, ErrorKind};
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0).unwrap()
}

fn spirit(id: &str, name: &str) -> Spirit {
    Spirit {
        id: id.to_string(),
        name: name.to_string(),
        object_type: "tree".to_string(),
        personality: "勇敢友善".to_string(),
        intro: format!("我是{name}"),
        created_at: at(1, 9),
    }
}

fn session(id: &str, child_id: &str) -> ScanSession {
    ScanSession {
        id: id.to_string(),
        child_id: child_id.to_string(),
        child_age: 8,
        object_type: "tree".to_string(),
        spirit_id: "spirit_1".to_string(),
        quiz_question: "树叶会放出什么气体？".to_string(),
        quiz_answer: "氧气".to_string(),
        fact: "树叶会放出氧气".to_string(),
        created_at: at(2, 9),
        cache_hit: false,
        captured: false,
        captured_at: None,
        answer_given: None,
    }
}

fn capture(id: &str, child_id: &str, captured_at: DateTime<Utc>) -> Capture {
    Capture {
        id: id.to_string(),
        child_id: child_id.to_string(),
        spirit_id: "spirit_1".to_string(),
        spirit_name: "木木".to_string(),
        object_type: "tree".to_string(),
        fact: "树叶会放出氧气".to_string(),
        captured_at,
    }
}

fn with_each_store(scenario: impl Fn(&dyn Store)) {
    let memory = MemoryStore::new();
    scenario(&memory);

    let in_memory = SqliteStore::in_memory().expect("Failed to open in-memory sqlite");
    scenario(&in_memory);

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let file = SqliteStore::open(temp_dir.path().join("store.db")).expect("Failed to open sqlite");
    scenario(&file);
}

// ============================================================================
// Contract
// ============================================================================

#[test]
fn test_spirit_upsert_and_lookup() {
    with_each_store(|store| {
        assert!(store.get_spirit("spirit_1").unwrap().is_none());

        store.save_spirit(&spirit("spirit_1", "木木")).unwrap();
        store.save_spirit(&spirit("spirit_1", "叶叶")).unwrap();

        let loaded = store.get_spirit("spirit_1").unwrap().unwrap();
        assert_eq!(loaded.name, "叶叶");
        assert_eq!(loaded.created_at, at(1, 9));
    });
}

#[test]
fn test_session_update_round_trip() {
    with_each_store(|store| {
        store.save_session(&session("sess_1", "kid")).unwrap();
        assert_eq!(
            store.get_session("sess_1").unwrap().unwrap(),
            session("sess_1", "kid")
        );

        let mut updated = session("sess_1", "kid");
        updated.captured = true;
        updated.captured_at = Some(at(2, 10));
        updated.answer_given = Some("氧气".to_string());
        store.update_session(&updated).unwrap();

        assert_eq!(store.get_session("sess_1").unwrap().unwrap(), updated);
        assert!(store.get_session("sess_2").unwrap().is_none());
    });
}

#[test]
fn test_update_missing_session_is_not_found() {
    with_each_store(|store| {
        let err = store.update_session(&session("ghost", "kid")).unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(ref id) if id == "ghost"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    });
}

#[test]
fn test_captures_by_child_newest_first() {
    with_each_store(|store| {
        store.add_capture(&capture("c1", "kid", at(2, 8))).unwrap();
        store.add_capture(&capture("c2", "kid", at(3, 8))).unwrap();
        store.add_capture(&capture("c3", "other", at(3, 9))).unwrap();
        store.add_capture(&capture("c4", "kid", at(2, 20))).unwrap();

        let ids: Vec<String> = store
            .list_captures_by_child("kid")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["c2", "c4", "c1"]);
        assert!(store.list_captures_by_child("nobody").unwrap().is_empty());
    });
}

#[test]
fn test_captures_by_utc_day() {
    with_each_store(|store| {
        let day = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
        let midnight = at(2, 0);

        store.add_capture(&capture("before", "kid", midnight - Duration::seconds(1))).unwrap();
        store.add_capture(&capture("start", "kid", midnight)).unwrap();
        store
            .add_capture(&capture("end", "kid", midnight + Duration::hours(24) - Duration::seconds(1)))
            .unwrap();
        store.add_capture(&capture("after", "kid", midnight + Duration::hours(24))).unwrap();

        let ids: Vec<String> = store
            .list_captures_by_child_and_date("kid", day)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["end", "start"]);
    });
}

#[test]
fn test_sqlite_creates_parent_directories() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("nested").join("deeper").join("c.db");

    let store = SqliteStore::open(&path).expect("Failed to open sqlite");
    assert_eq!(store.db_path(), path.as_path());
    assert!(path.exists());
}
