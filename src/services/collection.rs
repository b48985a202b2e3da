//! Collection queries: pokedex, badges, and daily reports.

use super::badges::BadgeMatcher;
use super::scan::normalize_child_id;
use crate::Result;
use crate::models::{DailyReport, PokedexBadge, PokedexEntry};
use crate::storage::Store;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::instrument;

/// Read-only views over a child's captures.
pub struct CollectionService {
    store: Arc<dyn Store>,
    badges: Arc<BadgeMatcher>,
}

impl CollectionService {
    /// Creates a service with the built-in badges.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            badges: Arc::new(BadgeMatcher::default()),
        }
    }

    /// Replaces the badge matcher.
    #[must_use]
    pub fn with_badges(mut self, badges: Arc<BadgeMatcher>) -> Self {
        self.badges = badges;
        self
    }

    /// Captures aggregated per spirit, most recently seen first.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    #[instrument(skip(self))]
    pub fn pokedex(&self, child_id: &str) -> Result<Vec<PokedexEntry>> {
        let child_id = normalize_child_id(child_id);
        let captures = self.store.list_captures_by_child(&child_id)?;

        let mut entries: HashMap<&str, PokedexEntry> = HashMap::new();
        for capture in &captures {
            let entry = entries
                .entry(capture.spirit_id.as_str())
                .or_insert_with(|| PokedexEntry {
                    spirit_id: capture.spirit_id.clone(),
                    spirit_name: capture.spirit_name.clone(),
                    object_type: capture.object_type.clone(),
                    captures: 0,
                    last_seen_at: capture.captured_at,
                });
            entry.captures += 1;
            if capture.captured_at > entry.last_seen_at {
                entry.last_seen_at = capture.captured_at;
            }
        }

        let mut entries: Vec<PokedexEntry> = entries.into_values().collect();
        entries.sort_by(|a, b| {
            b.last_seen_at
                .cmp(&a.last_seen_at)
                .then_with(|| a.spirit_id.cmp(&b.spirit_id))
        });
        tracing::debug!(child_id = %child_id, spirits = entries.len(), "Built pokedex");
        Ok(entries)
    }

    /// Badge progress for a child, ordered by category.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    #[instrument(skip(self))]
    pub fn pokedex_badges(&self, child_id: &str) -> Result<Vec<PokedexBadge>> {
        let child_id = normalize_child_id(child_id);
        let captures = self.store.list_captures_by_child(&child_id)?;
        Ok(self.badges.progress(&captures))
    }

    /// Summary of one UTC day's captures.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    #[instrument(skip(self))]
    pub fn daily_report(&self, child_id: &str, date: NaiveDate) -> Result<DailyReport> {
        let child_id = normalize_child_id(child_id);
        let captures = self.store.list_captures_by_child_and_date(&child_id, date)?;

        let knowledge_points: Vec<String> = captures
            .iter()
            .map(|capture| capture.fact.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let generated_text = format!(
            "今天 {child_id} 共收集了 {} 个精灵，学习了 {} 条知识点。",
            captures.len(),
            knowledge_points.len()
        );

        Ok(DailyReport {
            date,
            total_captured: captures.len(),
            child_id,
            captures,
            knowledge_points,
            generated_text,
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Capture;
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn capture(id: &str, spirit_id: &str, fact: &str, at: chrono::DateTime<Utc>) -> Capture {
        Capture {
            id: id.to_string(),
            child_id: "guest".to_string(),
            spirit_id: spirit_id.to_string(),
            spirit_name: format!("name-{spirit_id}"),
            object_type: "tree".to_string(),
            fact: fact.to_string(),
            captured_at: at,
        }
    }

    fn seeded() -> CollectionService {
        let store = Arc::new(MemoryStore::new());
        let day = Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap();
        store.add_capture(&capture("c1", "sp1", "b", day)).unwrap();
        store
            .add_capture(&capture("c2", "sp2", "a", day + Duration::hours(1)))
            .unwrap();
        store
            .add_capture(&capture("c3", "sp1", "b", day + Duration::hours(2)))
            .unwrap();
        store
            .add_capture(&capture("c4", "sp2", "c", day + Duration::days(1)))
            .unwrap();
        CollectionService::new(store)
    }

    #[test]
    fn test_pokedex_aggregates_per_spirit() {
        let entries = seeded().pokedex("").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].spirit_id, "sp2");
        assert_eq!(entries[0].captures, 2);
        assert_eq!(entries[1].spirit_id, "sp1");
        assert_eq!(entries[1].captures, 2);
        assert!(entries[0].last_seen_at > entries[1].last_seen_at);
    }

    #[test]
    fn test_daily_report_dedupes_facts() {
        let date = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
        let report = seeded().daily_report("  ", date).unwrap();
        assert_eq!(report.child_id, "guest");
        assert_eq!(report.total_captured, 3);
        assert_eq!(report.knowledge_points, vec!["a", "b"]);
        assert_eq!(
            report.generated_text,
            "今天 guest 共收集了 3 个精灵，学习了 2 条知识点。"
        );
    }

    #[test]
    fn test_empty_child_has_locked_badges() {
        let badges = seeded().pokedex_badges("nobody").unwrap();
        assert!(!badges.is_empty());
        assert!(badges.iter().all(|b| !b.unlocked && b.progress == 0));
    }
}
