//! Persistence contract for scan state.

use crate::Result;
use crate::models::{Capture, ScanSession, Spirit};
use chrono::NaiveDate;

/// Persistence for spirits, scan sessions, and captures.
///
/// Implementations use interior mutability so a single store can be shared
/// across services behind an `Arc`. Errors propagate to callers unchanged.
pub trait Store: Send + Sync {
    /// Inserts or replaces a spirit.
    fn save_spirit(&self, spirit: &Spirit) -> Result<()>;

    /// Retrieves a spirit by ID.
    fn get_spirit(&self, id: &str) -> Result<Option<Spirit>>;

    /// Inserts a new scan session.
    fn save_session(&self, session: &ScanSession) -> Result<()>;

    /// Retrieves a scan session by ID.
    fn get_session(&self, id: &str) -> Result<Option<ScanSession>>;

    /// Replaces an existing scan session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SessionNotFound`] when no session has this ID.
    fn update_session(&self, session: &ScanSession) -> Result<()>;

    /// Appends a capture.
    fn add_capture(&self, capture: &Capture) -> Result<()>;

    /// Lists a child's captures, newest first.
    fn list_captures_by_child(&self, child_id: &str) -> Result<Vec<Capture>>;

    /// Lists a child's captures on one UTC day, newest first.
    fn list_captures_by_child_and_date(
        &self,
        child_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Capture>>;
}
