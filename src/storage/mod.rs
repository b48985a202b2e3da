//! Persistence for spirits, scan sessions, and captures.
//!
//! - [`MemoryStore`]: `RwLock`-guarded maps, the default for tests
//! - [`SqliteStore`]: single `SQLite` connection with WAL journaling

// Dropping the connection guard slightly earlier buys nothing here.
#![allow(clippy::significant_drop_tightening)]

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::Store;
