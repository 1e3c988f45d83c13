//! chainbridge-storage — subscription record stores.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (single-file persistence, feature `sqlite`)
//!
//! Both keep each record as a JSON document under
//! `subscription-<id>`.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
