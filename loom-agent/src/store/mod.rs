//! Durable backends for the audit log and learning memory.
//!
//! In-memory backends live next to their traits; this module holds the ones that survive a
//! restart.

mod sqlite;

pub use sqlite::SqliteStore;
