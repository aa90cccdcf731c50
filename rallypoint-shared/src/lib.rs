//! # Rallypoint Shared Library
//!
//! Types and storage shared by the Rallypoint notifier and anything else that
//! writes attendance data.
//!
//! ## Module Organization
//!
//! - `models`: Events, contacts, attendees and circles
//! - `db`: Postgres connection pool and migrations
//! - `store`: The attendance store boundary plus Postgres and in-memory backends

pub mod db;
pub mod models;
pub mod store;

/// Current version of the Rallypoint shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
