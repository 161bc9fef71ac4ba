//! Store implementations behind the `gitstat_lib::Store` interface: a
//! durable sqlite backend for production and a hashmap backend for tests
//! and ephemeral runs.

pub mod mem_db;
pub mod sqlite;

pub use mem_db::InMemoryStore;
pub use sqlite::SqliteStore;
