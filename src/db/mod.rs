//! SQLite-backed ledger store.
//!
//! [`init_db`] opens and versions the store; [`Repository`] holds every
//! query, with the position-locking statements kept apart for the ledger.

pub mod migrations;
pub mod repo;

pub use migrations::{init_db, SCHEMA_VERSION};
pub use repo::{NamespacedDuplicates, Repository};
