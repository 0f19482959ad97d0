//! SQLite-backed store: reports, audit log, delivery outbox.
//!
//! One `SqliteStore` implements `ReportStore`, `AuditLog`, and `DeliveryStore`
//! over a single connection so that every component shares the same database.

mod audit;
mod queue;
mod sqlite;

pub use logbook_types::{AuditLog, DeliveryStore, ReportStore, StoreError};
pub use sqlite::SqliteStore;
