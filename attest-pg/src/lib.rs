//! Attest PG - PostgreSQL Store
//!
//! [`PgStore`] implements the attest-storage `Store` trait over a
//! deadpool-postgres pool. Every query is tenant scoped through the
//! caller's `Scope`, and every multi-row write runs in one transaction.
//! The schema is embedded and applied with [`migrate`].

pub mod config;
pub mod error;
mod params;
pub mod query;
pub mod schema;
pub mod store;

pub use config::DbConfig;
pub use error::DbResultExt;
pub use schema::migrate;
pub use store::PgStore;
