//! `lattice`: a schema-driven, multi-dialect SQL data access core.
//!
//! This crate re-exports [`lattice_core`] (the dialect-agnostic template
//! algebra, schema capability interface, and mutation/query/normalisation
//! engines) together with whichever concrete dialect drivers are enabled
//! via Cargo features, plus the migration controller and ensure engine
//! from `lattice-migrations`.
//!
//! Enable one or more of the `sqlite` (default), `postgres`, `mysql`
//! features to pull in a concrete [`lattice_core::driver::Driver`]
//! implementation.

pub use lattice_core as core;
pub use lattice_core::prelude;

pub use lattice_migrations::{copy_column, ensure_constraints, ensure_table, EnsureOutcome};
pub use lattice_migrations::{MigrationController, NoopListener, UpgradeEvent, UpgradeListener};

#[cfg(feature = "sqlite")]
pub use lattice_sqlite::{SqliteDialect, SqliteDriver};

#[cfg(feature = "postgres")]
pub use lattice_postgres::{PostgresDialect, PostgresDriver};

#[cfg(feature = "mysql")]
pub use lattice_mysql::{MysqlDialect, MysqlDriver};
