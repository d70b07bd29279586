//! External driver interface (§6.1). A concrete dialect crate
//! (`lattice-sqlite`, `lattice-postgres`, `lattice-mysql`) wraps its
//! underlying wire driver and implements [`Driver`]; the mutation/query
//! engines in this crate are entirely driver-agnostic beyond this trait.

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::value::DbValue;

/// One raw row keyed by canonical column name (`"{table}.{field}"` for
/// joined queries, or the bare column name for raw `query`/`exec`/`value`
/// calls). Insertion order is preserved so capacity estimation and
/// deterministic test fixtures don't depend on hashing.
pub type Row = IndexMap<String, DbValue>;

/// A held exclusive migration lock (advisory lock / application lock /
/// `BEGIN EXCLUSIVE`), released on drop of the returned guard via
/// `release`.
#[async_trait]
pub trait MigrationLock: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

/// The driver contract the core requires (§6.1). Every method may suspend;
/// there is no assumption of a shared mutable state across tasks within one
/// `Driver` instance beyond what the concrete implementation chooses to
/// serialize on its single underlying connection (§5).
#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> &dyn Dialect;

    async fn all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<Row>>;
    async fn get(&self, sql: &str, params: &[DbValue]) -> Result<Option<Row>>;
    async fn run(&self, sql: &str, params: &[DbValue]) -> Result<u64>;
    async fn val(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbValue>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Whether this connection/driver supports `RETURNING` (or the
    /// dialect's equivalent). Mirrors `Dialect::supports_returning` but
    /// lets a specific connection (e.g. an old MySQL server) disagree with
    /// the dialect's default.
    fn supports_returning(&self) -> bool {
        self.dialect().supports_returning()
    }

    /// Begins a connection-bound transaction, returning a driver scoped to
    /// the single underlying connection (§5 "Transactions"). Default: not
    /// supported.
    async fn begin(&self) -> Result<Box<dyn Driver>> {
        Err(crate::error::LatticeError::DialectUnsupported {
            dialect: dialect_name(self.dialect()),
            capability: "transaction",
        })
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    /// Exclusive migration lock, if the driver can supply one natively.
    /// `None` tells the migration controller to fall back to wrapping the
    /// whole read/write sequence in a transaction (§4.9, §5).
    async fn acquire_migration_lock(&self) -> Result<Option<Box<dyn MigrationLock>>> {
        Ok(None)
    }

    /// Introspects live column names for a table (used by `copy_column`
    /// and by the ensure engine's drift checks). Falls back to
    /// information-schema/pragma queries when a dialect has no faster
    /// native hook.
    async fn list_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Live unique-constraint column sets for a table (ensure engine drift
    /// check).
    async fn list_unique_constraints(&self, table: &str) -> Result<Vec<Vec<String>>>;

    /// Live outgoing foreign keys for a table, as `(source_columns,
    /// target_table)` pairs (ensure engine drift check).
    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<(Vec<String>, String)>>;

    /// Whether `table` currently exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;
}

fn dialect_name(dialect: &dyn Dialect) -> &'static str {
    match dialect.kind() {
        crate::dialect::DialectKind::Sqlite => "sqlite",
        crate::dialect::DialectKind::Postgres => "postgres",
        crate::dialect::DialectKind::Mysql => "mysql",
    }
}
