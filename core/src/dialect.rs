//! Dialect renderer (C3): per-dialect policy for identifier quoting,
//! placeholder numbering, builtin resolution, and boolean encoding. The
//! concrete dialects (`lattice-sqlite`, `lattice-postgres`, `lattice-mysql`)
//! each provide one implementation of [`Dialect`].

use crate::value::{Builtin, DbValue};

/// Which of the three supported SQL dialects a [`Dialect`] implementation
/// speaks. Kept alongside the trait object so error messages and driver
/// capability checks don't need a downcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    Sqlite,
    Postgres,
    Mysql,
}

impl core::fmt::Display for DialectKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            DialectKind::Sqlite => "sqlite",
            DialectKind::Postgres => "postgres",
            DialectKind::Mysql => "mysql",
        })
    }
}

/// Declared column-type domain a schema can assign to a field (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    Text,
    Integer,
    Real,
    Boolean,
    Datetime,
    Json,
}

/// Object-safe per-dialect rendering policy.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    /// Quotes an identifier, e.g. `"x"` or `` `x` ``.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Renders the placeholder for the `index`-th parameter (1-based),
    /// e.g. `?` or `$3`.
    fn placeholder(&self, index: usize) -> String;

    /// Resolves a [`Builtin`] to dialect-specific inline SQL text.
    fn resolve_builtin(&self, builtin: Builtin) -> String {
        match builtin {
            Builtin::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            Builtin::CurrentDate => "CURRENT_DATE".to_string(),
            Builtin::CurrentTime => "CURRENT_TIME".to_string(),
            Builtin::Raw(text) => text.to_string(),
        }
    }

    /// Whether `INSERT/UPDATE ... RETURNING` is supported. MySQL falls
    /// back to a readback SELECT when this is `false` (§4.2).
    fn supports_returning(&self) -> bool;

    /// Normalises a literal value for this dialect's wire format.
    /// SQLite/MySQL encode booleans as 0/1; Postgres passes them through.
    fn normalize_param(&self, value: DbValue) -> DbValue {
        value
    }

    /// SQL type name used in DDL for a declared type (§4.10 ensure engine).
    fn column_type_sql(&self, ty: DeclaredType) -> &'static str;

    /// Whether `ALTER TABLE ... ADD CONSTRAINT FOREIGN KEY` can be applied
    /// to an existing table without a rebuild (sqlite cannot; see §9 open
    /// question "MySQL FK online add" / asymmetry must be preserved).
    fn supports_online_foreign_key_add(&self) -> bool;

    /// `IF NOT EXISTS` support on `CREATE INDEX`/`CREATE TABLE`.
    fn supports_if_not_exists(&self) -> bool {
        true
    }
}

/// Boolean-to-integer normalisation shared by SQLite and MySQL.
pub fn normalize_bool_to_int(value: DbValue) -> DbValue {
    match value {
        DbValue::Bool(b) => DbValue::Int(if b { 1 } else { 0 }),
        other => other,
    }
}
