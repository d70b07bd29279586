use lattice_core::dialect::{DeclaredType, Dialect, DialectKind};
use lattice_core::value::{Builtin, DbValue};

/// PostgreSQL rendering policy (§4.2): `"x"` quoting, `$1,$2,…`
/// placeholders, native `RETURNING`, and native boolean passthrough
/// (no 0/1 coercion, unlike sqlite/mysql).
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn resolve_builtin(&self, builtin: Builtin) -> String {
        match builtin {
            Builtin::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            Builtin::CurrentDate => "CURRENT_DATE".to_string(),
            Builtin::CurrentTime => "CURRENT_TIME".to_string(),
            Builtin::Raw(text) => text.to_string(),
        }
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn normalize_param(&self, value: DbValue) -> DbValue {
        value
    }

    fn column_type_sql(&self, ty: DeclaredType) -> &'static str {
        match ty {
            DeclaredType::Text => "TEXT",
            DeclaredType::Integer => "BIGINT",
            DeclaredType::Real => "DOUBLE PRECISION",
            DeclaredType::Boolean => "BOOLEAN",
            DeclaredType::Datetime => "TIMESTAMP",
            DeclaredType::Json => "JSONB",
        }
    }

    fn supports_online_foreign_key_add(&self) -> bool {
        true
    }

    fn supports_if_not_exists(&self) -> bool {
        true
    }
}
