use lattice_core::dialect::{normalize_bool_to_int, DeclaredType, Dialect, DialectKind};
use lattice_core::value::{Builtin, DbValue};

/// MySQL/MariaDB rendering policy (§4.2): `` `x` `` quoting, `?`
/// placeholders, no native `RETURNING` — the mutation engine falls back to
/// a readback `SELECT` (§4.5 step 7).
#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
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
        false
    }

    fn normalize_param(&self, value: DbValue) -> DbValue {
        normalize_bool_to_int(value)
    }

    fn column_type_sql(&self, ty: DeclaredType) -> &'static str {
        match ty {
            DeclaredType::Text => "TEXT",
            DeclaredType::Integer => "BIGINT",
            DeclaredType::Real => "DOUBLE",
            DeclaredType::Boolean => "TINYINT(1)",
            DeclaredType::Datetime => "DATETIME(3)",
            DeclaredType::Json => "JSON",
        }
    }

    fn supports_online_foreign_key_add(&self) -> bool {
        true
    }

    fn supports_if_not_exists(&self) -> bool {
        true
    }
}
