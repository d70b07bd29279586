use lattice_core::dialect::{normalize_bool_to_int, DeclaredType, Dialect, DialectKind};
use lattice_core::value::{Builtin, DbValue};

/// SQLite rendering policy (§4.2): `"x"` quoting, `?` placeholders, no
/// native `RETURNING` readback assumed by default (sqlite ≥3.35 does
/// support it, but the driver advertises the capability, not the dialect —
/// see [`lattice_core::driver::Driver::supports_returning`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
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
        true
    }

    fn normalize_param(&self, value: DbValue) -> DbValue {
        normalize_bool_to_int(value)
    }

    fn column_type_sql(&self, ty: DeclaredType) -> &'static str {
        match ty {
            DeclaredType::Text => "TEXT",
            DeclaredType::Integer => "INTEGER",
            DeclaredType::Real => "REAL",
            DeclaredType::Boolean => "INTEGER",
            DeclaredType::Datetime => "TEXT",
            DeclaredType::Json => "TEXT",
        }
    }

    fn supports_online_foreign_key_add(&self) -> bool {
        // Adding a foreign key to an existing sqlite table requires a
        // table rebuild (§9 open question); the ensure engine surfaces a
        // typed error rather than attempting one.
        false
    }

    fn supports_if_not_exists(&self) -> bool {
        true
    }
}
