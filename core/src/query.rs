//! Query engine (C7): builds the canonical `"{table}"."{field}" AS
//! "{table}.{field}"` column list across one or more tables, appends a
//! caller-supplied tail fragment (WHERE / JOIN ... WHERE / ORDER BY), and
//! hands the flat row-set to the normaliser (§4.6).

use std::sync::Arc;

use crate::codec::DialectCodec;
use crate::dialect::Dialect;
use crate::driver::{Driver, Row};
use crate::error::Result;
use crate::normalize::{normalize, Entity};
use crate::render::render;
use crate::schema::TableInfo;
use crate::template::{Template, TemplateBuilder};
use crate::value::{DbValue, Value};

/// Bundles the driver and dialect codec, mirroring [`crate::mutate::Engine`].
pub struct QueryEngine<'a> {
    pub driver: &'a dyn Driver,
    pub codec: &'a dyn DialectCodec,
}

impl<'a> QueryEngine<'a> {
    pub fn new(driver: &'a dyn Driver, codec: &'a dyn DialectCodec) -> Self {
        Self { driver, codec }
    }

    fn dialect(&self) -> &dyn Dialect {
        self.driver.dialect()
    }

    /// All rows across `tables`, optionally narrowed/joined by `tail`
    /// (anything legal after the first table's `FROM`), normalised into an
    /// entity graph rooted at `tables[0]`.
    pub async fn all(
        &self,
        tables: &[&'static dyn TableInfo],
        tail: Option<Template>,
    ) -> Result<Vec<Arc<Entity>>> {
        let rows = self.fetch_rows(tables, tail).await?;
        normalize(tables, rows, self.codec)
    }

    /// A single entity of `table` looked up by primary key.
    pub async fn get_by_id(
        &self,
        table: &'static dyn TableInfo,
        id: DbValue,
    ) -> Result<Option<Arc<Entity>>> {
        let Some(pk) = table.primary_key() else {
            return Err(crate::error::LatticeError::configuration(
                table.name(),
                "table has no primary key to look up by id",
            ));
        };
        let tail = where_pk_equals(table.name(), pk, id);
        Ok(self.all(&[table], Some(tail)).await?.into_iter().next())
    }

    /// The first normalised entity matching a caller-supplied tail fragment
    /// across one or more joined tables.
    pub async fn get_where(
        &self,
        tables: &[&'static dyn TableInfo],
        tail: Template,
    ) -> Result<Option<Arc<Entity>>> {
        Ok(self.all(tables, Some(tail)).await?.into_iter().next())
    }

    /// Raw rows for an arbitrary template, bypassing column-list generation
    /// and normalisation entirely (§4.6 "query").
    pub async fn query(&self, template: &Template) -> Result<Vec<Row>> {
        let rendered = render(template, self.dialect());
        self.driver.all(&rendered.sql, &rendered.params).await
    }

    /// Executes an arbitrary template for its affected-row count (§4.6 "exec").
    pub async fn exec(&self, template: &Template) -> Result<u64> {
        let rendered = render(template, self.dialect());
        self.driver.run(&rendered.sql, &rendered.params).await
    }

    /// A single scalar for an arbitrary template (§4.6 "value").
    pub async fn value(&self, template: &Template) -> Result<Option<DbValue>> {
        let rendered = render(template, self.dialect());
        self.driver.val(&rendered.sql, &rendered.params).await
    }

    async fn fetch_rows(
        &self,
        tables: &[&'static dyn TableInfo],
        tail: Option<Template>,
    ) -> Result<Vec<Row>> {
        let mut builder = TemplateBuilder::new();
        builder.append_literal("SELECT ");
        builder.splice_fragment(column_list(tables));
        builder.append_literal(" FROM ");
        builder.push_value(Value::Identifier(tables[0].name().to_string()));
        if let Some(tail) = tail {
            builder.append_literal(" ");
            builder.splice_fragment(tail);
        }
        let rendered = render(&builder.seal(), self.dialect());
        self.driver.all(&rendered.sql, &rendered.params).await
    }
}

/// Builds `"t1"."a" AS "t1.a", "t1"."b" AS "t1.b", ..., (derived expr) AS
/// "t1.derived", "t2"."a" AS "t2.a", ...` across every table in declaration
/// order. The `AS` alias is the canonical dotted key the normaliser expects
/// every row to use (§4.6, §4.7).
fn column_list(tables: &[&'static dyn TableInfo]) -> Template {
    let mut builder = TemplateBuilder::new();
    let mut first = true;

    for table in tables {
        for field in table.fields() {
            if !first {
                builder.append_literal(", ");
            }
            first = false;
            builder.push_value(Value::Identifier(table.name().to_string()));
            builder.append_literal(".");
            builder.push_value(Value::Identifier(field.name().to_string()));
            builder.append_literal(" AS ");
            builder.push_value(Value::Identifier(format!("{}.{}", table.name(), field.name())));
        }
        for derived in table.derived_columns() {
            if !first {
                builder.append_literal(", ");
            }
            first = false;
            builder.append_literal("(");
            builder.splice_fragment(derived.template(table.name()));
            builder.append_literal(") AS ");
            builder.push_value(Value::Identifier(format!("{}.{}", table.name(), derived.name())));
        }
    }

    builder.seal()
}

fn where_pk_equals(table: &str, pk: &str, id: DbValue) -> Template {
    let mut b = TemplateBuilder::new();
    b.append_literal("WHERE ");
    b.push_value(Value::Identifier(table.to_string()));
    b.append_literal(".");
    b.push_value(Value::Identifier(pk.to_string()));
    b.append_literal(" = ");
    b.push_value(Value::Literal(id));
    b.seal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DeclaredType, DialectKind};
    use crate::schema::{FieldInfo, MarkerOp, TableKind};

    struct TestDialect;
    impl Dialect for TestDialect {
        fn kind(&self) -> DialectKind {
            DialectKind::Sqlite
        }
        fn quote_identifier(&self, ident: &str) -> String {
            format!("\"{ident}\"")
        }
        fn placeholder(&self, _index: usize) -> String {
            "?".to_string()
        }
        fn supports_returning(&self) -> bool {
            false
        }
        fn column_type_sql(&self, _ty: DeclaredType) -> &'static str {
            "TEXT"
        }
        fn supports_online_foreign_key_add(&self) -> bool {
            false
        }
    }

    struct IdField;
    impl FieldInfo for IdField {
        fn name(&self) -> &str {
            "id"
        }
        fn nullable(&self) -> bool {
            false
        }
        fn auto_increment(&self) -> bool {
            true
        }
        fn unique(&self) -> bool {
            true
        }
        fn declared_type(&self) -> DeclaredType {
            DeclaredType::Integer
        }
        fn marker(&self, _op: MarkerOp) -> Option<crate::schema::Marker> {
            None
        }
    }

    struct Users;
    impl TableInfo for Users {
        fn name(&self) -> &str {
            "users"
        }
        fn kind(&self) -> TableKind {
            TableKind::Full
        }
        fn fields(&self) -> &[&'static dyn FieldInfo] {
            static FIELDS: &[&dyn FieldInfo] = &[&IdField];
            FIELDS
        }
        fn primary_key(&self) -> Option<&str> {
            Some("id")
        }
    }

    static USERS: Users = Users;

    #[test]
    fn column_list_uses_canonical_dotted_aliases() {
        let tpl = column_list(&[&USERS]);
        let rendered = render(&tpl, &TestDialect);
        assert_eq!(rendered.sql, "\"users\".\"id\" AS \"users.id\"");
    }

    #[test]
    fn where_pk_equals_parameterises_only_the_id() {
        let tpl = where_pk_equals("users", "id", DbValue::Int(7));
        let rendered = render(&tpl, &TestDialect);
        assert_eq!(rendered.sql, "WHERE \"users\".\"id\" = ?");
        assert_eq!(rendered.params, vec![DbValue::Int(7)]);
    }
}
