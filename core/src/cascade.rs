//! Cascade & soft-delete (C9): after a successful soft-delete, recursively
//! soft-deletes rows in every other registered table that references the
//! deleted rows through an `OnDelete::Cascade` foreign key, per §4.8.
//!
//! Only tables that themselves declare a `soft_delete_field` participate —
//! a cascade never hard-deletes on behalf of a soft-delete (§4.8 step 3).
//! Traversal terminates because each recursive step operates on a strictly
//! smaller remaining id-set per table: a table already visited in the
//! current cascade is not revisited (testable property #12).

use std::collections::HashSet;

use crate::codec::DialectCodec;
use crate::driver::Driver;
use crate::error::Result;
use crate::mutate::Engine;
use crate::schema::{OnDelete, TableInfo};
use crate::template::{Template, TemplateBuilder};
use crate::value::{DbValue, Value};

/// The full set of tables known to a cascade pass. Supplied by application
/// start-up code that registers every schema-declared table (out of scope,
/// §1); the cascade engine only needs the capability view.
pub type Registry = [&'static dyn TableInfo];

/// Soft-deletes every row of `table` whose primary key is in `ids`, then
/// follows every `OnDelete::Cascade` reference that targets `table` from a
/// table in `registry` which itself supports soft-delete, recursing into
/// those rows in turn.
///
/// Returns the total number of rows soft-deleted, across the root table and
/// every cascaded table.
pub async fn cascade_soft_delete(
    driver: &dyn Driver,
    codec: &dyn DialectCodec,
    registry: &Registry,
    table: &'static dyn TableInfo,
    ids: Vec<DbValue>,
) -> Result<u64> {
    let mut visited: HashSet<&'static str> = HashSet::new();
    cascade_inner(driver, codec, registry, table, ids, &mut visited).await
}

fn cascade_inner<'a>(
    driver: &'a dyn Driver,
    codec: &'a dyn DialectCodec,
    registry: &'a Registry,
    table: &'static dyn TableInfo,
    ids: Vec<DbValue>,
    visited: &'a mut HashSet<&'static str>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64>> + 'a>> {
    Box::pin(async move {
        if ids.is_empty() || visited.contains(table.name()) {
            return Ok(0);
        }
        visited.insert(table.name());

        let engine = Engine::new(driver, codec);
        let soft_deleted = engine.soft_delete_by_ids(table, ids.clone()).await?;
        let mut total = soft_deleted.iter().filter(|r| r.is_some()).count() as u64;

        for referrer in registry.iter() {
            if referrer.soft_delete_field().is_none() {
                continue;
            }
            for reference in referrer.references() {
                if reference.on_delete() != OnDelete::Cascade {
                    continue;
                }
                if reference.target_table().name() != table.name() {
                    continue;
                }
                let Some(source_field) = reference.source_fields().first().copied() else {
                    continue;
                };
                let where_in = where_field_in(referrer.name(), source_field, &ids);
                let child_ids = select_ids(driver, referrer, &where_in).await?;
                total += cascade_inner(driver, codec, registry, *referrer, child_ids, visited).await?;
            }
        }

        Ok(total)
    })
}

/// Soft-deletes every row of `table` matching `where_fragment`, then
/// cascades from the affected primary keys exactly as [`cascade_soft_delete`]
/// does for an explicit id list.
///
/// `where_fragment` must not itself contain the `WHERE` keyword — it is
/// spliced after one this function supplies, matching the convention of
/// every other `where_fragment`-taking API in this crate (`Engine::update_where`,
/// `Engine::delete_where`, `Engine::soft_delete_where`).
pub async fn cascade_soft_delete_where(
    driver: &dyn Driver,
    codec: &dyn DialectCodec,
    registry: &Registry,
    table: &'static dyn TableInfo,
    where_fragment: Template,
) -> Result<u64> {
    let ids = select_ids(driver, table, &where_fragment).await?;
    cascade_soft_delete(driver, codec, registry, table, ids).await
}

/// Selects the primary keys of `table` matching `where_fragment`.
/// `where_fragment` must not contain the `WHERE` keyword itself — this
/// function supplies it, matching `Engine::update_where`/`delete_where`.
async fn select_ids(
    driver: &dyn Driver,
    table: &'static dyn TableInfo,
    where_fragment: &Template,
) -> Result<Vec<DbValue>> {
    let Some(pk) = table.primary_key() else {
        return Ok(Vec::new());
    };
    let mut b = TemplateBuilder::new();
    b.append_literal("SELECT ");
    b.push_value(Value::Identifier(pk.to_string()));
    b.append_literal(" FROM ");
    b.push_value(Value::Identifier(table.name().to_string()));
    b.append_literal(" WHERE ");
    b.splice_fragment(where_fragment.clone());
    let tpl = b.seal();
    let rendered = crate::render::render(&tpl, driver.dialect());
    let rows = driver.all(&rendered.sql, &rendered.params).await?;
    Ok(rows
        .into_iter()
        .filter_map(|mut row| row.shift_remove(pk))
        .collect())
}

/// Builds a WHERE-less `"{table}"."{field}" IN (...)` fragment — the
/// `WHERE` keyword itself is added by [`select_ids`], per this crate's
/// shared convention for `where_fragment`-taking APIs.
fn where_field_in(table: &str, field: &str, ids: &[DbValue]) -> Template {
    let mut b = TemplateBuilder::new();
    b.push_value(Value::Identifier(table.to_string()));
    b.append_literal(".");
    b.push_value(Value::Identifier(field.to_string()));
    b.append_literal(" IN (");
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            b.append_literal(", ");
        }
        b.push_value(Value::Literal(id.clone()));
    }
    b.append_literal(")");
    b.seal()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::codec::DefaultDialectCodec;
    use crate::dialect::{DeclaredType, Dialect, DialectKind};
    use crate::driver::{MigrationLock, Row};
    use crate::schema::{FieldInfo, MarkerOp, ReferenceInfo, TableKind};
    use crate::value::Builtin;

    #[derive(Debug, Default, Clone, Copy)]
    struct FakeDialect;

    impl Dialect for FakeDialect {
        fn kind(&self) -> DialectKind {
            DialectKind::Sqlite
        }
        fn quote_identifier(&self, ident: &str) -> String {
            format!("\"{ident}\"")
        }
        fn placeholder(&self, index: usize) -> String {
            format!("?{index}")
        }
        fn supports_returning(&self) -> bool {
            true
        }
        fn column_type_sql(&self, _ty: DeclaredType) -> &'static str {
            "TEXT"
        }
        fn supports_online_foreign_key_add(&self) -> bool {
            false
        }
    }

    struct FakeDriver {
        dialect: FakeDialect,
    }

    #[async_trait]
    impl Driver for FakeDriver {
        fn dialect(&self) -> &dyn Dialect {
            &self.dialect
        }

        async fn all(&self, sql: &str, _params: &[DbValue]) -> Result<Vec<Row>> {
            let row = |id: i64| {
                let mut r = Row::new();
                r.insert("id".to_string(), DbValue::Int(id));
                r.insert("deleted_at".to_string(), DbValue::Text("2026-07-28 00:00:00.000".into()));
                r
            };
            if sql.starts_with("SELECT") && sql.contains("FROM \"parent\"") {
                return Ok(vec![row(1), row(2)]);
            }
            if sql.starts_with("SELECT") && sql.contains("FROM \"child\"") {
                return Ok(vec![row(10), row(20)]);
            }
            if sql.starts_with("UPDATE \"parent\"") {
                return Ok(vec![row(1), row(2)]);
            }
            if sql.starts_with("UPDATE \"child\"") {
                return Ok(vec![row(10), row(20)]);
            }
            Ok(Vec::new())
        }

        async fn get(&self, _sql: &str, _params: &[DbValue]) -> Result<Option<Row>> {
            Ok(None)
        }

        async fn run(&self, _sql: &str, _params: &[DbValue]) -> Result<u64> {
            Ok(0)
        }

        async fn val(&self, _sql: &str, _params: &[DbValue]) -> Result<Option<DbValue>> {
            Ok(None)
        }

        async fn acquire_migration_lock(&self) -> Result<Option<Box<dyn MigrationLock>>> {
            Ok(None)
        }

        async fn list_columns(&self, _table: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn list_unique_constraints(&self, _table: &str) -> Result<Vec<Vec<String>>> {
            Ok(Vec::new())
        }
        async fn list_foreign_keys(&self, _table: &str) -> Result<Vec<(Vec<String>, String)>> {
            Ok(Vec::new())
        }
        async fn table_exists(&self, _table: &str) -> Result<bool> {
            Ok(true)
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
    }

    struct DeletedAtField;
    impl FieldInfo for DeletedAtField {
        fn name(&self) -> &str {
            "deleted_at"
        }
        fn nullable(&self) -> bool {
            true
        }
        fn auto_increment(&self) -> bool {
            false
        }
        fn unique(&self) -> bool {
            false
        }
        fn declared_type(&self) -> DeclaredType {
            DeclaredType::Datetime
        }
        fn marker(&self, op: MarkerOp) -> Option<crate::schema::Marker> {
            match op {
                MarkerOp::Updated | MarkerOp::Upserted => {
                    Some(crate::schema::Marker::Builtin(Builtin::CurrentTimestamp))
                }
                MarkerOp::Inserted => None,
            }
        }
    }

    struct ParentIdField;
    impl FieldInfo for ParentIdField {
        fn name(&self) -> &str {
            "parent_id"
        }
        fn nullable(&self) -> bool {
            true
        }
        fn auto_increment(&self) -> bool {
            false
        }
        fn unique(&self) -> bool {
            false
        }
        fn declared_type(&self) -> DeclaredType {
            DeclaredType::Integer
        }
    }

    static ID_FIELD: IdField = IdField;
    static DELETED_AT_FIELD: DeletedAtField = DeletedAtField;
    static PARENT_ID_FIELD: ParentIdField = ParentIdField;

    struct ParentTable;
    static PARENT_FIELDS: [&dyn FieldInfo; 2] = [&ID_FIELD, &DELETED_AT_FIELD];
    impl TableInfo for ParentTable {
        fn name(&self) -> &str {
            "parent"
        }
        fn kind(&self) -> TableKind {
            TableKind::Full
        }
        fn fields(&self) -> &[&'static dyn FieldInfo] {
            &PARENT_FIELDS
        }
        fn primary_key(&self) -> Option<&str> {
            Some("id")
        }
        fn soft_delete_field(&self) -> Option<&str> {
            Some("deleted_at")
        }
    }
    static PARENT_TABLE: ParentTable = ParentTable;

    struct ChildToParent;
    impl ReferenceInfo for ChildToParent {
        fn source_fields(&self) -> &[&str] {
            &["parent_id"]
        }
        fn target_table(&self) -> &'static dyn TableInfo {
            &PARENT_TABLE
        }
        fn target_fields(&self) -> &[&str] {
            &["id"]
        }
        fn forward_role(&self) -> &str {
            "parent"
        }
        fn on_delete(&self) -> OnDelete {
            OnDelete::Cascade
        }
    }
    static CHILD_TO_PARENT: ChildToParent = ChildToParent;

    struct ChildTable;
    static CHILD_FIELDS: [&dyn FieldInfo; 3] = [&ID_FIELD, &PARENT_ID_FIELD, &DELETED_AT_FIELD];
    static CHILD_REFERENCES: [&dyn ReferenceInfo; 1] = [&CHILD_TO_PARENT];
    impl TableInfo for ChildTable {
        fn name(&self) -> &str {
            "child"
        }
        fn kind(&self) -> TableKind {
            TableKind::Full
        }
        fn fields(&self) -> &[&'static dyn FieldInfo] {
            &CHILD_FIELDS
        }
        fn primary_key(&self) -> Option<&str> {
            Some("id")
        }
        fn references(&self) -> &[&'static dyn ReferenceInfo] {
            &CHILD_REFERENCES
        }
        fn soft_delete_field(&self) -> Option<&str> {
            Some("deleted_at")
        }
    }
    static CHILD_TABLE: ChildTable = ChildTable;

    #[tokio::test]
    async fn cascade_soft_delete_where_cascades_into_referencing_table() {
        let driver = FakeDriver { dialect: FakeDialect };
        let codec = DefaultDialectCodec;
        let registry: &Registry = &[&PARENT_TABLE, &CHILD_TABLE];

        let mut where_fragment = TemplateBuilder::new();
        where_fragment
            .push_value(Value::Identifier("deleted_at".to_string()))
            .append_literal(" IS NULL");

        let total = cascade_soft_delete_where(
            &driver,
            &codec,
            registry,
            &PARENT_TABLE,
            where_fragment.seal(),
        )
        .await
        .unwrap();

        // 2 parent rows + 2 cascaded child rows.
        assert_eq!(total, 4);
    }
}
