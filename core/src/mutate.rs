//! Mutation engine (C6): injects schema markers, splits caller data into
//! values/expressions/builtins, validates, encodes, and emits
//! INSERT/UPDATE/DELETE (direct, by id, by id-list, by WHERE), per §4.5.
//!
//! State machine for one mutation call (documented, not reified as a type —
//! each step below is a stage of §4.5's
//! `Received -> ReadOnlyChecked -> MarkersInjected -> Split -> Validated ->
//! Encoded -> Rendered -> Executed -> ReturnedOrSelected -> Decoded -> Final`):

use indexmap::IndexMap;

use crate::codec::{decode_field, encode_field, reject_codec_conflict, DialectCodec};
use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::error::{LatticeError, Result};
use crate::render::render;
use crate::schema::{FieldInfo, MarkerOp, TableInfo};
use crate::template::{Template, TemplateBuilder};
use crate::value::{DbValue, FieldValue, Value};

pub type MutationData = IndexMap<String, FieldValue>;
pub type DecodedRow = IndexMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    SoftDelete,
    Delete,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::SoftDelete => "soft_delete",
            Operation::Delete => "delete",
        }
    }

    fn marker_ops(self) -> &'static [MarkerOp] {
        match self {
            Operation::Insert => &[MarkerOp::Inserted, MarkerOp::Upserted],
            Operation::Update | Operation::SoftDelete => &[MarkerOp::Updated, MarkerOp::Upserted],
            Operation::Delete => &[],
        }
    }
}

/// Bundles the driver and dialect codec so engine functions don't need to
/// thread both through every call.
pub struct Engine<'a> {
    pub driver: &'a dyn Driver,
    pub codec: &'a dyn DialectCodec,
}

impl<'a> Engine<'a> {
    pub fn new(driver: &'a dyn Driver, codec: &'a dyn DialectCodec) -> Self {
        Self { driver, codec }
    }

    fn dialect(&self) -> &dyn Dialect {
        self.driver.dialect()
    }

    /// §4.5 steps 2-5: inject markers for absent non-auto-increment fields,
    /// split into regular/expressions/symbols, validate `regular`, encode
    /// `regular`. Returns the three partitioned, render-ready column lists
    /// in declaration order (regular, then symbols, then expressions — the
    /// column order §4.5.1 requires for INSERT).
    fn prepare(
        &self,
        table: &dyn TableInfo,
        operation: Operation,
        mut data: MutationData,
    ) -> Result<PreparedMutation> {
        // Marker injection (step 2).
        for field in table.fields() {
            if data.contains_key(field.name()) || field.auto_increment() {
                continue;
            }
            for op in operation.marker_ops() {
                if let Some(marker) = field.marker(*op) {
                    data.insert(field.name().to_string(), marker.resolve());
                    break;
                }
            }
        }

        // Value split (step 3) + codec-conflict check, preserving declared
        // field order within each bucket.
        let mut regular = Vec::new();
        let mut symbols = Vec::new();
        let mut expressions = Vec::new();

        for field in table.fields() {
            let Some(value) = data.shift_remove(field.name()) else {
                continue;
            };
            reject_codec_conflict(table.name(), *field, &value)?;
            match value {
                FieldValue::Expression(template) => expressions.push((field.name().to_string(), template)),
                FieldValue::Builtin(builtin) => symbols.push((field.name().to_string(), builtin)),
                other => regular.push((*field, other)),
            }
        }

        // Any remaining keys in `data` name fields not declared on the
        // table at all — a caller error distinct from validation.
        if let Some((key, _)) = data.into_iter().next() {
            return Err(LatticeError::configuration(
                table.name(),
                format!("`{key}` is not a declared field of this table"),
            ));
        }

        if regular.is_empty() && symbols.is_empty() && expressions.is_empty() {
            return Err(LatticeError::configuration(table.name(), "no fields to update"));
        }

        // Validation (step 4): relax marker-filled fields to optional —
        // here that means every field reaching `prepare` already has a
        // value (either caller-supplied or marker-injected), so the only
        // remaining check is nullability for caller-supplied nulls.
        for (field, value) in &regular {
            if matches!(value, FieldValue::Null) && !field.nullable() {
                return Err(LatticeError::validation(
                    table.name(),
                    field.name(),
                    "field is not nullable",
                ));
            }
        }

        // Encoding (step 5): `regular` only.
        let encoded = regular
            .into_iter()
            .map(|(field, value)| {
                encode_field(field, &value, self.codec).map(|db| (field.name().to_string(), db))
            })
            .collect::<Result<Vec<_>>>()?;

        let _ = operation.label();
        Ok(PreparedMutation {
            regular: encoded,
            symbols,
            expressions,
        })
    }

    // ============================= INSERT =============================

    /// §4.5.1: `INSERT INTO {tbl} ({col…}) VALUES ({val…})`.
    pub async fn insert(&self, table: &dyn TableInfo, data: MutationData) -> Result<DecodedRow> {
        table.require_mutable("insert")?;
        let prepared = self.prepare(table, Operation::Insert, data)?;

        let mut columns = TemplateBuilder::new();
        let mut values = TemplateBuilder::new();
        let mut first = true;
        for (name, _) in &prepared.regular {
            push_comma(&mut columns, &mut first);
            columns.push_value(Value::Identifier(name.clone())).push_literal("");
        }
        for (name, _) in &prepared.symbols {
            push_comma(&mut columns, &mut first);
            columns.push_value(Value::Identifier(name.clone())).push_literal("");
        }
        for (name, _) in &prepared.expressions {
            push_comma(&mut columns, &mut first);
            columns.push_value(Value::Identifier(name.clone())).push_literal("");
        }

        let mut vfirst = true;
        for (_, value) in &prepared.regular {
            push_comma(&mut values, &mut vfirst);
            values
                .push_value(Value::Literal(value.clone()))
                .push_literal("");
        }
        for (_, builtin) in &prepared.symbols {
            push_comma(&mut values, &mut vfirst);
            values.push_value(Value::Builtin(*builtin)).push_literal("");
        }
        for (_, expr) in &prepared.expressions {
            push_comma(&mut values, &mut vfirst);
            values
                .push_value(Value::Expression(expr.clone()))
                .push_literal("");
        }

        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("INSERT INTO ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" (");
        stmt.splice_fragment(columns.seal());
        stmt.append_literal(") VALUES (");
        stmt.splice_fragment(values.seal());
        stmt.append_literal(")");

        self.execute_and_readback(table, stmt.seal(), None, &prepared)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LatticeError::configuration(table.name(), "insert produced no row"))
    }

    /// Inserts each row as its own statement, preserving caller order
    /// (S1: multi-row insert + RETURNING).
    pub async fn insert_many(
        &self,
        table: &dyn TableInfo,
        rows: Vec<MutationData>,
    ) -> Result<Vec<DecodedRow>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.insert(table, row).await?);
        }
        Ok(out)
    }

    // ============================= UPDATE ==============================

    /// §4.5.2: `UPDATE {tbl} SET ... WHERE {pk} = {id}`.
    pub async fn update_by_id(
        &self,
        table: &dyn TableInfo,
        data: MutationData,
        id: DbValue,
    ) -> Result<Option<DecodedRow>> {
        table.require_mutable("update")?;
        let pk = primary_key(table)?;
        let prepared = self.prepare(table, Operation::Update, data)?;
        let set_clause = set_clause(&prepared);

        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("UPDATE ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" SET ");
        stmt.splice_fragment(set_clause);
        stmt.append_literal(" WHERE ")
            .push_value(Value::Identifier(pk.to_string()))
            .append_literal(" = ")
            .push_value(Value::Literal(id))
            .append_literal("");

        let rows = self
            .execute_and_readback(table, stmt.seal(), Some(pk), &prepared)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// §4.5.3: `UPDATE {tbl} SET ... WHERE {pk} IN ({ids…})`. Result is
    /// aligned to the input id list (`None` where a given id had no row).
    pub async fn update_by_ids(
        &self,
        table: &dyn TableInfo,
        data: MutationData,
        ids: Vec<DbValue>,
    ) -> Result<Vec<Option<DecodedRow>>> {
        table.require_mutable("update")?;
        let pk = primary_key(table)?;
        let prepared = self.prepare(table, Operation::Update, data)?;
        let set_clause = set_clause(&prepared);

        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("UPDATE ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" SET ");
        stmt.splice_fragment(set_clause);
        stmt.append_literal(" WHERE ")
            .push_value(Value::Identifier(pk.to_string()))
            .append_literal(" IN (");
        stmt.splice_fragment(id_list(&ids));
        stmt.append_literal(")");

        let decoded_rows = self
            .execute_and_readback_many(table, stmt.seal(), Some(pk), &ids, &prepared)
            .await?;
        Ok(decoded_rows)
    }

    /// §4.5.4: caller-supplied WHERE sub-fragment, merged with the
    /// generated SET clause.
    pub async fn update_where(
        &self,
        table: &dyn TableInfo,
        data: MutationData,
        where_fragment: Template,
    ) -> Result<Vec<DecodedRow>> {
        table.require_mutable("update")?;
        let prepared = self.prepare(table, Operation::Update, data)?;
        let set_clause = set_clause(&prepared);

        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("UPDATE ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" SET ");
        stmt.splice_fragment(set_clause);
        stmt.append_literal(" WHERE ");
        stmt.splice_fragment(where_fragment.clone());

        if self.driver.supports_returning() {
            let mut with_returning = stmt.seal().into_builder();
            with_returning.append_literal(" RETURNING *");
            let rendered = render(&with_returning.seal(), self.dialect());
            let rows = self.driver.all(&rendered.sql, &rendered.params).await?;
            return rows
                .into_iter()
                .map(|row| decode_row(table, row, self.codec))
                .collect();
        }

        // No RETURNING: select matching primary keys first, run the
        // update, then select them back.
        let pk = primary_key(table)?;
        let pks = self.select_pks_where(table, pk, &where_fragment).await?;
        let rendered = render(&stmt.seal(), self.dialect());
        self.driver.run(&rendered.sql, &rendered.params).await?;
        let mut out = Vec::with_capacity(pks.len());
        for pk_value in pks {
            if let Some(row) = self.select_by_pk(table, pk, pk_value).await? {
                out.push(decode_row(table, row, self.codec)?);
            }
        }
        Ok(out)
    }

    // ============================= DELETE ==============================

    pub async fn delete_by_id(&self, table: &dyn TableInfo, id: DbValue) -> Result<u64> {
        table.require_mutable("delete")?;
        let pk = primary_key(table)?;
        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("DELETE FROM ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" WHERE ")
            .push_value(Value::Identifier(pk.to_string()))
            .append_literal(" = ")
            .push_value(Value::Literal(id))
            .append_literal("");
        let rendered = render(&stmt.seal(), self.dialect());
        self.driver.run(&rendered.sql, &rendered.params).await
    }

    pub async fn delete_by_ids(&self, table: &dyn TableInfo, ids: Vec<DbValue>) -> Result<u64> {
        table.require_mutable("delete")?;
        let pk = primary_key(table)?;
        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("DELETE FROM ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" WHERE ")
            .push_value(Value::Identifier(pk.to_string()))
            .append_literal(" IN (");
        stmt.splice_fragment(id_list(&ids));
        stmt.append_literal(")");
        let rendered = render(&stmt.seal(), self.dialect());
        self.driver.run(&rendered.sql, &rendered.params).await
    }

    pub async fn delete_where(&self, table: &dyn TableInfo, where_fragment: Template) -> Result<u64> {
        table.require_mutable("delete")?;
        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("DELETE FROM ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" WHERE ");
        stmt.splice_fragment(where_fragment);
        let rendered = render(&stmt.seal(), self.dialect());
        self.driver.run(&rendered.sql, &rendered.params).await
    }

    // =========================== SOFT DELETE ============================

    /// §4.5.6: requires a declared `soft_delete_field`; sets it to
    /// `CURRENT_TIMESTAMP` (never an app-side clock) plus any
    /// `updated`/`upserted` markers on other fields.
    pub async fn soft_delete_by_id(&self, table: &dyn TableInfo, id: DbValue) -> Result<Option<DecodedRow>> {
        let data = self.soft_delete_data(table)?;
        self.update_by_id(table, data, id).await
    }

    pub async fn soft_delete_by_ids(
        &self,
        table: &dyn TableInfo,
        ids: Vec<DbValue>,
    ) -> Result<Vec<Option<DecodedRow>>> {
        let data = self.soft_delete_data(table)?;
        self.update_by_ids(table, data, ids).await
    }

    pub async fn soft_delete_where(
        &self,
        table: &dyn TableInfo,
        where_fragment: Template,
    ) -> Result<Vec<DecodedRow>> {
        let data = self.soft_delete_data(table)?;
        self.update_where(table, data, where_fragment).await
    }

    fn soft_delete_data(&self, table: &dyn TableInfo) -> Result<MutationData> {
        let field = table.soft_delete_field().ok_or_else(|| {
            LatticeError::configuration(table.name(), "no soft-delete field declared")
        })?;
        let mut data = MutationData::new();
        data.insert(field.to_string(), FieldValue::Builtin(crate::value::Builtin::CurrentTimestamp));
        Ok(data)
    }

    // ============================== helpers =============================

    async fn select_pks_where(
        &self,
        table: &dyn TableInfo,
        pk: &str,
        where_fragment: &Template,
    ) -> Result<Vec<DbValue>> {
        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("SELECT ")
            .push_value(Value::Identifier(pk.to_string()))
            .append_literal(" FROM ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" WHERE ");
        stmt.splice_fragment(where_fragment.clone());
        let rendered = render(&stmt.seal(), self.dialect());
        let rows = self.driver.all(&rendered.sql, &rendered.params).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.shift_remove(pk))
            .collect())
    }

    async fn select_by_pk(
        &self,
        table: &dyn TableInfo,
        pk: &str,
        id: DbValue,
    ) -> Result<Option<crate::driver::Row>> {
        let mut stmt = TemplateBuilder::new();
        stmt.append_literal("SELECT * FROM ")
            .push_value(Value::Identifier(table.name().to_string()))
            .append_literal(" WHERE ")
            .push_value(Value::Identifier(pk.to_string()))
            .append_literal(" = ")
            .push_value(Value::Literal(id))
            .append_literal("");
        let rendered = render(&stmt.seal(), self.dialect());
        self.driver.get(&rendered.sql, &rendered.params).await
    }

    /// §4.5 step 7: RETURNING when supported, else run + select-by-pk
    /// readback. If no pk and no readback is possible, returns the
    /// validated/encoded record as a best-effort result (§9 open question).
    async fn execute_and_readback(
        &self,
        table: &dyn TableInfo,
        stmt: Template,
        pk: Option<&str>,
        prepared: &PreparedMutation,
    ) -> Result<Vec<DecodedRow>> {
        if self.driver.supports_returning() {
            let mut with_returning = stmt.into_builder();
            with_returning.append_literal(" RETURNING *");
            let rendered = render(&with_returning.seal(), self.dialect());
            let rows = self.driver.all(&rendered.sql, &rendered.params).await?;
            return rows
                .into_iter()
                .map(|row| decode_row(table, row, self.codec))
                .collect();
        }

        let rendered = render(&stmt, self.dialect());
        self.driver.run(&rendered.sql, &rendered.params).await?;

        if let Some(pk) = pk
            && let Some(pk_value) = prepared.pk_value(pk)
        {
            return match self.select_by_pk(table, pk, pk_value).await? {
                Some(row) => Ok(vec![decode_row(table, row, self.codec)?]),
                None => Ok(vec![]),
            };
        }

        // Best-effort fallback: no RETURNING, no primary key to read back
        // by. Return the validated/encoded input as-is; it may not reflect
        // DB-applied defaults.
        Ok(vec![prepared.as_best_effort_row()])
    }

    async fn execute_and_readback_many(
        &self,
        table: &dyn TableInfo,
        stmt: Template,
        pk: Option<&str>,
        ids: &[DbValue],
        _prepared: &PreparedMutation,
    ) -> Result<Vec<Option<DecodedRow>>> {
        if self.driver.supports_returning() {
            let mut with_returning = stmt.into_builder();
            with_returning.append_literal(" RETURNING *");
            let rendered = render(&with_returning.seal(), self.dialect());
            let rows = self.driver.all(&rendered.sql, &rendered.params).await?;
            let pk = pk.ok_or_else(|| LatticeError::configuration(table.name(), "no primary key defined"))?;
            let mut by_pk: IndexMap<DbValue, crate::driver::Row> = IndexMap::new();
            for row in rows {
                if let Some(key) = row.get(pk).cloned() {
                    by_pk.insert(key, row);
                }
            }
            return ids
                .iter()
                .map(|id| match by_pk.shift_remove(id) {
                    Some(row) => decode_row(table, row, self.codec).map(Some),
                    None => Ok(None),
                })
                .collect();
        }

        let rendered = render(&stmt, self.dialect());
        self.driver.run(&rendered.sql, &rendered.params).await?;
        let pk = pk.ok_or_else(|| LatticeError::configuration(table.name(), "no primary key defined"))?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(match self.select_by_pk(table, pk, id.clone()).await? {
                Some(row) => Some(decode_row(table, row, self.codec)?),
                None => None,
            });
        }
        Ok(out)
    }
}

struct PreparedMutation {
    regular: Vec<(String, DbValue)>,
    symbols: Vec<(String, crate::value::Builtin)>,
    expressions: Vec<(String, Template)>,
}

impl PreparedMutation {
    fn pk_value(&self, pk: &str) -> Option<DbValue> {
        self.regular
            .iter()
            .find(|(name, _)| name == pk)
            .map(|(_, value)| value.clone())
    }

    fn as_best_effort_row(&self) -> DecodedRow {
        let mut row = DecodedRow::new();
        for (name, value) in &self.regular {
            row.insert(name.clone(), best_effort_field_value(value.clone()));
        }
        row
    }
}

fn best_effort_field_value(value: DbValue) -> FieldValue {
    match value {
        DbValue::Null => FieldValue::Null,
        DbValue::Bool(b) => FieldValue::Bool(b),
        DbValue::Int(i) => FieldValue::Int(i),
        DbValue::Real(r) => FieldValue::Real(r),
        DbValue::Text(s) => FieldValue::Text(s),
        DbValue::Blob(b) => FieldValue::Blob(b),
    }
}

fn push_comma(builder: &mut TemplateBuilder, first: &mut bool) {
    if *first {
        *first = false;
    } else {
        builder.append_literal(", ");
    }
}

fn set_clause(prepared: &PreparedMutation) -> Template {
    let mut builder = TemplateBuilder::new();
    let mut first = true;
    for (name, value) in &prepared.regular {
        push_comma(&mut builder, &mut first);
        builder
            .push_value(Value::Identifier(name.clone()))
            .append_literal(" = ")
            .push_value(Value::Literal(value.clone()))
            .append_literal("");
    }
    for (name, builtin) in &prepared.symbols {
        push_comma(&mut builder, &mut first);
        builder
            .push_value(Value::Identifier(name.clone()))
            .append_literal(" = ")
            .push_value(Value::Builtin(*builtin))
            .append_literal("");
    }
    for (name, expr) in &prepared.expressions {
        push_comma(&mut builder, &mut first);
        builder
            .push_value(Value::Identifier(name.clone()))
            .append_literal(" = ")
            .push_value(Value::Expression(expr.clone()))
            .append_literal("");
    }
    builder.seal()
}

fn id_list(ids: &[DbValue]) -> Template {
    let mut builder = TemplateBuilder::new();
    let mut first = true;
    for id in ids {
        push_comma(&mut builder, &mut first);
        builder.push_value(Value::Literal(id.clone())).append_literal("");
    }
    builder.seal()
}

fn primary_key(table: &dyn TableInfo) -> Result<&str> {
    table
        .primary_key()
        .ok_or_else(|| LatticeError::configuration(table.name(), "no primary key defined"))
}

pub fn decode_row(table: &dyn TableInfo, row: crate::driver::Row, codec: &dyn DialectCodec) -> Result<DecodedRow> {
    let mut out = DecodedRow::new();
    for (key, value) in row {
        let field = table
            .field(&key)
            .ok_or_else(|| LatticeError::configuration(table.name(), format!("unknown column `{key}` in result row")))?;
        out.insert(key, decode_field(field, value, codec)?);
    }
    Ok(out)
}

#[allow(dead_code)]
fn assert_field_info_object_safe(_: &dyn FieldInfo) {}
