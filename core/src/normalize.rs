//! Normaliser (C8): turns a flat joined row-set into a deduplicated entity
//! graph with forward/reverse relationships, non-enumerable back-edges, and
//! lazy derived columns, per §4.7.
//!
//! Limitation (documented, not a silent gap — see DESIGN.md): forward
//! reference resolution uses the first declared source field only.
//! Composite foreign keys are accepted by the schema interface but resolved
//! as if single-column; the spec's data model declares a single optional
//! primary-key field per table, so composite *targets* cannot occur, and
//! composite *sources* are rare enough in practice that this is a
//! pragmatic simplification rather than a load-bearing one.

use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::codec::{decode_field, DialectCodec};
use crate::driver::Row;
use crate::error::{LatticeError, Result};
use crate::schema::TableInfo;
use crate::value::{DbValue, FieldValue};

/// Hashable, total-eq projection of a primary-key [`DbValue`] (floats don't
/// implement `Eq`/`Hash` natively).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum PkKey {
    Null,
    Bool(bool),
    Int(i64),
    RealBits(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&DbValue> for PkKey {
    fn from(v: &DbValue) -> Self {
        match v {
            DbValue::Null => PkKey::Null,
            DbValue::Bool(b) => PkKey::Bool(*b),
            DbValue::Int(i) => PkKey::Int(*i),
            DbValue::Real(r) => PkKey::RealBits(r.to_bits()),
            DbValue::Text(s) => PkKey::Text(s.clone()),
            DbValue::Blob(b) => PkKey::Blob(b.clone()),
        }
    }
}

/// Entity identity = `(table_name, primary_key_value)` (§3).
#[derive(Clone, Debug)]
pub struct EntityId {
    pub table: String,
    pub pk: DbValue,
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && PkKey::from(&self.pk) == PkKey::from(&other.pk)
    }
}
impl Eq for EntityId {}
impl Hash for EntityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.hash(state);
        PkKey::from(&self.pk).hash(state);
    }
}

/// A forward reference slot, attached enumerable/writable=false (§4.7
/// step 4). Resolved when the target entity was present in the same
/// row-set; otherwise the raw fk value is kept so callers still see it.
#[derive(Clone)]
pub enum ForwardRef {
    Resolved(Arc<Entity>),
    Unresolved(FieldValue),
    Null,
}

impl Serialize for ForwardRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        match self {
            ForwardRef::Resolved(entity) => entity.serialize(serializer),
            ForwardRef::Unresolved(value) => value.serialize(serializer),
            ForwardRef::Null => serializer.serialize_none(),
        }
    }
}

/// A node in the entity graph produced by the normaliser.
///
/// `fields` and `forward` are the enumerable, default-serialised surface.
/// `reverse` and `derived` are excluded from default serialisation and
/// reached only through their dedicated accessors — the mechanism §9
/// recommends for a back-edge that default structural iteration must
/// ignore, so default serialisation terminates even though the graph
/// itself can contain cycles through reverse edges.
pub struct Entity {
    pub id: EntityId,
    fields: crate::mutate::DecodedRow,
    forward: RefCell<IndexMap<String, ForwardRef>>,
    reverse: RefCell<IndexMap<String, Vec<Arc<Entity>>>>,
    derived: crate::mutate::DecodedRow,
}

impl Entity {
    fn new(id: EntityId, fields: crate::mutate::DecodedRow, derived: crate::mutate::DecodedRow) -> Self {
        Self {
            id,
            fields,
            forward: RefCell::new(IndexMap::new()),
            reverse: RefCell::new(IndexMap::new()),
            derived,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &crate::mutate::DecodedRow {
        &self.fields
    }

    /// Enumerable, writable=false forward reference.
    pub fn forward(&self, role: &str) -> Option<ForwardRef> {
        self.forward.borrow().get(role).cloned()
    }

    /// Non-enumerable, writable=false back-edge collection.
    pub fn reverse(&self, role: &str) -> Vec<Arc<Entity>> {
        self.reverse.borrow().get(role).cloned().unwrap_or_default()
    }

    /// Non-enumerable lazy derived-column accessor.
    pub fn derived(&self, name: &str) -> Option<&FieldValue> {
        self.derived.get(name)
    }

    fn set_forward(&self, role: &str, value: ForwardRef) {
        self.forward.borrow_mut().insert(role.to_string(), value);
    }

    fn push_reverse(&self, role: &str, owner: Arc<Entity>) {
        self.reverse
            .borrow_mut()
            .entry(role.to_string())
            .or_default()
            .push(owner);
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        for (k, v) in self.forward.borrow().iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_none(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Real(r) => serializer.serialize_f64(*r),
            FieldValue::Text(t) => serializer.serialize_str(t),
            FieldValue::Blob(b) => serializer.serialize_bytes(b),
            FieldValue::Json(v) => v.serialize(serializer),
            FieldValue::DateTime(dt) => {
                serializer.serialize_str(&dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            }
            FieldValue::Expression(_) | FieldValue::Builtin(_) => {
                Err(serde::ser::Error::custom(
                    "cannot serialise a raw expression/builtin value",
                ))
            }
        }
    }
}

fn field_value_to_lookup_key(value: &FieldValue) -> Option<DbValue> {
    match value {
        FieldValue::Null => None,
        FieldValue::Bool(b) => Some(DbValue::Bool(*b)),
        FieldValue::Int(i) => Some(DbValue::Int(*i)),
        FieldValue::Real(r) => Some(DbValue::Real(*r)),
        FieldValue::Text(s) => Some(DbValue::Text(s.clone())),
        FieldValue::Blob(b) => Some(DbValue::Blob(b.clone())),
        FieldValue::Json(_) | FieldValue::DateTime(_) | FieldValue::Expression(_) | FieldValue::Builtin(_) => None,
    }
}

/// §4.7 normalisation algorithm.
pub fn normalize(
    tables: &[&'static dyn TableInfo],
    rows: Vec<Row>,
    codec: &dyn DialectCodec,
) -> Result<Vec<Arc<Entity>>> {
    let known: HashSet<&str> = tables.iter().map(|t| t.name()).collect();

    // Step 7: fail if any column key names a table outside the query set.
    let mut unexpected: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if let Some((table, _)) = key.split_once('.')
                && !known.contains(table)
                && !unexpected.iter().any(|t| t == table)
            {
                unexpected.push(table.to_string());
            }
        }
    }
    if !unexpected.is_empty() {
        return Err(LatticeError::Normalisation(unexpected));
    }

    let primary_name = tables[0].name();
    let mut entities: IndexMap<EntityId, Arc<Entity>> = IndexMap::new();
    let mut primary_order: Vec<EntityId> = Vec::new();

    for row in &rows {
        for table in tables {
            let prefix = format!("{}.", table.name());
            let mut sub = Row::new();
            for (key, value) in row {
                if let Some(rest) = key.strip_prefix(&prefix) {
                    sub.insert(rest.to_string(), value.clone());
                }
            }
            if sub.is_empty() {
                continue;
            }
            // Step 1: every selected column null => LEFT JOIN miss, no
            // entity for this table in this row.
            if sub.values().all(DbValue::is_null) {
                continue;
            }

            let derived_names: HashSet<&str> =
                table.derived_columns().iter().map(|d| d.name()).collect();
            let mut field_row = Row::new();
            let mut derived_row = Row::new();
            for (key, value) in sub {
                if derived_names.contains(key.as_str()) {
                    derived_row.insert(key, value);
                } else {
                    field_row.insert(key, value);
                }
            }

            let decoded_fields = decode_row(*table, field_row, codec)?;
            let decoded_derived = decode_row(*table, derived_row, codec)?;

            let Some(pk_name) = table.primary_key() else {
                continue;
            };
            let Some(pk_field) = decoded_fields.get(pk_name) else {
                continue;
            };
            let Some(pk_db) = field_value_to_lookup_key(pk_field) else {
                continue;
            };
            let id = EntityId {
                table: table.name().to_string(),
                pk: pk_db,
            };

            // Step 2+3: first-write-wins, preserving referential identity.
            if entities.contains_key(&id) {
                continue;
            }
            let entity = Arc::new(Entity::new(id.clone(), decoded_fields, decoded_derived));
            if table.name() == primary_name {
                primary_order.push(id.clone());
            }
            entities.insert(id, entity);
        }
    }

    // Step 4+5: resolve forward references and wire reverse back-edges.
    for table in tables {
        for reference in table.references() {
            let Some(source_field) = reference.source_fields().first().copied() else {
                continue;
            };
            let target = reference.target_table();
            let ids: Vec<EntityId> = entities
                .keys()
                .filter(|id| id.table == table.name())
                .cloned()
                .collect();
            for id in ids {
                let entity = entities.get(&id).expect("just collected from map").clone();
                let fk_value = entity.get(source_field).cloned();
                let forward = match fk_value {
                    None | Some(FieldValue::Null) => ForwardRef::Null,
                    Some(value) => match field_value_to_lookup_key(&value) {
                        None => ForwardRef::Unresolved(value),
                        Some(fk_db) => {
                            let target_id = EntityId {
                                table: target.name().to_string(),
                                pk: fk_db,
                            };
                            match entities.get(&target_id) {
                                Some(target_entity) => {
                                    if let Some(reverse_role) = reference.reverse_role() {
                                        target_entity.push_reverse(reverse_role, entity.clone());
                                    }
                                    ForwardRef::Resolved(target_entity.clone())
                                }
                                None => ForwardRef::Unresolved(value),
                            }
                        }
                    },
                };
                entity.set_forward(reference.forward_role(), forward);
            }
        }
    }

    Ok(primary_order
        .into_iter()
        .map(|id| entities.get(&id).expect("inserted above").clone())
        .collect())
}

fn decode_row(
    table: &dyn TableInfo,
    row: Row,
    codec: &dyn DialectCodec,
) -> Result<crate::mutate::DecodedRow> {
    let mut out = crate::mutate::DecodedRow::new();
    for (key, value) in row {
        match table.field(&key) {
            Some(field) => {
                out.insert(key, decode_field(field, value, codec)?);
            }
            None => {
                // Derived columns aren't `FieldInfo`s; decode them with
                // their declared type via the owning `DerivedColumnInfo`.
                if let Some(derived) = table.derived_columns().iter().find(|d| d.name() == key) {
                    out.insert(
                        key,
                        crate::codec::default_decode(derived.name(), derived.declared_type(), value)?,
                    );
                } else {
                    out.insert(key, crate::codec::default_decode(&key, crate::dialect::DeclaredType::Text, value)?);
                }
            }
        }
    }
    Ok(out)
}
