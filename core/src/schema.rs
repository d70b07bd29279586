//! Schema Capability Interface (C4): the read-only polymorphic view the
//! core consumes a table through. Concrete tables are supplied by
//! application code (out of scope, §1) and simply implement [`TableInfo`].

use crate::dialect::DeclaredType;
use crate::error::{LatticeError, Result};
use crate::template::Template;
use crate::value::{Builtin, DbValue, FieldValue};

/// Which operations a table view permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Full table: inserts, updates, deletes all permitted.
    Full,
    /// A projection of a full table; mutations forbidden.
    Partial { source_table: &'static str },
    /// Includes synthesised expression columns; mutations forbidden.
    Derived,
    /// Created from a full table with an additional WHERE clause; mutations
    /// forbidden; must be ensured separately.
    View,
}

impl TableKind {
    pub fn is_mutable(&self) -> bool {
        matches!(self, TableKind::Full)
    }
}

/// Which mutation a schema marker resolves for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOp {
    Inserted,
    Updated,
    Upserted,
}

/// What a schema marker supplies when the caller omits a field (§4.5 step 2).
#[derive(Clone)]
pub enum Marker {
    Expression(Template),
    Builtin(Builtin),
    Function(std::sync::Arc<dyn Fn() -> FieldValue + Send + Sync>),
}

impl core::fmt::Debug for Marker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Marker::Expression(t) => f.debug_tuple("Expression").field(t).finish(),
            Marker::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            Marker::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl Marker {
    /// Resolves this marker into the value that should be injected for the
    /// missing field.
    pub fn resolve(&self) -> FieldValue {
        match self {
            Marker::Expression(t) => FieldValue::Expression(t.clone()),
            Marker::Builtin(b) => FieldValue::Builtin(*b),
            Marker::Function(f) => f(),
        }
    }
}

/// Per-field metadata exposed by a table.
pub trait FieldInfo: Send + Sync {
    fn name(&self) -> &str;
    fn nullable(&self) -> bool;
    fn auto_increment(&self) -> bool;
    fn unique(&self) -> bool;
    fn declared_type(&self) -> DeclaredType;

    /// The marker declared for this field under the given operation, if
    /// any (§4.5 step 2: insert looks up `inserted` else `upserted`;
    /// update/soft-delete looks up `updated` else `upserted`).
    fn marker(&self, op: MarkerOp) -> Option<Marker> {
        let _ = op;
        None
    }

    /// True if the field declares a custom encode or decode hook. Such a
    /// field must not accept a `DBExpression`/`Builtin` at mutation time
    /// (§4.4 rule).
    fn has_custom_codec(&self) -> bool {
        false
    }

    /// Custom encoder, if declared; wins over dialect/default encoding.
    fn encode(&self, value: &FieldValue) -> Option<Result<DbValue>> {
        let _ = value;
        None
    }

    /// Custom decoder, if declared; wins over dialect/default decoding.
    fn decode(&self, value: &DbValue) -> Option<Result<FieldValue>> {
        let _ = value;
        None
    }
}

/// On-delete policy for an outgoing foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    Restrict,
    SetNull,
    NoAction,
}

/// An outgoing reference from one table to another (§3 "References").
pub trait ReferenceInfo: Send + Sync {
    fn source_fields(&self) -> &[&str];
    fn target_table(&self) -> &'static dyn TableInfo;
    fn target_fields(&self) -> &[&str];
    /// How the referenced entity appears on the referring entity.
    fn forward_role(&self) -> &str;
    /// How the referring entity collection appears on the referenced
    /// entity, if a reverse role was declared.
    fn reverse_role(&self) -> Option<&str> {
        None
    }
    fn on_delete(&self) -> OnDelete;
}

/// A lazily-computed, non-enumerable derived column (§3).
pub trait DerivedColumnInfo: Send + Sync {
    fn name(&self) -> &str;
    fn declared_type(&self) -> DeclaredType;
    /// Builds the SELECT-list expression for this derived column, given the
    /// table alias it is being projected from.
    fn template(&self, table_alias: &str) -> Template;
}

/// Read-only view a table exposes to the core (§3 "Table capability").
pub trait TableInfo: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> TableKind;
    /// Ordered, non-derived fields.
    fn fields(&self) -> &[&'static dyn FieldInfo];
    fn primary_key(&self) -> Option<&str>;
    fn indexed(&self) -> &[&str] {
        &[]
    }
    fn unique_constraints(&self) -> &[&[&str]] {
        &[]
    }
    fn references(&self) -> &[&'static dyn ReferenceInfo] {
        &[]
    }
    fn soft_delete_field(&self) -> Option<&str> {
        None
    }
    fn derived_columns(&self) -> &[&'static dyn DerivedColumnInfo] {
        &[]
    }

    fn field(&self, name: &str) -> Option<&'static dyn FieldInfo> {
        self.fields().iter().copied().find(|f| f.name() == name)
    }

    /// Validates that no forward/reverse role name collides with a field
    /// name on this table (§3 References invariant). Schema-definition
    /// errors of this kind are caught once, at registration time, rather
    /// than on every mutation/query.
    fn validate_role_names(&self) -> Result<()> {
        for reference in self.references() {
            if self.field(reference.forward_role()).is_some() {
                return Err(LatticeError::configuration(
                    self.name(),
                    format!(
                        "forward role `{}` collides with a field name",
                        reference.forward_role()
                    ),
                ));
            }
            if let Some(reverse) = reference.reverse_role()
                && self.field(reverse).is_some()
            {
                return Err(LatticeError::configuration(
                    self.name(),
                    format!("reverse role `{reverse}` collides with a field name"),
                ));
            }
        }
        Ok(())
    }

    /// Rejects a mutation on a non-[`TableKind::Full`] table with the
    /// taxonomy error naming the operation and table (§4.5 step 1).
    fn require_mutable(&self, operation: &str) -> Result<()> {
        if self.kind().is_mutable() {
            return Ok(());
        }
        let reason = match self.kind() {
            TableKind::Partial { source_table } => {
                format!("`{operation}` is not allowed on partial projection of `{source_table}`")
            }
            TableKind::Derived => format!("`{operation}` is not allowed on a derived table"),
            TableKind::View => format!("`{operation}` is not allowed on a view"),
            TableKind::Full => unreachable!(),
        };
        Err(LatticeError::configuration(self.name(), reason))
    }
}
