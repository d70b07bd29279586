//! Error taxonomy surfaced to callers of the mutation, query, normaliser and
//! ensure engines. Every variant names the offending table/field where one
//! is known, per the "actionable error" requirement.

use thiserror::Error;

/// Core error type for lattice operations.
#[derive(Debug, Error)]
pub enum LatticeError {
    /// Input record failed the declared schema.
    #[error("validation failed for `{table}.{field}`: {reason}")]
    Validation {
        table: String,
        field: String,
        reason: String,
    },

    /// Mutation attempted against a read-only view/partial/derived table,
    /// or some other caller-side misconfiguration (missing primary key, no
    /// soft-delete field, empty update, encode/decode conflicts, role-name
    /// collisions, ...).
    #[error("configuration error on `{table}`: {reason}")]
    Configuration { table: String, reason: String },

    /// An optional driver capability was required but not implemented.
    #[error("dialect `{dialect}` does not support `{capability}`")]
    DialectUnsupported {
        dialect: &'static str,
        capability: &'static str,
    },

    /// Propagated verbatim from the database.
    #[error("constraint violation ({kind}) on `{table}`{column}: {message}")]
    ConstraintViolation {
        kind: ConstraintKind,
        table: String,
        column: Option<String>,
        constraint: Option<String>,
        message: String,
    },

    /// Raised by the ensure engine before applying a constraint that would
    /// fail against existing data.
    #[error(
        "refusing to add constraint `{constraint}` on `{table}`: {violation_count} existing row(s) would violate it (probe: {query})"
    )]
    ConstraintPreflight {
        table: String,
        constraint: String,
        violation_count: u64,
        query: String,
    },

    /// `ensure_table` found an existing table missing declared constraints.
    #[error(
        "schema drift on `{table}`: {description}; call ensure_constraints(\"{table}\") to remediate"
    )]
    SchemaDrift { table: String, description: String },

    /// Any DDL step failure while ensuring a table, constraint, or view.
    #[error("ensure failed during `{operation}` on `{table}` (step {step}): {message}")]
    Ensure {
        operation: &'static str,
        table: String,
        step: usize,
        message: String,
    },

    /// Raw joined rows reference a table not in the queried set.
    #[error("normalisation error: unexpected table(s) in result set: {0:?}")]
    Normalisation(Vec<String>),

    /// JSON parse failure or invalid date while decoding a column.
    #[error("decoding error on field `{field}`: {reason} (input: {truncated_input})")]
    Decoding {
        field: String,
        reason: String,
        truncated_input: String,
    },

    /// `open()` called twice on the same migration controller.
    #[error("migration controller already opened")]
    MigrationAlreadyOpen,

    /// Underlying driver/transport failure.
    #[error("driver error: {0}")]
    Driver(String),

    /// JSON (de)serialisation failure not tied to a specific field.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structured kind of a database-reported constraint violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
}

impl core::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign_key",
            ConstraintKind::NotNull => "not_null",
        })
    }
}

impl LatticeError {
    pub fn configuration(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(
        table: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            table: table.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = core::result::Result<T, LatticeError>;
