//! `lattice-core`: a dialect-agnostic SQL data access core built on a
//! template/fragment algebra, a schema capability interface supplied by
//! application code, and the mutation/query/normalisation engines that
//! operate over it.
//!
//! This crate deliberately does not declare any concrete table — the
//! typed schema declaration surface is an application-level concern
//! (out of scope; see [`schema`] for the capability traits an application
//! implements instead).

pub mod cascade;
pub mod codec;
pub mod database;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod mutate;
pub mod normalize;
pub mod query;
pub mod render;
pub mod schema;
pub mod template;
pub mod value;

/// Common imports for application code wiring a concrete dialect crate
/// against this core.
pub mod prelude {
    pub use crate::cascade::{cascade_soft_delete, cascade_soft_delete_where, Registry};
    pub use crate::codec::{DefaultDialectCodec, DialectCodec};
    pub use crate::database::{Database, Scoped};
    pub use crate::dialect::{DeclaredType, Dialect, DialectKind};
    pub use crate::driver::{Driver, MigrationLock, Row};
    pub use crate::error::{LatticeError, Result};
    pub use crate::mutate::{Engine as MutationEngine, MutationData, Operation};
    pub use crate::normalize::{Entity, EntityId, ForwardRef};
    pub use crate::query::QueryEngine;
    pub use crate::render::{render, Rendered};
    pub use crate::schema::{
        DerivedColumnInfo, FieldInfo, Marker, MarkerOp, OnDelete, ReferenceInfo, TableInfo, TableKind,
    };
    pub use crate::template::{Template, TemplateBuilder};
    pub use crate::value::{Builtin, DbValue, FieldValue, Value};
}
