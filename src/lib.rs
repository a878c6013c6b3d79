//! Relational mapping over pluggable storage backends.
//!
//! # Intention
//!
//! - Read the tables, columns and primary keys of a database once and infer
//!   the relations between tables from `<table>_id` columns.
//! - Offer immutable, chainable [`Cursor`]s that turn filters and included
//!   relations into backend reads and writes.
//! - Hand back [`Entity`] values whose columns are coerced to their declared
//!   types and whose related rows are nested under accessor names.
//!
//! # Architectural Boundaries
//!
//! - SQL text and connection handling belong to a [`Backend`]; the engine
//!   only builds validated [`QuerySpec`]s.
//! - [`SqliteBackend`] is the bundled backend. Others implement the same
//!   trait.
//! - No schema migrations and no code generation.

pub mod backend;
pub mod config;
pub mod cursor;
pub mod entity;
pub mod error;
pub mod grouping;
pub mod inflect;
pub mod logging;
pub mod query;
pub mod relations;
pub mod schema;
pub mod sqlite;
pub mod value;

pub use backend::{
    Backend, ColumnInfo, DataType, Join, Params, QueryOptions, QuerySpec, SqlQuery, Transaction,
};
pub use config::{BackendConfig, MapperConfig, SchemaOptions};
pub use cursor::Cursor;
pub use entity::Entity;
pub use error::{Error, Result};
pub use grouping::{group_rows, GroupedRecord};
pub use inflect::{accessor_names, AccessorNames};
pub use logging::{LogLevel, Logger};
pub use query::{Filters, Predicate};
pub use relations::{JoinKey, ManualRelation, RelationDescriptor, RelationGraph};
pub use schema::{Schema, SchemaBuilder, TableBinding};
pub use sqlite::{SqliteBackend, SqliteConfig};
pub use value::{attributes, Attributes, Row, Value};
