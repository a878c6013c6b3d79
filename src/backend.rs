//! The storage contract the mapping engine is written against.
//!
//! Everything dialect-specific (SQL text, identifier quoting, how a
//! transaction is opened) lives behind [`Backend`]. The engine only hands
//! over validated [`QuerySpec`]s and gets flat rows back.

use crate::error::Result;
use crate::query::Predicate;
use crate::relations::RelationDescriptor;
use crate::value::{Attributes, Row, Value};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Handle on an open backend transaction.
///
/// Handles are issued by [`Backend::begin`] and only mean something to the
/// backend that issued them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Backend options carried by a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub transaction: Option<Transaction>,
    pub limit: Option<u32>,
    /// (column, is_ascending)
    pub order_by: Vec<(String, bool)>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, column: &str, ascending: bool) -> Self {
        self.order_by.push((column.to_string(), ascending));
        self
    }

    /// Overlay `other` on top of `self`; fields `other` leaves unset are kept.
    pub(crate) fn merged(&self, other: QueryOptions) -> QueryOptions {
        QueryOptions {
            transaction: other.transaction.or_else(|| self.transaction.clone()),
            limit: other.limit.or(self.limit),
            order_by: if other.order_by.is_empty() {
                self.order_by.clone()
            } else {
                other.order_by
            },
        }
    }
}

/// One validated join hop: `alias` is joined onto `parent` (an alias already
/// present in the query) following `descriptor`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Join {
    pub parent: String,
    pub alias: String,
    pub descriptor: RelationDescriptor,
}

/// Everything a backend needs to run a read.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub table: String,
    pub filters: BTreeMap<String, Predicate>,
    pub joins: Vec<Join>,
    pub options: QueryOptions,
}

impl QuerySpec {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: BTreeMap::new(),
            joins: Vec::new(),
            options: QueryOptions::default(),
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.options.transaction.as_ref()
    }
}

/// Declared column types, classified from the backend's type names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DataType {
    Boolean,
    Integer,
    Real,
    Text,
    Blob,
    Other,
}

impl DataType {
    pub fn from_declared(declared: &str) -> Self {
        let lower = declared.trim().to_ascii_lowercase();
        let base = lower.split('(').next().unwrap_or_default().trim();
        match base {
            "boolean" | "bool" => DataType::Boolean,
            "integer" | "int" | "bigint" | "smallint" | "tinyint" | "mediumint" | "int2" | "int4"
            | "int8" => DataType::Integer,
            "real" | "double" | "double precision" | "float" | "numeric" | "decimal" => {
                DataType::Real
            }
            "text" | "varchar" | "char" | "character varying" | "clob" | "string" => {
                DataType::Text
            }
            "blob" | "bytea" | "binary" | "varbinary" => DataType::Blob,
            _ => DataType::Other,
        }
    }
}

/// Per-column metadata reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    /// Lowercased type name as declared.
    pub declared_type: String,
    pub data_type: DataType,
    pub default_value: Option<Value>,
}

impl ColumnInfo {
    pub fn new(declared_type: &str, default_value: Option<Value>) -> Self {
        Self {
            declared_type: declared_type.to_ascii_lowercase(),
            data_type: DataType::from_declared(declared_type),
            default_value,
        }
    }
}

/// Parameter bindings for SQL queries
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: HashMap<String, Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a named value
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }
}

/// A raw statement with named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// Storage implementation consumed by the mapping engine.
///
/// Reads return rows keyed `<alias>:<column>`, the base table using its own
/// name as alias. Writes return the affected rows in the same shape. Every
/// call either runs inside the given transaction or opens and closes its
/// own.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn all(&self, query: &QuerySpec) -> Result<Vec<Row>>;

    async fn count(&self, query: &QuerySpec) -> Result<u64>;

    async fn first(&self, query: &QuerySpec) -> Result<Option<Row>>;

    async fn create(
        &self,
        table: &str,
        attributes: &Attributes,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>>;

    async fn update(
        &self,
        table: &str,
        filters: &BTreeMap<String, Predicate>,
        new_attributes: &Attributes,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>>;

    async fn destroy(
        &self,
        table: &str,
        filters: &BTreeMap<String, Predicate>,
        transaction: Option<&Transaction>,
    ) -> Result<()>;

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn list_columns(&self, table: &str) -> Result<BTreeMap<String, ColumnInfo>>;

    /// Table to ordered primary-key columns; tables without one are absent.
    async fn primary_keys(&self) -> Result<BTreeMap<String, Vec<String>>>;

    /// Run a statement as-is. Rows are keyed by plain column name.
    async fn raw(&self, query: &SqlQuery, transaction: Option<&Transaction>) -> Result<Vec<Row>>;

    /// Open a transaction. Calls without a handle must not observe or join
    /// it; the handle has to end in `commit` or `rollback`.
    async fn begin(&self) -> Result<Transaction>;

    async fn commit(&self, transaction: Transaction) -> Result<()>;

    async fn rollback(&self, transaction: Transaction) -> Result<()>;
}
