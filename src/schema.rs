//! The schema registry: everything learned about the database at startup.
//!
//! A [`Schema`] is built once through [`SchemaBuilder::initialize`] and is
//! immutable afterwards. Cloning it is cheap; cursors and entities each hold
//! a clone.

use crate::backend::{Backend, ColumnInfo, SqlQuery, Transaction};
use crate::config::{MapperConfig, SchemaOptions};
use crate::cursor::Cursor;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::relations::{ManualRelation, RelationGraph};
use crate::value::Row;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Per-table customization registered on the builder.
pub trait TableBinding: Send + Sync {
    /// Name reported by cursors over the bound table.
    fn name(&self) -> &str;

    /// Relations to declare for the bound table during initialization.
    fn manual_relations(&self) -> Vec<ManualRelation> {
        Vec::new()
    }

    /// Adjust every cursor handed out for the bound table.
    fn prepare_cursor(&self, cursor: Cursor) -> Cursor {
        cursor
    }

    /// Adjust every entity of the bound table, including entities read as
    /// related rows of another table.
    fn prepare_entity(&self, entity: Entity) -> Entity {
        entity
    }
}

struct SchemaInner {
    backend: Arc<dyn Backend>,
    columns: BTreeMap<String, BTreeMap<String, ColumnInfo>>,
    primary_keys: BTreeMap<String, Vec<String>>,
    relations: RelationGraph,
    bindings: BTreeMap<String, Arc<dyn TableBinding>>,
    options: SchemaOptions,
    log: Logger,
}

#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("backend", &self.inner.backend.name())
            .field("tables", &self.inner.columns.keys().collect::<Vec<_>>())
            .field("options", &self.inner.options)
            .finish()
    }
}

/// Collects bindings and manual relations before the schema is read.
pub struct SchemaBuilder {
    backend: Arc<dyn Backend>,
    options: SchemaOptions,
    log: Logger,
    bindings: BTreeMap<String, Arc<dyn TableBinding>>,
    manual: Vec<(String, ManualRelation)>,
}

impl SchemaBuilder {
    /// Register a binding for `table`, replacing any earlier one.
    pub fn bind(mut self, table: &str, binding: Arc<dyn TableBinding>) -> Self {
        self.bindings.insert(table.to_string(), binding);
        self
    }

    pub fn manual_relation(mut self, table: &str, relation: ManualRelation) -> Self {
        self.manual.push((table.to_string(), relation));
        self
    }

    /// Read tables, columns and primary keys from the backend and build the
    /// relation graph. Nothing is exposed if any step fails.
    pub async fn initialize(self) -> Result<Schema> {
        let backend = self.backend;
        let wrap = |what: &'static str| {
            move |source: Error| Error::Initialization {
                what,
                source: Box::new(source),
            }
        };

        let tables = backend
            .list_tables()
            .await
            .map_err(wrap("table information"))?;
        let primary_keys = backend
            .primary_keys()
            .await
            .map_err(wrap("primary keys"))?;
        let mut columns = BTreeMap::new();
        for table in tables {
            let table_columns = backend
                .list_columns(&table)
                .await
                .map_err(wrap("column information"))?;
            columns.insert(table, table_columns);
        }

        let mut relations = RelationGraph::infer(&columns, &primary_keys);
        for (table, relation) in &self.manual {
            if !columns.contains_key(table) {
                return Err(Error::Configuration(format!(
                    "Manual relation {} declared for unknown table {}",
                    relation.name, table
                )));
            }
            relations.add_manual(table, relation)?;
        }
        for (table, binding) in &self.bindings {
            if !columns.contains_key(table) {
                return Err(Error::Configuration(format!(
                    "Binding {} registered for unknown table {}",
                    binding.name(),
                    table
                )));
            }
            for relation in binding.manual_relations() {
                relations.add_manual(table, &relation)?;
            }
        }

        self.log.info(format!(
            "{} schema loaded: {} tables, {} with primary keys",
            backend.name(),
            columns.len(),
            primary_keys.len()
        ));

        Ok(Schema {
            inner: Arc::new(SchemaInner {
                backend,
                columns,
                primary_keys,
                relations,
                bindings: self.bindings,
                options: self.options,
                log: self.log,
            }),
        })
    }
}

impl Schema {
    /// Start building a schema over `backend`. Fails on an unknown log level.
    pub fn builder(backend: Arc<dyn Backend>, options: SchemaOptions) -> Result<SchemaBuilder> {
        let log = Logger::from_config(options.logging_level.as_deref())?;
        Ok(SchemaBuilder {
            backend,
            options,
            log,
            bindings: BTreeMap::new(),
            manual: Vec::new(),
        })
    }

    /// Open the configured backend and initialize a schema without bindings.
    pub async fn connect(config: &MapperConfig) -> Result<Schema> {
        let backend = config.backend.open()?;
        Schema::builder(backend, config.schema.clone())?
            .initialize()
            .await
    }

    /// A fresh cursor over `table`.
    pub fn cursor(&self, table: &str) -> Result<Cursor> {
        if !self.inner.columns.contains_key(table) {
            return Err(Error::TableNotFound(table.to_string()));
        }
        let binding = self.inner.bindings.get(table).cloned();
        let cursor = Cursor::new(self.clone(), table, binding.clone());
        Ok(match binding {
            Some(binding) => binding.prepare_cursor(cursor),
            None => cursor,
        })
    }

    pub(crate) fn prepare_entity(&self, entity: Entity) -> Entity {
        match self.inner.bindings.get(entity.table()) {
            Some(binding) => binding.prepare_entity(entity),
            None => entity,
        }
    }

    pub fn tables(&self) -> Vec<&str> {
        self.inner.columns.keys().map(String::as_str).collect()
    }

    pub fn columns(&self, table: &str) -> Option<&BTreeMap<String, ColumnInfo>> {
        self.inner.columns.get(table)
    }

    /// Primary keys as reported by the backend.
    pub fn primary_keys(&self) -> &BTreeMap<String, Vec<String>> {
        &self.inner.primary_keys
    }

    /// Key columns used to address single rows of `table`: the reported
    /// primary key, else an `id` column, else none.
    pub fn primary_key(&self, table: &str) -> Vec<String> {
        if let Some(keys) = self.inner.primary_keys.get(table) {
            if !keys.is_empty() {
                return keys.clone();
            }
        }
        match self.inner.columns.get(table) {
            Some(columns) if columns.contains_key("id") => vec!["id".to_string()],
            _ => Vec::new(),
        }
    }

    pub fn relations(&self) -> &RelationGraph {
        &self.inner.relations
    }

    /// Columns, primary keys and relations as one JSON document.
    pub fn schema_info(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "backend": self.inner.backend.name(),
            "columns": serde_json::to_value(&self.inner.columns)?,
            "primary_keys": serde_json::to_value(&self.inner.primary_keys)?,
            "relations": serde_json::to_value(&self.inner.relations)?,
        }))
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.inner.options
    }

    pub fn log(&self) -> &Logger {
        &self.inner.log
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Run a statement directly against the backend.
    pub async fn raw(&self, query: &SqlQuery, transaction: Option<&Transaction>) -> Result<Vec<Row>> {
        self.inner.log.debug(format!("raw: {}", query.statement));
        self.inner.backend.raw(query, transaction).await
    }

    /// Run `body` inside a backend transaction.
    ///
    /// Commits when the body returns `Ok`. On `Err` every write made with the
    /// handle is rolled back and the body's error comes back wrapped in
    /// [`Error::TransactionAborted`].
    pub async fn transaction<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let backend = &self.inner.backend;
        let transaction = backend.begin().await?;
        self.inner
            .log
            .debug(format!("transaction {} started", transaction.id()));

        match body(transaction.clone()).await {
            Ok(value) => {
                let id = transaction.id();
                if let Err(err) = backend.commit(transaction.clone()).await {
                    self.inner
                        .log
                        .warn(format!("transaction {} failed to commit: {}", id, err));
                    if let Err(rollback) = backend.rollback(transaction).await {
                        self.inner.log.warn(format!(
                            "transaction {} rollback after failed commit: {}",
                            id, rollback
                        ));
                    }
                    return Err(err);
                }
                self.inner.log.debug(format!("transaction {} committed", id));
                Ok(value)
            }
            Err(err) => {
                self.inner.log.warn(format!(
                    "transaction {} rolled back: {:#}",
                    transaction.id(),
                    err
                ));
                if let Err(rollback) = backend.rollback(transaction.clone()).await {
                    self.inner.log.warn(format!(
                        "transaction {} could not be rolled back: {}",
                        transaction.id(),
                        rollback
                    ));
                }
                Err(Error::TransactionAborted { source: err.into() })
            }
        }
    }
}
