//! Chainable, immutable queries over one table.
//!
//! Every chaining call returns a new [`Cursor`]; the receiver is never
//! changed. Reads and writes take an optional transaction handle which is
//! used for that call only.

use crate::backend::{Join, QueryOptions, QuerySpec, SqlQuery, Transaction};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::grouping::group_rows;
use crate::query::{Filters, Predicate};
use crate::schema::{Schema, TableBinding};
use crate::value::{Attributes, Row, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Joins the parent alias and segment name of a hop whose segment name is
/// already in use, e.g. `recipient/user_role`.
pub const PATH_SEPARATOR: char = '/';

pub struct Cursor {
    schema: Schema,
    table: String,
    binding: Option<Arc<dyn TableBinding>>,
    filters: BTreeMap<String, Predicate>,
    relations: Vec<String>,
    joins: Vec<Join>,
    options: QueryOptions,
    results: Arc<Mutex<Vec<Entity>>>,
}

/// Copies the query state; the copy starts with an empty result cache.
impl Clone for Cursor {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            table: self.table.clone(),
            binding: self.binding.clone(),
            filters: self.filters.clone(),
            relations: self.relations.clone(),
            joins: self.joins.clone(),
            options: self.options.clone(),
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("table", &self.table)
            .field("binding", &self.binding_name())
            .field("filters", &self.filters)
            .field("relations", &self.relations)
            .field("options", &self.options)
            .finish()
    }
}

/// Prepare a filter operand or written value for the backend.
fn normalize_value(attribute: &str, value: Value, serialize_objects: bool) -> Result<Value> {
    match value {
        Value::Object(object) if serialize_objects => Ok(Value::Text(serde_json::to_string(&object)?)),
        Value::Object(_) => Err(Error::InvalidArgument(format!(
            "The value for {} is an object, and serialization is turned off",
            attribute
        ))),
        Value::List(_) => Err(Error::InvalidArgument(format!(
            "The value for {} is a list; use an 'in' condition",
            attribute
        ))),
        other => Ok(other),
    }
}

impl Cursor {
    pub(crate) fn new(schema: Schema, table: &str, binding: Option<Arc<dyn TableBinding>>) -> Self {
        Self {
            schema,
            table: table.to_string(),
            binding,
            filters: BTreeMap::new(),
            relations: Vec::new(),
            joins: Vec::new(),
            options: QueryOptions::default(),
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Name of the table binding, `default` when the table has none.
    pub fn binding_name(&self) -> &str {
        self.binding.as_ref().map_or("default", |b| b.name())
    }

    pub fn filters(&self) -> &BTreeMap<String, Predicate> {
        &self.filters
    }

    /// Included relation paths, as requested.
    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    /// Validated join hops for the included relations.
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn query_options(&self) -> &QueryOptions {
        &self.options
    }

    /// The arguments a read would hand to the backend.
    pub fn query_spec(&self) -> QuerySpec {
        QuerySpec {
            table: self.table.clone(),
            filters: self.filters.clone(),
            joins: self.joins.clone(),
            options: self.options.clone(),
        }
    }

    /// Merge `filters` into a new cursor. Unset entries remove a filter.
    ///
    /// Booleans become `0`/`1`. Objects are stored as JSON text when the
    /// schema serializes objects and rejected otherwise.
    pub fn filter(&self, filters: Filters) -> Result<Cursor> {
        let serialize = self.schema.options().serialize_objects;
        let mut next = self.clone();
        for (attribute, predicate) in filters.into_entries() {
            match predicate {
                None => {
                    next.filters.remove(&attribute);
                }
                Some(predicate) => {
                    let predicate = predicate.try_map_values(|value| match value {
                        Value::Boolean(b) => Ok(Value::Integer(i64::from(b))),
                        other => normalize_value(&attribute, other, serialize),
                    })?;
                    next.filters.insert(attribute, predicate);
                }
            }
        }
        self.schema
            .log()
            .trace(format!("{}: filters {:?}", self.table, next.filters));
        Ok(next)
    }

    pub fn clear_filters(&self) -> Cursor {
        let mut next = self.clone();
        next.filters.clear();
        next
    }

    /// Include relation chains such as `user_role:role`. An empty list
    /// clears every included relation.
    pub fn with<I, S>(&self, relations: I) -> Result<Cursor>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested: Vec<String> = relations
            .into_iter()
            .map(|r| r.as_ref().to_string())
            .collect();
        if requested.is_empty() {
            return Ok(self.clear_relations());
        }

        let mut next = self.clone();
        for chain in requested {
            let mut parent = self.table.clone();
            for mut join in self.schema.relations().resolve_chain(&self.table, &chain)? {
                join.parent = parent;
                let taken = |alias: &str, join: &Join| {
                    alias == self.table
                        || next.joins.iter().any(|j| j.alias == alias && j != join)
                };
                if taken(&join.alias, &join) {
                    // Repeated segment names are aliased by their path.
                    let path = format!("{}{}{}", join.parent, PATH_SEPARATOR, join.alias);
                    if taken(&path, &Join { alias: path.clone(), ..join.clone() }) {
                        return Err(Error::InvalidArgument(format!(
                            "Relation {} on {} clashes with an included relation at {}",
                            chain, self.table, path
                        )));
                    }
                    join.alias = path;
                }
                parent = join.alias.clone();
                if !next.joins.contains(&join) {
                    next.joins.push(join);
                }
            }
            if !next.relations.contains(&chain) {
                next.relations.push(chain);
            }
        }
        self.schema
            .log()
            .trace(format!("{}: relations {:?}", self.table, next.relations));
        Ok(next)
    }

    pub fn clear_relations(&self) -> Cursor {
        let mut next = self.clone();
        next.relations.clear();
        next.joins.clear();
        next
    }

    /// Overlay backend options; unset fields keep their current value.
    pub fn options(&self, options: QueryOptions) -> Cursor {
        let mut next = self.clone();
        next.options = self.options.merged(options);
        next
    }

    pub fn clear_options(&self) -> Cursor {
        let mut next = self.clone();
        next.options = QueryOptions::default();
        next
    }

    /// Drop filters, relations and options.
    pub fn clear(&self) -> Cursor {
        Cursor::new(self.schema.clone(), &self.table, self.binding.clone())
    }

    /// This cursor with every call bound to `transaction`.
    pub fn in_transaction(&self, transaction: &Transaction) -> Cursor {
        self.options(QueryOptions::new().with_transaction(transaction.clone()))
    }

    fn spec_for(&self, transaction: Option<&Transaction>) -> QuerySpec {
        let mut spec = self.query_spec();
        if let Some(transaction) = transaction {
            spec.options.transaction = Some(transaction.clone());
        }
        spec
    }

    fn transaction_for<'a>(&'a self, transaction: Option<&'a Transaction>) -> Option<&'a Transaction> {
        transaction.or(self.options.transaction.as_ref())
    }

    fn materialize(&self, rows: Vec<Row>) -> Result<Vec<Entity>> {
        let row_count = rows.len();
        let records = group_rows(&self.table, rows)?;
        self.schema.log().trace(format!(
            "{}: grouped {} rows into {} records",
            self.table,
            row_count,
            records.len()
        ));
        Ok(records
            .into_iter()
            .map(|record| Entity::materialize(&self.schema, &self.table, record, &self.joins))
            .collect())
    }

    fn remember(&self, entities: &[Entity]) {
        if self.schema.options().cache_results {
            let mut cache = self.results.lock().unwrap_or_else(PoisonError::into_inner);
            *cache = entities.to_vec();
        }
    }

    /// Every matching row.
    pub async fn all(&self, transaction: Option<&Transaction>) -> Result<Vec<Entity>> {
        let spec = self.spec_for(transaction);
        self.schema.log().debug(format!("all() on {}", self.table));
        let rows = self.schema.backend().all(&spec).await?;
        let entities = self.materialize(rows)?;
        self.remember(&entities);
        Ok(entities)
    }

    pub async fn count(&self, transaction: Option<&Transaction>) -> Result<u64> {
        let spec = self.spec_for(transaction);
        self.schema.log().debug(format!("count() on {}", self.table));
        self.schema.backend().count(&spec).await
    }

    /// The first match, if any.
    ///
    /// With relations included every row is read so that the first record
    /// keeps all of its children.
    pub async fn first(&self, transaction: Option<&Transaction>) -> Result<Option<Entity>> {
        if !self.joins.is_empty() {
            let mut entities = self.all(transaction).await?;
            entities.truncate(1);
            self.remember(&entities);
            return Ok(entities.pop());
        }

        let spec = self.spec_for(transaction);
        self.schema.log().debug(format!("first() on {}", self.table));
        let row = self.schema.backend().first(&spec).await?;
        let entities = self.materialize(row.into_iter().collect())?;
        self.remember(&entities);
        Ok(entities.into_iter().next())
    }

    /// At most one match; more than one is an error.
    pub async fn one(&self, transaction: Option<&Transaction>) -> Result<Option<Entity>> {
        let mut entities = self.all(transaction).await?;
        if entities.len() > 1 {
            return Err(Error::cardinality("one", &self.table, "multiple results"));
        }
        Ok(entities.pop())
    }

    /// Exactly one match.
    pub async fn only_one(&self, transaction: Option<&Transaction>) -> Result<Entity> {
        let mut entities = self.all(transaction).await?;
        match entities.len() {
            0 => Err(Error::cardinality("only_one", &self.table, "no result")),
            1 => Ok(entities.remove(0)),
            _ => Err(Error::cardinality("only_one", &self.table, "multiple results")),
        }
    }

    /// Succeeds only when nothing matches.
    pub async fn none(&self, transaction: Option<&Transaction>) -> Result<()> {
        if self.count(transaction).await? > 0 {
            return Err(Error::cardinality("none", &self.table, "results"));
        }
        self.remember(&[]);
        Ok(())
    }

    /// Insert one row. Equality filters on the cursor are part of the row.
    pub async fn create(&self, attributes: Attributes, transaction: Option<&Transaction>) -> Result<Entity> {
        let serialize = self.schema.options().serialize_objects;
        let mut values = Attributes::new();
        for (attribute, predicate) in &self.filters {
            match predicate {
                Predicate::Equal(value) if !attribute.contains('.') => {
                    values.insert(attribute.clone(), value.clone());
                }
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "Cannot create a {} row through a cursor filtered with {} {}",
                        self.table,
                        attribute,
                        other.operator()
                    )))
                }
            }
        }
        for (attribute, value) in attributes {
            let value = normalize_value(&attribute, value, serialize)?;
            values.insert(attribute, value);
        }

        self.schema.log().debug(format!("create() on {}", self.table));
        let rows = self
            .schema
            .backend()
            .create(&self.table, &values, self.transaction_for(transaction))
            .await?;
        let entities = self.materialize(rows)?;
        self.remember(&entities);
        entities
            .into_iter()
            .next()
            .ok_or_else(|| Error::cardinality("create", &self.table, "no result"))
    }

    /// Update every row the cursor matches and return them as stored.
    pub async fn update_all(
        &self,
        new_attributes: Attributes,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Entity>> {
        let serialize = self.schema.options().serialize_objects;
        let new_attributes = new_attributes
            .into_iter()
            .map(|(attribute, value)| {
                let value = normalize_value(&attribute, value, serialize)?;
                Ok((attribute, value))
            })
            .collect::<Result<Attributes>>()?;

        self.schema.log().debug(format!("update_all() on {}", self.table));
        let rows = self
            .schema
            .backend()
            .update(
                &self.table,
                &self.filters,
                &new_attributes,
                self.transaction_for(transaction),
            )
            .await?;
        let entities = self.materialize(rows)?;
        self.remember(&entities);
        Ok(entities)
    }

    /// Delete every row matching the cursor's filters plus `filters`.
    pub async fn destroy_all(&self, filters: Filters, transaction: Option<&Transaction>) -> Result<()> {
        let scoped = self.filter(filters)?;
        self.schema.log().debug(format!("destroy_all() on {}", self.table));
        self.schema
            .backend()
            .destroy(&self.table, &scoped.filters, self.transaction_for(transaction))
            .await?;
        self.remember(&[]);
        Ok(())
    }

    pub async fn raw(&self, query: &SqlQuery, transaction: Option<&Transaction>) -> Result<Vec<Row>> {
        self.schema.raw(query, self.transaction_for(transaction)).await
    }

    /// Entities from the last read or write, when result caching is on.
    pub fn results(&self) -> Vec<Entity> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn to_objects(&self) -> serde_json::Value {
        self.results().iter().map(Entity::to_object).collect()
    }
}
