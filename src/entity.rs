//! Materialized rows.
//!
//! An [`Entity`] holds the coerced column values of one row plus the related
//! entities it was read with. Accessors are plain lookups by name; nothing is
//! generated per table.

use crate::backend::{ColumnInfo, DataType, Join, Transaction};
use crate::error::{Error, Result};
use crate::grouping::GroupedRecord;
use crate::inflect::accessor_names;
use crate::query::Filters;
use crate::schema::Schema;
use crate::value::{attributes, Attributes, Row, Value};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    One,
    Many,
}

#[derive(Debug, Clone)]
pub struct Entity {
    schema: Schema,
    table: String,
    values: Row,
    related: Vec<(String, Vec<Entity>)>,
    /// accessor name -> (relation alias, arity)
    accessors: BTreeMap<String, (String, Arity)>,
    /// Values derived by the table's binding.
    computed: Row,
}

fn coerce(info: &ColumnInfo, value: Value) -> Value {
    match (&info.data_type, value) {
        (DataType::Boolean, value) => Value::Boolean(value.truthy()),
        (DataType::Integer, Value::Text(text)) => match text.trim().parse::<i64>() {
            Ok(parsed) => Value::Integer(parsed),
            Err(_) => Value::Text(text),
        },
        (_, value) => value,
    }
}

/// Keep the declared columns of `table`, coerced to their declared types.
fn coerce_row(schema: &Schema, table: &str, mut raw: Row) -> Row {
    let Some(columns) = schema.columns(table) else {
        return raw;
    };
    columns
        .iter()
        .map(|(name, info)| {
            let value = raw.remove(name).unwrap_or(Value::Null);
            (name.clone(), coerce(info, value))
        })
        .collect()
}

impl Entity {
    fn plain(schema: &Schema, table: &str, values: Row) -> Self {
        Self {
            schema: schema.clone(),
            table: table.to_string(),
            values: coerce_row(schema, table, values),
            related: Vec::new(),
            accessors: BTreeMap::new(),
            computed: Row::new(),
        }
    }

    /// Build an entity of `table` from a grouped record read with `joins`.
    pub(crate) fn materialize(
        schema: &Schema,
        table: &str,
        record: GroupedRecord,
        joins: &[Join],
    ) -> Self {
        let mut entity = Entity::plain(schema, table, record.values);

        for (alias, rows) in record.related {
            let join = joins.iter().find(|j| j.alias == alias);
            let child_table = join.map_or(alias.as_str(), |j| j.descriptor.table.as_str());
            let children = rows
                .into_iter()
                .map(|row| {
                    let child = Entity::plain(schema, child_table, row);
                    schema.prepare_entity(child)
                })
                .collect();

            // Direct relations name their own accessors; chain hops are
            // inflected from the alias.
            let direct = join
                .filter(|j| j.parent == table)
                .and_then(|_| schema.relations().get(table, &alias));
            let (one, many) = match direct {
                Some(descriptor) => (descriptor.has_one.clone(), descriptor.has_many.clone()),
                None => {
                    let names = accessor_names(&alias);
                    (Some(names.singular), Some(names.plural))
                }
            };
            for (name, arity) in [(one, Arity::One), (many, Arity::Many)] {
                let Some(name) = name else { continue };
                if entity.values.contains_key(&name) {
                    continue;
                }
                entity
                    .accessors
                    .entry(name)
                    .or_insert_with(|| (alias.clone(), arity));
            }
            entity.related.push((alias, children));
        }
        schema.prepare_entity(entity)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn values(&self) -> &Row {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(Value::as_bool)
    }

    /// Attach a derived value. Columns are left untouched.
    pub fn with_computed(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.computed.insert(name.to_string(), value.into());
        self
    }

    /// A value attached by [`Entity::with_computed`], usually from the
    /// table's binding.
    pub fn computed(&self, name: &str) -> Option<&Value> {
        self.computed.get(name)
    }

    /// Related entities under a relation alias, as included on the cursor.
    pub fn related(&self, alias: &str) -> Option<&[Entity]> {
        self.related
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, children)| children.as_slice())
    }

    /// The first entity behind a singular accessor such as `user`.
    pub fn one(&self, accessor: &str) -> Option<&Entity> {
        match self.accessors.get(accessor) {
            Some((alias, Arity::One)) => self.related(alias).and_then(<[Entity]>::first),
            _ => None,
        }
    }

    /// Every entity behind a plural accessor such as `posts`.
    pub fn many(&self, accessor: &str) -> Option<&[Entity]> {
        match self.accessors.get(accessor) {
            Some((alias, Arity::Many)) => self.related(alias),
            _ => None,
        }
    }

    /// Column names followed by relation accessor names.
    pub fn accessors(&self) -> Vec<String> {
        self.values
            .keys()
            .chain(self.accessors.keys())
            .cloned()
            .collect()
    }

    pub fn primary_key(&self) -> Vec<String> {
        self.schema.primary_key(&self.table)
    }

    fn primary_key_filters(&self, operation: &'static str, alternative: &'static str) -> Result<Filters> {
        let keys = self.primary_key();
        if keys.is_empty() {
            return Err(Error::MissingPrimaryKey {
                operation,
                alternative,
            });
        }
        Ok(keys
            .into_iter()
            .map(|key| {
                let value = self.values.get(&key).cloned().unwrap_or(Value::Null);
                (key, value)
            })
            .collect())
    }

    /// Write `new_values` to this row and return the stored result. The
    /// receiver keeps its old values.
    pub async fn update(
        &self,
        new_values: Attributes,
        transaction: Option<&Transaction>,
    ) -> Result<Entity> {
        let filters = self.primary_key_filters("update", "update_all")?;
        let mut updated = self
            .schema
            .cursor(&self.table)?
            .filter(filters)?
            .update_all(new_values, transaction)
            .await?;
        if updated.is_empty() {
            return Err(Error::cardinality("update", &self.table, "no result"));
        }
        Ok(updated.swap_remove(0))
    }

    /// Update a single column.
    pub async fn set(
        &self,
        column: &str,
        value: impl Into<Value>,
        transaction: Option<&Transaction>,
    ) -> Result<Entity> {
        self.update(attributes([(column, value.into())]), transaction)
            .await
    }

    pub async fn destroy(&self, transaction: Option<&Transaction>) -> Result<()> {
        let filters = self.primary_key_filters("destroy", "destroy_all")?;
        self.schema
            .cursor(&self.table)?
            .filter(filters)?
            .destroy_all(Filters::new(), transaction)
            .await
    }

    /// Own values plus related entities: singular accessors nest an object
    /// (or null), plural accessors a list.
    pub fn to_object(&self) -> serde_json::Value {
        let mut object: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        for (name, (alias, arity)) in &self.accessors {
            let children = self.related(alias).unwrap_or_default();
            let value = match arity {
                Arity::One => children
                    .first()
                    .map_or(serde_json::Value::Null, Entity::to_object),
                Arity::Many => children.iter().map(Entity::to_object).collect(),
            };
            object.insert(name.clone(), value);
        }
        serde_json::Value::Object(object)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_object())?)
    }

    /// Deserialize into a caller-defined struct for this table.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_object())?)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_object().serialize(serializer)
    }
}
