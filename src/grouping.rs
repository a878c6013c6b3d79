//! Turns flat joined rows back into parent records with deduplicated
//! children.
//!
//! A one-to-many join repeats the parent columns on every row, and two
//! relations joined side by side multiply each other's children. Grouping by
//! a canonical signature of each field subset undoes both.

use crate::error::Result;
use crate::value::{Row, Value};
use std::collections::{HashMap, HashSet};

/// One distinct parent row and, per relation alias, its distinct children in
/// first-seen order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupedRecord {
    pub values: Row,
    pub related: Vec<(String, Vec<Row>)>,
}

impl GroupedRecord {
    pub fn related(&self, alias: &str) -> Option<&[Row]> {
        self.related
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, rows)| rows.as_slice())
    }
}

#[derive(Default)]
struct Group {
    values: Row,
    aliases: Vec<String>,
    children: HashMap<String, (Vec<Row>, HashSet<String>)>,
}

/// Group `rows` whose keys are `<alias>:<column>` around the `base` alias.
///
/// Keys without an alias belong to the base record. A related subset whose
/// fields are all null (an unmatched outer join) adds no child but still
/// registers the alias.
pub fn group_rows(base: &str, rows: Vec<Row>) -> Result<Vec<GroupedRecord>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();

    for row in rows {
        let mut own = Row::new();
        let mut related: Vec<(String, Row)> = Vec::new();

        for (key, value) in row {
            match key.split_once(':') {
                Some((alias, field)) if alias != base => {
                    match related.iter().position(|(a, _)| a == alias) {
                        Some(idx) => {
                            related[idx].1.insert(field.to_string(), value);
                        }
                        None => related.push((alias.to_string(), Row::from([(field.to_string(), value)]))),
                    }
                }
                Some((_, field)) => {
                    own.insert(field.to_string(), value);
                }
                None => {
                    own.insert(key, value);
                }
            }
        }

        let key = signature(&own)?;
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Group {
                values: own,
                ..Group::default()
            }
        });

        for (alias, fields) in related {
            if !group.aliases.contains(&alias) {
                group.aliases.push(alias.clone());
            }
            let (children, seen) = group.children.entry(alias).or_default();
            if fields.values().all(Value::is_null) {
                continue;
            }
            if seen.insert(signature(&fields)?) {
                children.push(fields);
            }
        }
    }

    let mut records = Vec::with_capacity(order.len());
    for key in order {
        let Some(mut group) = groups.remove(&key) else {
            continue;
        };
        let related = group
            .aliases
            .iter()
            .map(|alias| {
                let children = group
                    .children
                    .remove(alias)
                    .map(|(rows, _)| rows)
                    .unwrap_or_default();
                (alias.clone(), children)
            })
            .collect();
        records.push(GroupedRecord {
            values: group.values,
            related,
        });
    }
    Ok(records)
}

// Rows are BTreeMaps, so the serialized form is independent of the order
// fields arrived in.
fn signature(fields: &Row) -> Result<String> {
    Ok(serde_json::to_string(fields)?)
}
