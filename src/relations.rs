//! Relation inference and relation-chain resolution.
//!
//! Relations always come in pairs: declaring or inferring `A -> B` also
//! records the inverse `B -> A`, each side with its own accessor names.

use crate::backend::{ColumnInfo, Join};
use crate::error::{Error, Result};
use crate::inflect::accessor_names;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Columns ending in this suffix are candidate foreign keys.
pub const FOREIGN_KEY_SUFFIX: &str = "_id";

/// Separator between hops in a relation chain such as `user_role:role`.
pub const CHAIN_SEPARATOR: char = ':';

/// A `table.column` join endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKey {
    pub table: String,
    pub column: String,
}

impl JoinKey {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

impl FromStr for JoinKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((table, column)) if !table.is_empty() && !column.is_empty() => {
                Ok(JoinKey::new(table, column))
            }
            _ => Err(Error::Configuration(format!(
                "Join key \"{}\" must have the form table.column",
                s
            ))),
        }
    }
}

impl Serialize for JoinKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Directional join specification plus the accessor names an entity of the
/// local table exposes for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationDescriptor {
    pub table: String,
    pub local: JoinKey,
    pub foreign: JoinKey,
    pub has_one: Option<String>,
    pub has_many: Option<String>,
}

/// A relation declared by hand for a table, typically where two columns
/// point at the same table or the naming convention does not apply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManualRelation {
    pub name: String,
    pub table: String,
    pub local: String,
    pub foreign: String,
    #[serde(default)]
    pub local_has_one: Option<String>,
    #[serde(default)]
    pub local_has_many: Option<String>,
    #[serde(default)]
    pub foreign_has_one: Option<String>,
    #[serde(default)]
    pub foreign_has_many: Option<String>,
}

impl ManualRelation {
    pub fn new(name: &str, table: &str, local: &str, foreign: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            local: local.to_string(),
            foreign: foreign.to_string(),
            local_has_one: None,
            local_has_many: None,
            foreign_has_one: None,
            foreign_has_many: None,
        }
    }

    pub fn local_has_one(mut self, accessor: &str) -> Self {
        self.local_has_one = Some(accessor.to_string());
        self
    }

    pub fn local_has_many(mut self, accessor: &str) -> Self {
        self.local_has_many = Some(accessor.to_string());
        self
    }

    pub fn foreign_has_one(mut self, accessor: &str) -> Self {
        self.foreign_has_one = Some(accessor.to_string());
        self
    }

    pub fn foreign_has_many(mut self, accessor: &str) -> Self {
        self.foreign_has_many = Some(accessor.to_string());
        self
    }
}

/// table -> relation name -> descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RelationGraph {
    relations: BTreeMap<String, BTreeMap<String, RelationDescriptor>>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the automatic relations for every table in `columns`.
    ///
    /// A column `<name>_id` links to table `<name>` when it exists, joining
    /// on that table's single primary key column, or `id`.
    pub fn infer(
        columns: &BTreeMap<String, BTreeMap<String, ColumnInfo>>,
        primary_keys: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let mut graph = RelationGraph::new();
        for table in columns.keys() {
            graph.relations.entry(table.clone()).or_default();
        }

        for (table, table_columns) in columns {
            for column in table_columns.keys() {
                let Some(candidate) = column.strip_suffix(FOREIGN_KEY_SUFFIX) else {
                    continue;
                };
                if candidate.is_empty() || !columns.contains_key(candidate) {
                    continue;
                }
                tracing::trace!(target: "rust_mapper", table = %table, column = %column, foreign = %candidate, "automatic relation");

                let id_column = match primary_keys.get(candidate).map(Vec::as_slice) {
                    Some([single]) => single.as_str(),
                    _ => "id",
                };
                let local_names = accessor_names(table);
                let foreign_names = accessor_names(candidate);

                graph.insert(
                    table,
                    candidate,
                    RelationDescriptor {
                        table: candidate.to_string(),
                        local: JoinKey::new(table, column),
                        foreign: JoinKey::new(candidate, id_column),
                        has_one: Some(foreign_names.singular),
                        has_many: Some(foreign_names.plural),
                    },
                );
                // A self reference keeps the forward name; its inverse goes
                // under the plural accessor.
                let inverse_name = if candidate == table.as_str() {
                    local_names.plural.clone()
                } else {
                    table.clone()
                };
                if inverse_name == candidate {
                    continue;
                }
                graph.insert(
                    candidate,
                    &inverse_name,
                    RelationDescriptor {
                        table: table.clone(),
                        local: JoinKey::new(candidate, id_column),
                        foreign: JoinKey::new(table, column),
                        has_one: Some(local_names.singular),
                        has_many: Some(local_names.plural),
                    },
                );
            }
        }
        graph
    }

    /// Record a manual relation of `table` and its inverse on the target.
    pub fn add_manual(&mut self, table: &str, relation: &ManualRelation) -> Result<()> {
        let foreign_name = relation
            .foreign_has_one
            .as_deref()
            .or(relation.foreign_has_many.as_deref())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "The manual relations for {} are malformed: you need a defined foreign_has_one or a foreign_has_many",
                    table
                ))
            })?;
        if !self.relations.contains_key(&relation.table) {
            return Err(Error::Configuration(format!(
                "The manual relation {} for {} targets unknown table {}",
                relation.name, table, relation.table
            )));
        }
        let local: JoinKey = relation.local.parse()?;
        let foreign: JoinKey = relation.foreign.parse()?;

        self.insert(
            table,
            &relation.name,
            RelationDescriptor {
                table: relation.table.clone(),
                local: local.clone(),
                foreign: foreign.clone(),
                has_one: relation.local_has_one.clone(),
                has_many: relation.local_has_many.clone(),
            },
        );
        self.insert(
            &relation.table,
            foreign_name,
            RelationDescriptor {
                table: table.to_string(),
                local: foreign,
                foreign: local,
                has_one: relation.foreign_has_one.clone(),
                has_many: relation.foreign_has_many.clone(),
            },
        );
        Ok(())
    }

    fn insert(&mut self, table: &str, name: &str, descriptor: RelationDescriptor) {
        self.relations
            .entry(table.to_string())
            .or_default()
            .insert(name.to_string(), descriptor);
    }

    pub fn relations(&self, table: &str) -> Option<&BTreeMap<String, RelationDescriptor>> {
        self.relations.get(table)
    }

    pub fn get(&self, table: &str, name: &str) -> Option<&RelationDescriptor> {
        self.relations.get(table).and_then(|r| r.get(name))
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Resolve `chain` starting from `table` into one [`Join`] per hop.
    ///
    /// Each hop's alias is the segment name and its parent is the previous
    /// hop's alias (the base table for the first hop).
    pub fn resolve_chain(&self, table: &str, chain: &str) -> Result<Vec<Join>> {
        let mut joins = Vec::new();
        self.resolve_from(table, table, table, chain, chain, &mut joins)?;
        Ok(joins)
    }

    fn resolve_from(
        &self,
        base: &str,
        origin_table: &str,
        origin_alias: &str,
        chain: &str,
        remaining: &str,
        joins: &mut Vec<Join>,
    ) -> Result<()> {
        if let Some(descriptor) = self.get(origin_table, remaining) {
            joins.push(Join {
                parent: origin_alias.to_string(),
                alias: remaining.to_string(),
                descriptor: descriptor.clone(),
            });
            return Ok(());
        }

        let unknown = |missing: &str| Error::UnknownRelation {
            table: base.to_string(),
            relation: chain.to_string(),
            origin: origin_table.to_string(),
            missing: missing.to_string(),
        };

        let Some((head, rest)) = remaining.split_once(CHAIN_SEPARATOR) else {
            return Err(unknown(remaining));
        };
        let descriptor = self.get(origin_table, head).ok_or_else(|| unknown(head))?;
        joins.push(Join {
            parent: origin_alias.to_string(),
            alias: head.to_string(),
            descriptor: descriptor.clone(),
        });
        self.resolve_from(base, &descriptor.table, head, chain, rest, joins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(spec: &[(&str, &[&str])]) -> BTreeMap<String, BTreeMap<String, ColumnInfo>> {
        spec.iter()
            .map(|(table, cols)| {
                let cols = cols
                    .iter()
                    .map(|c| (c.to_string(), ColumnInfo::new("integer", None)))
                    .collect();
                (table.to_string(), cols)
            })
            .collect()
    }

    fn pks(spec: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        spec.iter()
            .map(|(t, c)| (t.to_string(), c.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_infers_pair_from_id_suffix() {
        let graph = RelationGraph::infer(
            &columns(&[("user", &["id", "name"]), ("post", &["id", "user_id"])]),
            &pks(&[("user", &["id"]), ("post", &["id"])]),
        );

        assert_eq!(
            graph.get("post", "user"),
            Some(&RelationDescriptor {
                table: "user".into(),
                local: JoinKey::new("post", "user_id"),
                foreign: JoinKey::new("user", "id"),
                has_one: Some("user".into()),
                has_many: Some("users".into()),
            })
        );
        assert_eq!(
            graph.get("user", "post"),
            Some(&RelationDescriptor {
                table: "post".into(),
                local: JoinKey::new("user", "id"),
                foreign: JoinKey::new("post", "user_id"),
                has_one: Some("post".into()),
                has_many: Some("posts".into()),
            })
        );
    }

    #[test]
    fn test_self_reference_keeps_both_directions() {
        let graph = RelationGraph::infer(
            &columns(&[("node", &["id", "node_id"])]),
            &pks(&[("node", &["id"])]),
        );

        let forward = graph.get("node", "node").unwrap();
        assert_eq!(forward.local, JoinKey::new("node", "node_id"));
        assert_eq!(forward.foreign, JoinKey::new("node", "id"));

        let inverse = graph.get("node", "nodes").unwrap();
        assert_eq!(inverse.local, JoinKey::new("node", "id"));
        assert_eq!(inverse.foreign, JoinKey::new("node", "node_id"));
        assert_eq!(graph.relations("node").unwrap().len(), 2);
    }

    #[test]
    fn test_ignores_id_columns_without_table() {
        let graph = RelationGraph::infer(
            &columns(&[("message", &["uuid", "sender_id"]), ("user", &["id"])]),
            &BTreeMap::new(),
        );
        assert!(graph.relations("message").unwrap().is_empty());
        assert!(graph.relations("user").unwrap().is_empty());
    }

    #[test]
    fn test_foreign_key_uses_single_primary_key() {
        let graph = RelationGraph::infer(
            &columns(&[("account", &["account_no"]), ("invoice", &["account_id"])]),
            &pks(&[("account", &["account_no"])]),
        );
        assert_eq!(
            graph.get("invoice", "account").unwrap().foreign,
            JoinKey::new("account", "account_no")
        );
    }

    #[test]
    fn test_manual_relation_requires_foreign_accessor() {
        let mut graph = RelationGraph::infer(
            &columns(&[("user", &["id"]), ("message", &["sender_id"])]),
            &BTreeMap::new(),
        );
        let relation = ManualRelation::new("sender", "user", "message.sender_id", "user.id")
            .local_has_one("sender");
        let err = graph.add_manual("message", &relation).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        graph
            .add_manual("message", &relation.foreign_has_many("sent_messages"))
            .unwrap();
        let inverse = graph.get("user", "sent_messages").unwrap();
        assert_eq!(inverse.table, "message");
        assert_eq!(inverse.local, JoinKey::new("user", "id"));
        assert_eq!(inverse.foreign, JoinKey::new("message", "sender_id"));
        assert_eq!(inverse.has_one, None);
        assert_eq!(inverse.has_many.as_deref(), Some("sent_messages"));
    }

    #[test]
    fn test_resolves_chains_per_hop() {
        let graph = RelationGraph::infer(
            &columns(&[
                ("user", &["id"]),
                ("role", &["id"]),
                ("user_role", &["user_id", "role_id"]),
            ]),
            &BTreeMap::new(),
        );
        let joins = graph.resolve_chain("user", "user_role:role").unwrap();
        assert_eq!(joins.len(), 2);
        assert_eq!((joins[0].parent.as_str(), joins[0].alias.as_str()), ("user", "user_role"));
        assert_eq!((joins[1].parent.as_str(), joins[1].alias.as_str()), ("user_role", "role"));
        assert_eq!(joins[1].descriptor.local, JoinKey::new("user_role", "role_id"));
    }

    #[test]
    fn test_rejects_undefined_hops() {
        let graph = RelationGraph::infer(
            &columns(&[("user", &["id"]), ("user_role", &["user_id"]), ("role", &["id"])]),
            &BTreeMap::new(),
        );
        let err = graph.resolve_chain("user", "banned_ips").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Relation banned_ips is not defined for cursor user (no relation banned_ips on user)."
        );
        let err = graph.resolve_chain("user", "user_role:role").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Relation user_role:role is not defined for cursor user (no relation role on user_role)."
        );
        assert!(graph.resolve_chain("user", "role:user_role").is_err());
    }
}
