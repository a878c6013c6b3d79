//! SQLite implementation of [`Backend`] on top of `rusqlite`.
//!
//! One connection is shared behind an async mutex. A transaction owns the
//! connection from `begin` until `commit` or `rollback`: operations that carry
//! its handle go straight through, everything else waits for it to finish and
//! then runs in a savepoint of its own.

use crate::backend::{Backend, ColumnInfo, QuerySpec, SqlQuery, Transaction};
use crate::error::{Error, Result};
use crate::query::Predicate;
use crate::value::{Attributes, Row, Value};
use async_trait::async_trait;
use futures::lock::{Mutex, OwnedMutexGuard};
use rusqlite::types::{ToSql, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

const OPERATION_SAVEPOINT: &str = "rust_mapper_op";

/// SQLite backend configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
}

impl SqliteConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

struct SqliteState {
    connection: Connection,
    open: BTreeSet<u64>,
    next_id: u64,
    /// Held by the open transaction, if any.
    exclusive: Option<OwnedMutexGuard<()>>,
}

pub struct SqliteBackend {
    config: SqliteConfig,
    state: Mutex<SqliteState>,
    gate: Arc<Mutex<()>>,
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let connection = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.db_path)?
        };
        Ok(Self {
            config,
            state: Mutex::new(SqliteState {
                connection,
                open: BTreeSet::new(),
                next_id: 1,
                exclusive: None,
            }),
            gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(SqliteConfig::new(":memory:"))
    }

    pub fn path(&self) -> &str {
        &self.config.db_path
    }

    /// Run several `;`-separated statements, e.g. DDL and fixtures.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        let state = self.state.lock().await;
        state.connection.execute_batch(sql)?;
        Ok(())
    }

    /// Wait until no transaction owns the connection, unless `transaction`
    /// is the owner. The returned guard keeps other transactions out.
    async fn admit(&self, transaction: Option<&Transaction>) -> Option<OwnedMutexGuard<()>> {
        match transaction {
            Some(_) => None,
            None => Some(self.gate.clone().lock_owned().await),
        }
    }

    /// Close `transaction` and every id above it, and let the next
    /// transaction or independent operation in.
    fn finish(state: &mut SqliteState, transaction: &Transaction) {
        state.open.retain(|id| *id < transaction.id());
        if state.open.is_empty() {
            state.exclusive = None;
        }
    }
}

impl SqliteState {
    fn ensure_open(&self, transaction: &Transaction) -> Result<()> {
        if self.open.contains(&transaction.id()) {
            Ok(())
        } else {
            Err(Error::Backend(format!(
                "transaction {} is not active",
                transaction.id()
            )))
        }
    }

    /// Run `f` inside `transaction`, or inside a savepoint of its own.
    fn scoped<T>(
        &self,
        transaction: Option<&Transaction>,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        if let Some(transaction) = transaction {
            self.ensure_open(transaction)?;
            return f(&self.connection);
        }

        self.connection
            .execute_batch(&format!("SAVEPOINT {}", OPERATION_SAVEPOINT))?;
        match f(&self.connection) {
            Ok(value) => {
                self.connection
                    .execute_batch(&format!("RELEASE {}", OPERATION_SAVEPOINT))?;
                Ok(value)
            }
            Err(err) => {
                let undo = format!(
                    "ROLLBACK TO {0}; RELEASE {0}",
                    OPERATION_SAVEPOINT
                );
                if let Err(rollback) = self.connection.execute_batch(&undo) {
                    tracing::warn!(target: "rust_mapper", error = %rollback, "savepoint rollback failed");
                }
                Err(err)
            }
        }
    }
}

fn savepoint_name(transaction: &Transaction) -> String {
    format!("rust_mapper_txn_{}", transaction.id())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// `"alias"."column"`, or the explicit alias when `column` is `alias.column`.
fn qualified(alias: &str, column: &str) -> String {
    match column.split_once('.') {
        Some((explicit, column)) => format!("{}.{}", quote(explicit), quote(column)),
        None => format!("{}.{}", quote(alias), quote(column)),
    }
}

fn to_sql_value(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::List(_) | Value::Object(_) => {
            return Err(Error::InvalidArgument(format!(
                "cannot bind {:?} as a sqlite value",
                value
            )))
        }
    })
}

fn from_sql_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug)]
struct Statement {
    sql: String,
    params: Vec<SqlValue>,
}

fn where_clause(
    alias: &str,
    filters: &BTreeMap<String, Predicate>,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let mut terms = Vec::with_capacity(filters.len());
    for (attribute, predicate) in filters {
        let column = qualified(alias, attribute);
        let mut bind = |value: &Value| -> Result<&'static str> {
            params.push(to_sql_value(value)?);
            Ok("?")
        };
        let term = match predicate {
            Predicate::Equal(Value::Null) => format!("{} IS NULL", column),
            Predicate::NotEqual(Value::Null) => format!("{} IS NOT NULL", column),
            Predicate::Equal(v) => format!("{} = {}", column, bind(v)?),
            Predicate::NotEqual(v) => format!("{} != {}", column, bind(v)?),
            Predicate::GreaterThan(v) => format!("{} > {}", column, bind(v)?),
            Predicate::GreaterThanOrEqual(v) => format!("{} >= {}", column, bind(v)?),
            Predicate::LessThan(v) => format!("{} < {}", column, bind(v)?),
            Predicate::LessThanOrEqual(v) => format!("{} <= {}", column, bind(v)?),
            Predicate::Like(pattern) => {
                format!("{} LIKE {}", column, bind(&Value::Text(pattern.clone()))?)
            }
            Predicate::In(items) | Predicate::NotIn(items) if items.is_empty() => {
                // Nothing is in an empty set.
                let constant = if matches!(predicate, Predicate::In(_)) { "0" } else { "1" };
                constant.to_string()
            }
            Predicate::In(items) | Predicate::NotIn(items) => {
                let marks = items.iter().map(&mut bind).collect::<Result<Vec<_>>>()?;
                let keyword = if matches!(predicate, Predicate::In(_)) { "IN" } else { "NOT IN" };
                format!("{} {} ({})", column, keyword, marks.join(", "))
            }
            Predicate::Raw(sql) => format!("({})", sql),
        };
        terms.push(term);
    }
    if terms.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", terms.join(" AND ")))
    }
}

fn from_clause(spec: &QuerySpec) -> String {
    let mut sql = format!(" FROM {} AS {}", quote(&spec.table), quote(&spec.table));
    for join in &spec.joins {
        let descriptor = &join.descriptor;
        sql.push_str(&format!(
            " LEFT JOIN {} AS {} ON {} = {}",
            quote(&descriptor.table),
            quote(&join.alias),
            qualified(&join.alias, &descriptor.foreign.column),
            qualified(&join.parent, &descriptor.local.column),
        ));
    }
    sql
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut statement = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = statement
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(Error::Backend(format!("no such table: {}", table)));
    }
    Ok(columns)
}

fn column_list(conn: &Connection, tables: &[(&str, &str)]) -> Result<String> {
    let mut columns = Vec::new();
    for (table, alias) in tables {
        for column in table_columns(conn, table)? {
            columns.push(format!(
                "{}.{} AS {}",
                quote(alias),
                quote(&column),
                quote(&format!("{}:{}", alias, column))
            ));
        }
    }
    Ok(columns.join(", "))
}

fn select_statement(conn: &Connection, spec: &QuerySpec, limit: Option<u32>) -> Result<Statement> {
    let mut tables = vec![(spec.table.as_str(), spec.table.as_str())];
    tables.extend(
        spec.joins
            .iter()
            .map(|j| (j.descriptor.table.as_str(), j.alias.as_str())),
    );

    let mut params = Vec::new();
    let mut sql = format!("SELECT {}", column_list(conn, &tables)?);
    sql.push_str(&from_clause(spec));
    sql.push_str(&where_clause(&spec.table, &spec.filters, &mut params)?);
    if !spec.options.order_by.is_empty() {
        let order = spec
            .options
            .order_by
            .iter()
            .map(|(column, ascending)| {
                format!(
                    "{} {}",
                    qualified(&spec.table, column),
                    if *ascending { "ASC" } else { "DESC" }
                )
            })
            .collect::<Vec<_>>();
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::from(limit)));
    }
    Ok(Statement { sql, params })
}

fn count_statement(spec: &QuerySpec) -> Result<Statement> {
    let mut params = Vec::new();
    let filter = where_clause(&spec.table, &spec.filters, &mut params)?;
    let sql = if spec.joins.is_empty() {
        format!("SELECT COUNT(*){}{}", from_clause(spec), filter)
    } else {
        format!(
            "SELECT COUNT(*) FROM (SELECT DISTINCT {}.*{}{})",
            quote(&spec.table),
            from_clause(spec),
            filter
        )
    };
    Ok(Statement { sql, params })
}

fn query_rows(conn: &Connection, statement: &Statement) -> Result<Vec<Row>> {
    let mut prepared = conn.prepare(&statement.sql)?;
    let names: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();
    let mut rows = prepared.query(params_from_iter(statement.params.iter()))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::new();
        for (idx, name) in names.iter().enumerate() {
            map.insert(name.clone(), from_sql_ref(row.get_ref(idx)?));
        }
        result.push(map);
    }
    Ok(result)
}

fn matching_rowids(
    conn: &Connection,
    table: &str,
    filters: &BTreeMap<String, Predicate>,
) -> Result<Vec<i64>> {
    let mut params = Vec::new();
    let sql = format!(
        "SELECT {}.rowid FROM {} AS {}{}",
        quote(table),
        quote(table),
        quote(table),
        where_clause(table, filters, &mut params)?
    );
    let mut prepared = conn.prepare(&sql)?;
    let ids = prepared
        .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn rows_by_rowid(conn: &Connection, table: &str, ids: &[i64]) -> Result<Vec<Row>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let marks = vec!["?"; ids.len()].join(", ");
    let statement = Statement {
        sql: format!(
            "SELECT {} FROM {} AS {} WHERE {}.rowid IN ({}) ORDER BY {}.rowid",
            column_list(conn, &[(table, table)])?,
            quote(table),
            quote(table),
            quote(table),
            marks,
            quote(table)
        ),
        params: ids.iter().map(|id| SqlValue::Integer(*id)).collect(),
    };
    query_rows(conn, &statement)
}

fn values_of(attributes: &Attributes) -> Result<Vec<SqlValue>> {
    attributes.values().map(to_sql_value).collect()
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn all(&self, query: &QuerySpec) -> Result<Vec<Row>> {
        let _gate = self.admit(query.transaction()).await;
        let state = self.state.lock().await;
        state.scoped(query.transaction(), |conn| {
            let statement = select_statement(conn, query, query.options.limit)?;
            query_rows(conn, &statement)
        })
    }

    async fn count(&self, query: &QuerySpec) -> Result<u64> {
        let _gate = self.admit(query.transaction()).await;
        let state = self.state.lock().await;
        state.scoped(query.transaction(), |conn| {
            let statement = count_statement(query)?;
            let count: i64 = conn.query_row(
                &statement.sql,
                params_from_iter(statement.params.iter()),
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    async fn first(&self, query: &QuerySpec) -> Result<Option<Row>> {
        let _gate = self.admit(query.transaction()).await;
        let state = self.state.lock().await;
        state.scoped(query.transaction(), |conn| {
            let statement = select_statement(conn, query, Some(1))?;
            Ok(query_rows(conn, &statement)?.into_iter().next())
        })
    }

    async fn create(
        &self,
        table: &str,
        attributes: &Attributes,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>> {
        let _gate = self.admit(transaction).await;
        let state = self.state.lock().await;
        state.scoped(transaction, |conn| {
            let sql = if attributes.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", quote(table))
            } else {
                let columns = attributes.keys().map(|c| quote(c)).collect::<Vec<_>>();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(table),
                    columns.join(", "),
                    vec!["?"; columns.len()].join(", ")
                )
            };
            conn.execute(&sql, params_from_iter(values_of(attributes)?.iter()))?;
            rows_by_rowid(conn, table, &[conn.last_insert_rowid()])
        })
    }

    async fn update(
        &self,
        table: &str,
        filters: &BTreeMap<String, Predicate>,
        new_attributes: &Attributes,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>> {
        let _gate = self.admit(transaction).await;
        let state = self.state.lock().await;
        state.scoped(transaction, |conn| {
            let ids = matching_rowids(conn, table, filters)?;
            if !ids.is_empty() && !new_attributes.is_empty() {
                let assignments = new_attributes
                    .keys()
                    .map(|c| format!("{} = ?", quote(c)))
                    .collect::<Vec<_>>();
                let mut params = values_of(new_attributes)?;
                params.extend(ids.iter().map(|id| SqlValue::Integer(*id)));
                let sql = format!(
                    "UPDATE {} SET {} WHERE rowid IN ({})",
                    quote(table),
                    assignments.join(", "),
                    vec!["?"; ids.len()].join(", ")
                );
                conn.execute(&sql, params_from_iter(params.iter()))?;
            }
            rows_by_rowid(conn, table, &ids)
        })
    }

    async fn destroy(
        &self,
        table: &str,
        filters: &BTreeMap<String, Predicate>,
        transaction: Option<&Transaction>,
    ) -> Result<()> {
        let _gate = self.admit(transaction).await;
        let state = self.state.lock().await;
        state.scoped(transaction, |conn| {
            let mut params = Vec::new();
            let sql = format!(
                "DELETE FROM {}{}",
                quote(table),
                where_clause(table, filters, &mut params)?
            );
            conn.execute(&sql, params_from_iter(params.iter()))?;
            Ok(())
        })
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut statement = state.connection.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    async fn list_columns(&self, table: &str) -> Result<BTreeMap<String, ColumnInfo>> {
        let state = self.state.lock().await;
        let mut statement = state
            .connection
            .prepare("SELECT name, type, dflt_value FROM pragma_table_info(?1) ORDER BY cid")?;
        let mut rows = statement.query([table])?;
        let mut columns = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            let default = match from_sql_ref(row.get_ref(2)?) {
                Value::Null => None,
                value => Some(value),
            };
            columns.insert(name, ColumnInfo::new(&declared, default));
        }
        if columns.is_empty() {
            return Err(Error::Backend(format!("no such table: {}", table)));
        }
        Ok(columns)
    }

    async fn primary_keys(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let tables = self.list_tables().await?;
        let state = self.state.lock().await;
        let mut statement = state
            .connection
            .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
        let mut keys = BTreeMap::new();
        for table in tables {
            let columns = statement
                .query_map([&table], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if !columns.is_empty() {
                keys.insert(table, columns);
            }
        }
        Ok(keys)
    }

    async fn raw(&self, query: &SqlQuery, transaction: Option<&Transaction>) -> Result<Vec<Row>> {
        let _gate = self.admit(transaction).await;
        let state = self.state.lock().await;
        if let Some(transaction) = transaction {
            state.ensure_open(transaction)?;
        }

        let mut named = Vec::with_capacity(query.params.values.len());
        for (name, value) in &query.params.values {
            let name = if name.starts_with([':', '@', '$']) {
                name.clone()
            } else {
                format!(":{}", name)
            };
            named.push((name, to_sql_value(value)?));
        }
        let bindings: Vec<(&str, &dyn ToSql)> = named
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();

        let mut prepared = state.connection.prepare(&query.statement)?;
        if prepared.column_count() == 0 {
            prepared.execute(bindings.as_slice())?;
            return Ok(Vec::new());
        }
        let names: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();
        let mut rows = prepared.query(bindings.as_slice())?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Row::new();
            for (idx, name) in names.iter().enumerate() {
                map.insert(name.clone(), from_sql_ref(row.get_ref(idx)?));
            }
            result.push(map);
        }
        Ok(result)
    }

    async fn begin(&self) -> Result<Transaction> {
        let exclusive = self.gate.clone().lock_owned().await;
        let mut state = self.state.lock().await;
        let transaction = Transaction::new(state.next_id);
        state.next_id += 1;
        state
            .connection
            .execute_batch(&format!("SAVEPOINT {}", savepoint_name(&transaction)))?;
        state.open.insert(transaction.id());
        state.exclusive = Some(exclusive);
        Ok(transaction)
    }

    async fn commit(&self, transaction: Transaction) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_open(&transaction)?;
        state
            .connection
            .execute_batch(&format!("RELEASE {}", savepoint_name(&transaction)))?;
        Self::finish(&mut state, &transaction);
        Ok(())
    }

    async fn rollback(&self, transaction: Transaction) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_open(&transaction)?;
        let name = savepoint_name(&transaction);
        let undone = state
            .connection
            .execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name));
        if undone.is_err() {
            // Leave nothing half open for the next transaction.
            if let Err(err) = state.connection.execute_batch(&format!("RELEASE {}", name)) {
                tracing::warn!(target: "rust_mapper", error = %err, "savepoint release failed");
            }
        }
        Self::finish(&mut state, &transaction);
        undone?;
        Ok(())
    }
}
