use thiserror::Error;

/// Errors raised by the mapping engine and its backends.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad construction-time setup: log level, manual relation, backend type.
    #[error("{0}")]
    Configuration(String),

    /// A caller-supplied argument that cannot be turned into a query.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Relation {relation} is not defined for cursor {table} (no relation {missing} on {origin}).")]
    UnknownRelation {
        table: String,
        relation: String,
        origin: String,
        missing: String,
    },

    #[error("No cursor for table \"{0}\"")]
    TableNotFound(String),

    #[error("A call to {operation}() for {table} yielded {outcome}.")]
    Cardinality {
        operation: &'static str,
        table: String,
        outcome: &'static str,
    },

    #[error("You can't use a single object {operation}() without a primary key on the table. Please use cursor.{alternative}().")]
    MissingPrimaryKey {
        operation: &'static str,
        alternative: &'static str,
    },

    #[error("unable to retrieve {what}: {source}")]
    Initialization {
        what: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("transaction rolled back: {source}")]
    TransactionAborted {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn cardinality(operation: &'static str, table: &str, outcome: &'static str) -> Self {
        Error::Cardinality {
            operation,
            table: table.to_string(),
            outcome,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
