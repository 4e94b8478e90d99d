use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use fedq_common::{FedqError, Result, SourceConfig};
use fedq_execution::SendableRecordBatchStream;
use fedq_sql::{Expr, LiteralValue};

/// Structure a backend declares for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDesc {
    pub name: String,
    pub schema: SchemaRef,
    /// Columns forming the primary key; empty when the table has none.
    pub primary_key: Vec<String>,
}

impl TableDesc {
    pub fn new(name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            name: name.into(),
            schema,
            primary_key: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }

    pub fn is_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }
}

/// Row changes handed to [`Source::mutate`].
///
/// INSERT and UPSERT batches are already aligned to the table schema.
#[derive(Debug, Clone)]
pub enum Mutation {
    Insert(RecordBatch),
    /// Replace rows with the same primary key, insert the rest.
    Upsert(RecordBatch),
    Update {
        assignments: Vec<(String, LiteralValue)>,
        predicate: Option<Expr>,
    },
    Delete {
        predicate: Option<Expr>,
    },
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Insert(_) => "insert",
            Mutation::Upsert(_) => "upsert",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// Capability contract of a backend.
///
/// A source is set up once, before it is shared; after that every method
/// takes `&self` and must be safe under concurrent queries.
pub trait Source: Send + Sync {
    /// Registered type name of this backend (`memory`, `parquet`, ...).
    fn source_type(&self) -> &str;

    /// Configure the backend from its normalized CREATE configuration.
    fn setup(&mut self, conf: &SourceConfig) -> Result<()>;

    /// Names of the tables this backend declares, sorted.
    fn tables(&self) -> Vec<String>;

    /// Structure of one table, matched case-insensitively.
    fn table(&self, name: &str) -> Option<TableDesc>;

    /// Open a scan over `table`.
    ///
    /// `projection` restricts and orders the returned columns; `None` returns
    /// every column in table order.
    fn scan(&self, table: &str, projection: Option<&[String]>) -> Result<SendableRecordBatchStream>;

    /// Apply a mutation, returning the number of rows affected.
    fn mutate(&self, table: &str, mutation: Mutation) -> Result<u64> {
        Err(FedqError::Unsupported(format!(
            "{} source does not support {} on table {table}",
            self.source_type(),
            mutation.kind()
        )))
    }
}

/// Creates fresh, not-yet-configured sources of one type.
pub trait SourceFactory: Send + Sync {
    fn create(&self) -> Box<dyn Source>;
}

impl<F> SourceFactory for F
where
    F: Fn() -> Box<dyn Source> + Send + Sync,
{
    fn create(&self) -> Box<dyn Source> {
        self()
    }
}

/// Shared factory handle stored by the registry.
pub type SharedSourceFactory = Arc<dyn SourceFactory>;
