use std::sync::Arc;

use arrow::array::{ArrayRef, new_null_array};
use arrow::compute::cast;
use arrow::record_batch::RecordBatch;
use fedq_common::{FedqError, Result};
use fedq_execution::BatchWriter;
use fedq_sql::{Expr, LiteralValue};

use crate::source::{Mutation, Source, TableDesc};

/// What a [`SourceWriter`] does with the rows it receives.
#[derive(Debug, Clone)]
pub enum WriteKind {
    /// Target columns; empty means input columns map to table columns by position.
    Insert { columns: Vec<String> },
    Upsert { columns: Vec<String> },
    Update {
        assignments: Vec<(String, LiteralValue)>,
        predicate: Option<Expr>,
    },
    Delete { predicate: Option<Expr> },
}

/// Adapts [`Source::mutate`] to the execution engine's [`BatchWriter`].
pub struct SourceWriter {
    backend: String,
    source: Arc<dyn Source>,
    table: TableDesc,
    kind: WriteKind,
}

impl SourceWriter {
    /// `backend` is the identity reported in wrapped errors (`schema/type`).
    pub fn new(
        backend: impl Into<String>,
        source: Arc<dyn Source>,
        table: TableDesc,
        kind: WriteKind,
    ) -> Self {
        Self {
            backend: backend.into(),
            source,
            table,
            kind,
        }
    }

    /// Reshape `batch` into the table's schema: map target columns, cast,
    /// fill the rest with nulls.
    fn align(&self, batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch> {
        let schema = &self.table.schema;
        if columns.is_empty() && batch.num_columns() != schema.fields().len() {
            return Err(FedqError::Planning(format!(
                "table {} has {} columns but {} values were supplied",
                self.table.name,
                schema.fields().len(),
                batch.num_columns()
            )));
        }
        let mut out: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        for (i, field) in schema.fields().iter().enumerate() {
            let source_col = if columns.is_empty() {
                Some(i)
            } else {
                columns.iter().position(|c| c.eq_ignore_ascii_case(field.name()))
            };
            match source_col {
                Some(j) => {
                    let arr = batch.column(j);
                    let arr = if arr.data_type() == field.data_type() {
                        arr.clone()
                    } else {
                        cast(arr, field.data_type()).map_err(|e| {
                            FedqError::Execution(format!("column {}: {e}", field.name()))
                        })?
                    };
                    if !field.is_nullable() && arr.null_count() > 0 {
                        return Err(FedqError::Execution(format!(
                            "column {} is not nullable",
                            field.name()
                        )));
                    }
                    out.push(arr);
                }
                None if field.is_nullable() => {
                    out.push(new_null_array(field.data_type(), batch.num_rows()));
                }
                None => {
                    return Err(FedqError::Execution(format!(
                        "column {} is not nullable and has no value",
                        field.name()
                    )));
                }
            }
        }
        RecordBatch::try_new(schema.clone(), out)
            .map_err(|e| FedqError::Execution(format!("align rows for {}: {e}", self.table.name)))
    }
}

impl BatchWriter for SourceWriter {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn write(&mut self, batch: RecordBatch) -> Result<u64> {
        let mutation = match &self.kind {
            WriteKind::Insert { columns } => Mutation::Insert(self.align(&batch, columns)?),
            WriteKind::Upsert { columns } => Mutation::Upsert(self.align(&batch, columns)?),
            WriteKind::Update { .. } | WriteKind::Delete { .. } => {
                return Err(FedqError::Execution(format!(
                    "{} takes no input rows",
                    self.table.name
                )));
            }
        };
        self.source.mutate(&self.table.name, mutation)
    }

    fn finish(&mut self) -> Result<u64> {
        let mutation = match &self.kind {
            WriteKind::Insert { .. } | WriteKind::Upsert { .. } => return Ok(0),
            WriteKind::Update {
                assignments,
                predicate,
            } => Mutation::Update {
                assignments: assignments.clone(),
                predicate: predicate.clone(),
            },
            WriteKind::Delete { predicate } => Mutation::Delete {
                predicate: predicate.clone(),
            },
        };
        self.source.mutate(&self.table.name, mutation)
    }
}
