use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::{concat_batches, take};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use arrow_schema::{Field, Schema, SchemaRef};
use fedq_common::{FedqError, Result};
use futures::future::BoxFuture;
use tracing::debug;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::expressions::resolve_column;
use crate::scalar::normalize_array;
use crate::task::{BoxedTask, Task, close_input, spawn_task, take_input};

/// Inner equi-join. Builds a hash table over the right input and probes it
/// with the left input, preserving left order.
pub struct HashJoinTask {
    left: Option<BoxedTask>,
    right: Option<BoxedTask>,
    left_key: usize,
    right_key: usize,
    right_schema: SchemaRef,
    schema: SchemaRef,
}

/// Qualify a field with `qualifier` unless it already carries one.
fn qualified(field: &Field, qualifier: &str) -> Field {
    if field.name().contains('.') {
        field.clone()
    } else {
        field.clone().with_name(format!("{qualifier}.{}", field.name()))
    }
}

/// Left fields then right fields, each qualified by its side's table name or alias.
pub fn join_output_schema(
    left_schema: &SchemaRef,
    left_qualifier: &str,
    right_schema: &SchemaRef,
    right_qualifier: &str,
) -> SchemaRef {
    let fields = left_schema
        .fields()
        .iter()
        .map(|f| qualified(f, left_qualifier))
        .chain(right_schema.fields().iter().map(|f| qualified(f, right_qualifier)))
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

impl HashJoinTask {
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        left: BoxedTask,
        left_schema: &SchemaRef,
        left_qualifier: &str,
        left_key: &str,
        right: BoxedTask,
        right_schema: &SchemaRef,
        right_qualifier: &str,
        right_key: &str,
    ) -> Result<Self> {
        let left_key = resolve_column(left_schema, left_key)?;
        let right_key = resolve_column(right_schema, right_key)?;
        Ok(Self {
            left: Some(left),
            right: Some(right),
            left_key,
            right_key,
            right_schema: right_schema.clone(),
            schema: join_output_schema(left_schema, left_qualifier, right_schema, right_qualifier),
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn probe(
        &self,
        build: &RecordBatch,
        table: &HashMap<String, Vec<u32>>,
        batch: &RecordBatch,
    ) -> Result<Option<RecordBatch>> {
        let keys = normalize_array(batch.column(self.left_key))?;
        let mut left_idx = Vec::new();
        let mut right_idx = Vec::new();
        for row in 0..batch.num_rows() {
            let Some(key) = join_key(&keys, row)? else { continue };
            if let Some(matches) = table.get(&key) {
                for r in matches {
                    left_idx.push(row as u32);
                    right_idx.push(*r);
                }
            }
        }
        if left_idx.is_empty() {
            return Ok(None);
        }
        let left_idx = UInt32Array::from(left_idx);
        let right_idx = UInt32Array::from(right_idx);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
        for col in batch.columns() {
            columns.push(take(col.as_ref(), &left_idx, None).map_err(join_err)?);
        }
        for col in build.columns() {
            columns.push(take(col.as_ref(), &right_idx, None).map_err(join_err)?);
        }
        RecordBatch::try_new(self.schema.clone(), columns)
            .map(Some)
            .map_err(join_err)
    }
}

fn join_err(e: arrow_schema::ArrowError) -> FedqError {
    FedqError::Execution(format!("hash join failed: {e}"))
}

fn join_key(keys: &ArrayRef, row: usize) -> Result<Option<String>> {
    use arrow::array::Array;
    if keys.is_null(row) {
        return Ok(None);
    }
    array_value_to_string(keys, row).map(Some).map_err(join_err)
}

impl Task for HashJoinTask {
    fn name(&self) -> &str {
        "hash_join"
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let left = take_input(&mut self.left, "hash_join")?;
            let right = take_input(&mut self.right, "hash_join")?;
            let mut build_side = spawn_task(right, ctx.clone());
            let mut probe_side = spawn_task(left, ctx.clone());

            let mut build_batches = Vec::new();
            while let Some(batch) = build_side.recv_for(&out).await {
                build_batches.push(batch);
            }
            build_side.finish().await?;
            if ctx.is_cancelled() || out.is_detached() {
                return probe_side.finish().await;
            }

            let build_schema = build_batches
                .first()
                .map(|b| b.schema())
                .unwrap_or_else(|| self.right_schema.clone());
            let build = concat_batches(&build_schema, &build_batches).map_err(join_err)?;
            let build_keys = normalize_array(build.column(self.right_key))?;
            let mut table: HashMap<String, Vec<u32>> = HashMap::new();
            for row in 0..build.num_rows() {
                if let Some(key) = join_key(&build_keys, row)? {
                    table.entry(key).or_default().push(row as u32);
                }
            }
            debug!(
                query_id = %ctx.query_id,
                build_rows = build.num_rows(),
                keys = table.len(),
                "hash join build finished"
            );

            while let Some(batch) = probe_side.recv_for(&out).await {
                let Some(joined) = self.probe(&build, &table, &batch)? else {
                    continue;
                };
                if !out.send(joined).await {
                    break;
                }
            }
            probe_side.finish().await
        })
    }

    fn close(&mut self) -> Result<()> {
        let left = close_input(&mut self.left);
        let right = close_input(&mut self.right);
        left.and(right)
    }
}
