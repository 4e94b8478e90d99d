use std::sync::Arc;

use arrow::compute::{can_cast_types, cast};
use arrow::record_batch::RecordBatch;
use arrow_schema::{Field, Schema, SchemaRef};
use fedq_common::{FedqError, Result};
use fedq_sql::Expr;
use futures::future::BoxFuture;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::expressions::{PhysicalExpr, compile_expr};
use crate::task::{BoxedTask, Task, close_input, spawn_task, take_input};

/// Evaluates one expression per output column.
pub struct ProjectionTask {
    input: Option<BoxedTask>,
    exprs: Vec<Arc<dyn PhysicalExpr>>,
    schema: SchemaRef,
}

impl ProjectionTask {
    /// `items` pairs each expression with its output column name.
    pub fn try_new(
        input: BoxedTask,
        input_schema: &SchemaRef,
        items: &[(Expr, String)],
    ) -> Result<Self> {
        let (exprs, schema) = bind_projection(input_schema, items)?;
        Ok(Self {
            input: Some(input),
            exprs,
            schema,
        })
    }

    /// Emit batches with exactly `target` as their schema, casting columns
    /// whose evaluated type differs from the target field.
    pub fn coerce_to(mut self, target: SchemaRef) -> Result<Self> {
        if target.fields().len() != self.schema.fields().len() {
            return Err(FedqError::Planning(format!(
                "projection yields {} columns, expected {}",
                self.schema.fields().len(),
                target.fields().len()
            )));
        }
        for (have, want) in self.schema.fields().iter().zip(target.fields().iter()) {
            if !can_cast_types(have.data_type(), want.data_type()) {
                return Err(FedqError::Planning(format!(
                    "cannot cast column {} from {:?} to {:?}",
                    want.name(),
                    have.data_type(),
                    want.data_type()
                )));
            }
        }
        self.schema = target;
        Ok(self)
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

fn bind_projection(
    input_schema: &SchemaRef,
    items: &[(Expr, String)],
) -> Result<(Vec<Arc<dyn PhysicalExpr>>, SchemaRef)> {
    let mut exprs = Vec::with_capacity(items.len());
    let mut fields = Vec::with_capacity(items.len());
    for (expr, name) in items {
        let compiled = compile_expr(expr, input_schema)?;
        let nullable = match expr {
            Expr::Column(c) => crate::expressions::resolve_column(input_schema, c)
                .map(|i| input_schema.field(i).is_nullable())
                .unwrap_or(true),
            _ => true,
        };
        fields.push(Field::new(name, compiled.data_type(), nullable));
        exprs.push(compiled);
    }
    Ok((exprs, Arc::new(Schema::new(fields))))
}

/// Output schema of a projection, validating every expression against `input_schema`.
pub fn projection_output_schema(
    input_schema: &SchemaRef,
    items: &[(Expr, String)],
) -> Result<SchemaRef> {
    bind_projection(input_schema, items).map(|(_, schema)| schema)
}

impl Task for ProjectionTask {
    fn name(&self) -> &str {
        "projection"
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let input = take_input(&mut self.input, "projection")?;
            let mut child = spawn_task(input, ctx.clone());
            while let Some(batch) = child.recv_for(&out).await {
                let columns = self
                    .exprs
                    .iter()
                    .zip(self.schema.fields().iter())
                    .map(|(e, field)| {
                        let col = e.evaluate(&batch)?;
                        if col.data_type() == field.data_type() {
                            return Ok(col);
                        }
                        cast(&col, field.data_type()).map_err(|e| {
                            FedqError::Execution(format!("cast of {} failed: {e}", field.name()))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let projected = RecordBatch::try_new(self.schema.clone(), columns)
                    .map_err(|e| FedqError::Execution(format!("projection failed: {e}")))?;
                if !out.send(projected).await {
                    break;
                }
            }
            child.finish().await
        })
    }

    fn close(&mut self) -> Result<()> {
        close_input(&mut self.input)
    }
}
