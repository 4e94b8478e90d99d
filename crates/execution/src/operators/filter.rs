use std::sync::Arc;

use arrow::compute::filter_record_batch;
use arrow_schema::SchemaRef;
use fedq_common::{FedqError, Result};
use fedq_sql::Expr;
use futures::future::BoxFuture;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::expressions::{PhysicalExpr, compile_expr, evaluate_predicate};
use crate::task::{BoxedTask, Task, close_input, spawn_task, take_input};

/// Keeps the rows of its input for which the predicate is true.
pub struct FilterTask {
    input: Option<BoxedTask>,
    predicate: Arc<dyn PhysicalExpr>,
}

impl FilterTask {
    pub fn try_new(input: BoxedTask, input_schema: &SchemaRef, predicate: &Expr) -> Result<Self> {
        Ok(Self {
            input: Some(input),
            predicate: compile_expr(predicate, input_schema)?,
        })
    }
}

impl Task for FilterTask {
    fn name(&self) -> &str {
        "filter"
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let input = take_input(&mut self.input, "filter")?;
            let mut child = spawn_task(input, ctx.clone());
            while let Some(batch) = child.recv_for(&out).await {
                let mask = evaluate_predicate(self.predicate.as_ref(), &batch)?;
                let filtered = filter_record_batch(&batch, &mask)
                    .map_err(|e| FedqError::Execution(format!("filter failed: {e}")))?;
                if filtered.num_rows() == 0 {
                    continue;
                }
                if !out.send(filtered).await {
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
