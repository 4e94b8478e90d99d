use std::sync::Arc;

use arrow::array::UInt64Array;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use fedq_common::{FedqError, Result};
use futures::future::BoxFuture;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::task::{BoxedTask, Task, close_input, spawn_task, take_input};

/// Backend-side sink of a mutation.
///
/// `write` receives the input rows of INSERT/UPSERT; `finish` applies
/// whatever is left (UPDATE/DELETE do all their work there). Both return the
/// number of rows they affected.
pub trait BatchWriter: Send {
    /// Backend identity used when wrapping failures.
    fn backend(&self) -> &str;

    fn write(&mut self, batch: RecordBatch) -> Result<u64>;

    fn finish(&mut self) -> Result<u64>;
}

/// Schema of the single row a mutation returns.
pub fn rows_affected_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(
        "rows_affected",
        DataType::UInt64,
        false,
    )]))
}

/// Passes its input to a [`BatchWriter`] and emits one `rows_affected` row.
pub struct MutateTask {
    name: String,
    input: Option<BoxedTask>,
    writer: Box<dyn BatchWriter>,
}

impl MutateTask {
    pub fn new(
        name: impl Into<String>,
        input: Option<BoxedTask>,
        writer: Box<dyn BatchWriter>,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            writer,
        }
    }

    fn wrap(&self, e: FedqError) -> FedqError {
        FedqError::task(&self.name, self.writer.backend(), e)
    }
}

impl Task for MutateTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut affected = 0u64;
            if self.input.is_some() {
                let input = take_input(&mut self.input, &self.name)?;
                let mut child = spawn_task(input, ctx.clone());
                while let Some(batch) = child.recv_for(&out).await {
                    match self.writer.write(batch) {
                        Ok(n) => affected += n,
                        Err(e) => return Err(self.wrap(e)),
                    }
                }
                child.finish().await?;
            }
            if ctx.is_cancelled() || out.is_detached() {
                return Ok(());
            }
            match self.writer.finish() {
                Ok(n) => affected += n,
                Err(e) => return Err(self.wrap(e)),
            }
            let batch = RecordBatch::try_new(
                rows_affected_schema(),
                vec![Arc::new(UInt64Array::from(vec![affected]))],
            )
            .map_err(|e| FedqError::Execution(format!("mutation result failed: {e}")))?;
            out.send(batch).await;
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        close_input(&mut self.input)
    }
}
