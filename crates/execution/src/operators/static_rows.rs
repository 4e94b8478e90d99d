use arrow::record_batch::RecordBatch;
use fedq_common::Result;
use futures::future::BoxFuture;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::task::Task;

/// Leaf task emitting pre-computed batches (introspection results, VALUES).
pub struct StaticTask {
    name: String,
    batches: Vec<RecordBatch>,
}

impl StaticTask {
    pub fn new(name: impl Into<String>, batches: Vec<RecordBatch>) -> Self {
        Self {
            name: name.into(),
            batches,
        }
    }
}

impl Task for StaticTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, _ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for batch in std::mem::take(&mut self.batches) {
                if batch.num_rows() == 0 {
                    continue;
                }
                if !out.send(batch).await {
                    break;
                }
            }
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        self.batches.clear();
        Ok(())
    }
}
