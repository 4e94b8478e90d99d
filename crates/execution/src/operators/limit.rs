use fedq_common::Result;
use futures::future::BoxFuture;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::task::{BoxedTask, Task, close_input, spawn_task, take_input};

/// Forwards the first `limit` rows, then detaches from its input.
///
/// Stopping early is not a failure: the input sees a closed consumer and
/// returns normally.
pub struct LimitTask {
    input: Option<BoxedTask>,
    limit: usize,
}

impl LimitTask {
    pub fn new(input: BoxedTask, limit: usize) -> Self {
        Self {
            input: Some(input),
            limit,
        }
    }
}

impl Task for LimitTask {
    fn name(&self) -> &str {
        "limit"
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let input = take_input(&mut self.input, "limit")?;
            if self.limit == 0 {
                let mut input = input;
                return input.close();
            }
            let mut child = spawn_task(input, ctx.clone());
            let mut remaining = self.limit;
            while let Some(batch) = child.recv_for(&out).await {
                let take = remaining.min(batch.num_rows());
                remaining -= take;
                let batch = if take < batch.num_rows() {
                    batch.slice(0, take)
                } else {
                    batch
                };
                if !out.send(batch).await || remaining == 0 {
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
