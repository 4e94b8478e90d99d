use fedq_common::{FedqError, Result};
use futures::StreamExt;
use futures::future::BoxFuture;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::stream::SendableRecordBatchStream;
use crate::task::Task;

/// Leaf task streaming one backend scan into its output channel.
pub struct SourceTask {
    name: String,
    backend: String,
    stream: Option<SendableRecordBatchStream>,
}

impl SourceTask {
    /// `backend` identifies the schema and source type the scan came from.
    pub fn new(
        table: &str,
        backend: impl Into<String>,
        stream: SendableRecordBatchStream,
    ) -> Self {
        Self {
            name: format!("scan({table})"),
            backend: backend.into(),
            stream: Some(stream),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }
}

impl Task for SourceTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut stream = self.stream.take().ok_or_else(|| {
                FedqError::Execution(format!("task {} was already run", self.name))
            })?;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => None,
                    _ = out.closed() => None,
                    next = stream.next() => next,
                };
                match next {
                    None => return Ok(()),
                    Some(Ok(batch)) if batch.num_rows() == 0 => continue,
                    Some(Ok(batch)) => {
                        if !out.send(batch).await {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(FedqError::task(&self.name, &self.backend, e)),
                }
            }
        })
    }

    fn close(&mut self) -> Result<()> {
        self.stream.take();
        Ok(())
    }
}
