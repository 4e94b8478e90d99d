use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use fedq_common::{FedqError, QueryId, Result};
use fedq_execution::{SendableRecordBatchStream, SharedTaskContext, StreamAdapter, TaskHandle};
use futures::StreamExt;
use tracing::debug;

/// Consumer end of a running query.
///
/// Rows arrive in the order the root task produces them. Dropping the result
/// before it is exhausted cancels the query.
#[derive(Debug)]
pub struct QueryResult {
    schema: SchemaRef,
    ctx: SharedTaskContext,
    handle: Option<TaskHandle>,
    cancelled: bool,
}

impl QueryResult {
    pub(crate) fn new(schema: SchemaRef, handle: TaskHandle, ctx: SharedTaskContext) -> Self {
        Self {
            schema,
            ctx,
            handle: Some(handle),
            cancelled: false,
        }
    }

    /// Shape of every row-message of this result.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn query_id(&self) -> QueryId {
        self.ctx.query_id
    }

    /// Next batch; `Ok(None)` at the end of a successful or cancelled query.
    ///
    /// Once the root task stops producing, its outcome is awaited, so a
    /// failure anywhere in the tree is returned here instead of a short result.
    pub async fn next(&mut self) -> Result<Option<RecordBatch>> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };
        if let Some(batch) = handle.recv().await {
            return Ok(Some(batch));
        }
        if let Some(handle) = self.handle.take() {
            handle.finish().await?;
        }
        if !self.cancelled {
            if let Some(failure) = self.ctx.failure() {
                return Err(FedqError::Execution(format!(
                    "task {} failed: {}",
                    failure.task, failure.message
                )));
            }
        }
        Ok(None)
    }

    /// Drain every remaining batch.
    pub async fn collect(mut self) -> Result<Vec<RecordBatch>> {
        let mut out = Vec::new();
        while let Some(batch) = self.next().await? {
            out.push(batch);
        }
        Ok(out)
    }

    /// Stop the query. Pending and future reads end without error.
    pub fn cancel(&mut self) {
        if self.handle.is_some() && !self.cancelled {
            debug!(query_id = %self.ctx.query_id, "query cancelled by consumer");
        }
        self.cancelled = true;
        self.ctx.cancel();
    }

    /// Cancel and wait until every task of the query has terminated.
    pub async fn close(mut self) -> Result<()> {
        self.cancel();
        match self.handle.take() {
            Some(handle) => handle.finish().await,
            None => Ok(()),
        }
    }

    /// Adapt to the record batch stream interface.
    pub fn into_stream(self) -> SendableRecordBatchStream {
        let schema = self.schema();
        let batches = futures::stream::unfold(self, |mut result| async move {
            match result.next().await {
                Ok(Some(batch)) => Some((Ok(batch), result)),
                Ok(None) => None,
                Err(e) => Some((Err(e), result)),
            }
        });
        Box::pin(StreamAdapter::new(schema, batches.boxed()))
    }
}

impl Drop for QueryResult {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.ctx.cancel();
        }
    }
}
