//! Task contract and the driver that runs one task on its own tokio task.

use std::time::Instant;

use arrow::record_batch::RecordBatch;
use fedq_common::{FedqError, Result};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::channel::{TaskReceiver, TaskSender, task_channel};
use crate::context::SharedTaskContext;

/// A runnable pipeline stage.
///
/// `run` is invoked at most once and owns the output sender: when the returned
/// future completes the sender is dropped and the channel closes. `close`
/// releases whatever the task still holds (scan handles, children that never
/// started). It must be safe to call without a prior `run`, after a failed
/// `run`, and more than once.
pub trait Task: Send {
    /// Name used in logs, metrics and wrapped errors.
    fn name(&self) -> &str;

    /// Produce row-messages onto `out` until exhausted, cancelled or failed.
    fn run(&mut self, ctx: SharedTaskContext, out: TaskSender) -> BoxFuture<'_, Result<()>>;

    /// Release resources. Idempotent.
    fn close(&mut self) -> Result<()>;
}

pub type BoxedTask = Box<dyn Task>;

/// A spawned task: its output receiver plus the join handle.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    rx: Option<TaskReceiver>,
    join: JoinHandle<Result<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next message from the task, `None` once it finished or the query quit.
    pub async fn recv(&mut self) -> Option<RecordBatch> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Next message for a task that forwards into `out`.
    ///
    /// Also `None` once the consumer of `out` detached, so an operator stops
    /// waiting on an idle input as soon as nobody reads its output.
    pub async fn recv_for(&mut self, out: &TaskSender) -> Option<RecordBatch> {
        tokio::select! {
            biased;
            _ = out.closed() => None,
            batch = self.recv() => batch,
        }
    }

    /// Move the receiver out, e.g. to merge several children.
    pub fn take_receiver(&mut self) -> Option<TaskReceiver> {
        self.rx.take()
    }

    /// Detach from the output and wait for the task to terminate.
    pub async fn finish(mut self) -> Result<()> {
        self.rx.take();
        match self.join.await {
            Ok(res) => res,
            Err(e) => Err(FedqError::Execution(format!(
                "task {} did not complete: {e}",
                self.name
            ))),
        }
    }
}

/// Spawn `task` on the runtime with a fresh bounded output channel.
pub fn spawn_task(task: BoxedTask, ctx: SharedTaskContext) -> TaskHandle {
    let (tx, rx) = task_channel(ctx.channel_capacity, ctx.quit_signal().clone());
    let name = task.name().to_string();
    let join = tokio::spawn(drive_task(task, ctx, tx));
    TaskHandle {
        name,
        rx: Some(rx),
        join,
    }
}

/// Run a task to completion, then close it.
///
/// The channel behind `out` is closed when `run` returns, before `close`.
/// Failures are recorded on the context, which fires the quit signal.
pub async fn drive_task(
    mut task: BoxedTask,
    ctx: SharedTaskContext,
    out: TaskSender,
) -> Result<()> {
    let name = task.name().to_string();
    let stats = out.stats();
    let started = Instant::now();

    let result = if ctx.is_cancelled() {
        drop(out);
        debug!(query_id = %ctx.query_id, task = %name, "skipping task: query cancelled");
        Ok(())
    } else {
        debug!(query_id = %ctx.query_id, task = %name, "task started");
        task.run(ctx.clone(), out).await
    };

    if let Err(e) = task.close() {
        warn!(query_id = %ctx.query_id, task = %name, error = %e, "task close failed");
    }

    if let Some(m) = ctx.metrics() {
        m.record_task(
            &ctx.query_id.to_string(),
            &name,
            stats.rows(),
            stats.batches(),
            started.elapsed().as_secs_f64(),
        );
    }

    match result {
        Ok(()) => {
            debug!(
                query_id = %ctx.query_id,
                task = %name,
                rows_out = stats.rows(),
                batches_out = stats.batches(),
                "task finished"
            );
            Ok(())
        }
        Err(e) => {
            if ctx.record_failure(&name, &e) {
                error!(query_id = %ctx.query_id, task = %name, error = %e, "task failed");
            } else {
                debug!(
                    query_id = %ctx.query_id,
                    task = %name,
                    error = %e,
                    "task unwound after failure"
                );
            }
            Err(e)
        }
    }
}

/// Drive `child` on the caller's task, forwarding its output into `out`.
///
/// Returns `Ok(false)` when `out` stopped accepting messages. The child's
/// channel is dropped as soon as that happens, so the child sees a detached
/// consumer even while it waits on its own input.
pub async fn drive_inline(
    child: &mut dyn Task,
    ctx: &SharedTaskContext,
    out: &mut TaskSender,
) -> Result<bool> {
    let (tx, mut rx) = task_channel(ctx.channel_capacity, ctx.quit_signal().clone());
    let produce = child.run(ctx.clone(), tx);
    let forward = async move {
        loop {
            let next = tokio::select! {
                biased;
                _ = out.closed() => return false,
                batch = rx.recv() => batch,
            };
            let Some(batch) = next else {
                return !out.is_detached();
            };
            if !out.send(batch).await {
                return false;
            }
        }
    };
    let (res, open) = futures::join!(produce, forward);
    res.map(|()| open && !ctx.is_cancelled())
}

/// Take a task's input exactly once.
pub(crate) fn take_input(slot: &mut Option<BoxedTask>, owner: &str) -> Result<BoxedTask> {
    slot.take()
        .ok_or_else(|| FedqError::Execution(format!("task {owner} was already run")))
}

/// Close an input that was never handed to `spawn_task`.
pub(crate) fn close_input(slot: &mut Option<BoxedTask>) -> Result<()> {
    match slot.take() {
        Some(mut task) => task.close(),
        None => Ok(()),
    }
}
