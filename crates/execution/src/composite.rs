//! Sequential and parallel task groups.

use fedq_common::{FedqError, Result};
use futures::StreamExt;
use futures::future::BoxFuture;
use tracing::debug;

use crate::channel::TaskSender;
use crate::context::SharedTaskContext;
use crate::task::{BoxedTask, Task, TaskHandle, drive_inline, spawn_task};

/// Runs children one after another on the caller's task.
///
/// Output is each child's output in child order. A failing child aborts the
/// remaining ones.
pub struct SequentialTask {
    name: String,
    children: Vec<BoxedTask>,
    ran: bool,
}

impl SequentialTask {
    pub fn new(name: impl Into<String>, children: Vec<BoxedTask>) -> Self {
        Self {
            name: name.into(),
            children,
            ran: false,
        }
    }
}

impl Task for SequentialTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if std::mem::replace(&mut self.ran, true) {
                return Err(FedqError::Execution(format!(
                    "task {} was already run",
                    self.name
                )));
            }
            for child in self.children.iter_mut() {
                if ctx.is_cancelled() {
                    break;
                }
                let res = drive_inline(child.as_mut(), &ctx, &mut out).await;
                let closed = child.close();
                let open = match res {
                    Ok(open) => open,
                    Err(e) => {
                        ctx.record_failure(child.name(), &e);
                        return Err(e);
                    }
                };
                closed?;
                if !open {
                    debug!(
                        query_id = %ctx.query_id,
                        task = %self.name,
                        "sequential output detached"
                    );
                    break;
                }
            }
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        for child in self.children.iter_mut() {
            if let Err(e) = child.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Runs every child on its own spawned task and merges their outputs.
///
/// Each child's own order is preserved; there is no order across children.
/// The output closes only after every child has terminated.
pub struct ParallelTask {
    name: String,
    children: Vec<BoxedTask>,
}

impl ParallelTask {
    pub fn new(name: impl Into<String>, children: Vec<BoxedTask>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

impl Task for ParallelTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let children = std::mem::take(&mut self.children);
            let mut handles = children
                .into_iter()
                .map(|child| spawn_task(child, ctx.clone()))
                .collect::<Vec<TaskHandle>>();
            debug!(
                query_id = %ctx.query_id,
                task = %self.name,
                children = handles.len(),
                "parallel fan-out"
            );

            let receivers = handles
                .iter_mut()
                .filter_map(TaskHandle::take_receiver)
                .collect::<Vec<_>>();
            let mut merged = futures::stream::select_all(receivers);
            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => None,
                    _ = out.closed() => None,
                    batch = merged.next() => batch,
                };
                let Some(batch) = next else { break };
                if !out.send(batch).await {
                    break;
                }
            }
            drop(merged);

            let mut first_err = None;
            for handle in handles {
                if let Err(e) = handle.finish().await {
                    first_err.get_or_insert(e);
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        for mut child in self.children.drain(..) {
            if let Err(e) = child.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
