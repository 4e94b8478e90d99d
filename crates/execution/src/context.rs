use std::sync::{Arc, Mutex};

use fedq_common::{FedqError, MetricsRegistry, QueryId};
use tokio::sync::watch;

/// Query-wide quit signal.
///
/// Every blocking point of a task (writing its output, reading a child)
/// selects on [`QuitSignal::cancelled`]. Once fired it stays fired.
#[derive(Debug, Clone)]
pub struct QuitSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for QuitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl QuitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so `wait_for` can only return
        // after observing `true`.
        let _ = rx.wait_for(|quit| *quit).await;
    }
}

/// First task failure recorded for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: String,
    pub message: String,
}

/// Task-scoped execution context shared by every task of one query.
#[derive(Debug)]
pub struct TaskContext {
    /// Query this task tree belongs to.
    pub query_id: QueryId,

    /// Capacity of each task output channel.
    pub channel_capacity: usize,

    /// Target batch size for operators that build new batches.
    pub batch_size_rows: usize,

    quit: QuitSignal,
    failure: Mutex<Option<TaskFailure>>,
    metrics: Option<MetricsRegistry>,
}

pub type SharedTaskContext = Arc<TaskContext>;

impl TaskContext {
    pub fn new(query_id: QueryId, channel_capacity: usize, batch_size_rows: usize) -> Self {
        Self {
            query_id,
            channel_capacity: channel_capacity.max(1),
            batch_size_rows: batch_size_rows.max(1),
            quit: QuitSignal::new(),
            failure: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn into_shared(self) -> SharedTaskContext {
        Arc::new(self)
    }

    pub fn quit_signal(&self) -> &QuitSignal {
        &self.quit
    }

    /// Ask every task of the query to unwind.
    pub fn cancel(&self) {
        self.quit.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.quit.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.quit.cancelled().await
    }

    /// Record a task failure and fire the quit signal so siblings unwind.
    ///
    /// Only the first failure is kept; returns `true` when this was it.
    pub fn record_failure(&self, task: &str, err: &FedqError) -> bool {
        let first = {
            let mut slot = self.failure.lock().expect("task failure lock poisoned");
            if slot.is_none() {
                *slot = Some(TaskFailure {
                    task: task.to_string(),
                    message: err.to_string(),
                });
                true
            } else {
                false
            }
        };
        if let Some(m) = &self.metrics {
            m.record_task_failure(&self.query_id.to_string(), task);
        }
        self.quit.cancel();
        first
    }

    pub fn failure(&self) -> Option<TaskFailure> {
        self.failure
            .lock()
            .expect("task failure lock poisoned")
            .clone()
    }

    pub fn metrics(&self) -> Option<&MetricsRegistry> {
        self.metrics.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn quit_signal_wakes_waiters() {
        let quit = QuitSignal::new();
        let waiter = {
            let quit = quit.clone();
            tokio::spawn(async move { quit.cancelled().await })
        };
        tokio::task::yield_now().await;
        assert!(!quit.is_cancelled());
        quit.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .expect("join");
        // already-fired signals resolve immediately
        tokio::time::timeout(Duration::from_millis(100), quit.cancelled())
            .await
            .expect("immediate");
    }

    #[test]
    fn only_first_failure_is_kept() {
        let ctx = TaskContext::new(QueryId(1), 4, 16);
        assert!(ctx.record_failure("a", &FedqError::Execution("first".to_string())));
        assert!(!ctx.record_failure("b", &FedqError::Execution("second".to_string())));
        let failure = ctx.failure().expect("failure recorded");
        assert_eq!(failure.task, "a");
        assert!(failure.message.contains("first"));
        assert!(ctx.is_cancelled());
    }
}
