//! Bounded task output channels.
//!
//! Each task owns exactly one [`TaskSender`]. Dropping it closes the channel,
//! which is the only completion signal downstream consumers rely on.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use arrow::record_batch::RecordBatch;
use futures::Stream;
use tokio::sync::mpsc;

use crate::context::QuitSignal;

/// Counters of what went through a channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    rows: AtomicU64,
    batches: AtomicU64,
}

impl ChannelStats {
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

/// Create a bounded channel whose blocking points observe `quit`.
///
/// Backpressure: when the receiver is slow and the buffer fills up,
/// `sender.send(..).await` waits until there is capacity again or the query is
/// cancelled.
pub fn task_channel(capacity: usize, quit: QuitSignal) -> (TaskSender, TaskReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TaskSender {
            tx,
            quit: quit.clone(),
            stats: Arc::new(ChannelStats::default()),
        },
        TaskReceiver { rx, quit },
    )
}

/// Producer side of a task output channel.
#[derive(Debug)]
pub struct TaskSender {
    tx: mpsc::Sender<RecordBatch>,
    quit: QuitSignal,
    stats: Arc<ChannelStats>,
}

impl TaskSender {
    /// Send one message.
    ///
    /// Returns `false` when the producer should stop: the query was cancelled
    /// or the consumer detached. Neither is an error.
    pub async fn send(&mut self, batch: RecordBatch) -> bool {
        if self.quit.is_cancelled() {
            return false;
        }
        let rows = batch.num_rows() as u64;
        let sent = tokio::select! {
            biased;
            _ = self.quit.cancelled() => false,
            res = self.tx.send(batch) => res.is_ok(),
        };
        if sent {
            self.stats.rows.fetch_add(rows, Ordering::Relaxed);
            self.stats.batches.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// True once the consumer dropped its receiver.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer dropped its receiver. Producers waiting on
    /// their own input select on this next to the quit signal.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer side of a task output channel.
#[derive(Debug)]
pub struct TaskReceiver {
    rx: mpsc::Receiver<RecordBatch>,
    quit: QuitSignal,
}

impl TaskReceiver {
    /// Receive the next message.
    ///
    /// `None` means the producer closed the channel or the query was cancelled.
    pub async fn recv(&mut self) -> Option<RecordBatch> {
        if self.quit.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.quit.cancelled() => None,
            next = self.rx.recv() => next,
        }
    }
}

/// Raw stream view used when merging several children; cancellation is
/// observed by the caller's select loop instead.
impl Stream for TaskReceiver {
    type Item = RecordBatch;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
