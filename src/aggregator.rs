use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{PingStatus, ProbeResult};

/// Progress callback, invoked once per completed target with `(completed, total)`.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Live counters for a run in progress. Cheap to clone; all clones share state.
#[derive(Clone, Debug, Default)]
pub struct SharedProgress {
    pub total: Arc<AtomicU64>,
    pub done: Arc<AtomicU64>,
    pub reachable: Arc<AtomicU64>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.done.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
            self.reachable.load(Ordering::Relaxed),
        )
    }
}

/// Worker side of the result channel. Append-only: results can be sent, never edited.
#[derive(Clone, Debug)]
pub struct ResultSink {
    tx: mpsc::UnboundedSender<ProbeResult>,
}

impl ResultSink {
    /// Hand a finished result to the aggregator. Returns false if the aggregator is gone.
    pub fn emit(&self, result: ProbeResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Single consumer that drains worker results into a finished list.
pub struct Aggregator {
    rx: mpsc::UnboundedReceiver<ProbeResult>,
    total: usize,
    progress: SharedProgress,
    on_progress: Option<ProgressFn>,
}

/// Create a connected sink/aggregator pair for a run of `total` targets.
pub fn channel(total: usize, progress: SharedProgress) -> (ResultSink, Aggregator) {
    let (tx, rx) = mpsc::unbounded_channel();
    progress.total.store(total as u64, Ordering::Relaxed);
    progress.done.store(0, Ordering::Relaxed);
    progress.reachable.store(0, Ordering::Relaxed);
    (
        ResultSink { tx },
        Aggregator {
            rx,
            total,
            progress,
            on_progress: None,
        },
    )
}

impl Aggregator {
    pub fn with_progress(mut self, f: Option<ProgressFn>) -> Self {
        self.on_progress = f;
        self
    }

    /// Receive results until every sink has been dropped, keeping completion order.
    pub async fn collect(mut self) -> Vec<ProbeResult> {
        let mut out = Vec::with_capacity(self.total);
        while let Some(result) = self.rx.recv().await {
            if result.ping == PingStatus::Success {
                self.progress.reachable.fetch_add(1, Ordering::Relaxed);
            }
            let done = self.progress.done.fetch_add(1, Ordering::Relaxed) as usize + 1;
            trace!(host = %result.target, done, total = self.total, "result collected");
            out.push(result);
            if let Some(f) = &self.on_progress {
                f(done, self.total);
            }
        }
        out
    }
}
