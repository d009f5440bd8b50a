use crate::config::BatchConfig;
use crate::transport::Transport;
use anyhow::{Result, anyhow};
use model::ProbeResult;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

/// Handle through which probers hand results to the aggregator.
///
/// Holds only a weak reference to the queue: once the aggregator is closed,
/// sending fails instead of keeping the queue open.
#[derive(Clone)]
pub struct ResultSender {
    tx: mpsc::WeakSender<ProbeResult>,
}

impl From<&mpsc::Sender<ProbeResult>> for ResultSender {
    fn from(tx: &mpsc::Sender<ProbeResult>) -> Self {
        Self { tx: tx.downgrade() }
    }
}

impl ResultSender {
    /// Queues one result. Waits while the queue is full.
    pub async fn send(&self, result: ProbeResult) -> Result<()> {
        let tx = self
            .tx
            .upgrade()
            .ok_or_else(|| anyhow!("aggregator is closed"))?;
        tx.send(result)
            .await
            .map_err(|e| anyhow!("aggregator is closed, dropped result for host {}", e.0.host_id))
    }
}

/// Groups results from all probers into batches bounded by count and age,
/// and delivers each batch through a [`Transport`].
///
/// A single loop task owns the batch buffer. A batch is flushed when it holds
/// `size` results, when `timeout` has passed since its first result, or when
/// the aggregator is closed. Failed deliveries are logged and dropped.
pub struct BatchAggregator {
    tx: mpsc::Sender<ProbeResult>,
    handle: JoinHandle<()>,
    drain_timeout: Duration,
}

impl BatchAggregator {
    /// Creates the aggregator and spawns its loop on the current runtime.
    pub fn new(conf: &BatchConfig, transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::channel(conf.queue_capacity());
        let aggregation = Aggregation {
            rx,
            transport,
            batch: Vec::with_capacity(conf.size),
            size: conf.size,
            timeout: conf.timeout,
            deliver_timeout: conf.deliver_timeout,
        };
        let handle = tokio::spawn(aggregation.run());

        Self {
            tx,
            handle,
            drain_timeout: conf.drain_timeout,
        }
    }

    pub fn sender(&self) -> ResultSender {
        ResultSender::from(&self.tx)
    }

    /// Flushes the pending batch and stops the loop.
    ///
    /// Must be called after every producer has stopped sending. Returns once
    /// the final delivery attempt finished or the drain timeout expired.
    pub async fn close(self) {
        let Self {
            tx,
            mut handle,
            drain_timeout,
        } = self;
        // the loop sees the queue close once the last strong sender is gone
        drop(tx);

        match time::timeout(drain_timeout, &mut handle).await {
            Ok(Ok(())) => tracing::debug!("Aggregator drained"),
            Ok(Err(e)) => tracing::warn!("Aggregation loop failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "Aggregator drain timed out after {:?}, dropping pending batch",
                    drain_timeout
                );
                handle.abort();
            }
        }
    }
}

// State owned by the aggregation loop.
struct Aggregation {
    rx: mpsc::Receiver<ProbeResult>,
    transport: Arc<dyn Transport>,
    batch: Vec<ProbeResult>,
    size: usize,
    timeout: Duration,
    deliver_timeout: Duration,
}

impl Aggregation {
    async fn run(mut self) {
        tracing::debug!(
            "Aggregator started (size: {}, timeout: {:?})",
            self.size,
            self.timeout
        );

        while let Some(first) = self.rx.recv().await {
            self.batch.clear();
            self.batch.push(first);

            let closed = self.fill(Instant::now() + self.timeout).await;
            self.flush().await;

            if closed {
                break;
            }
        }

        tracing::debug!("Aggregator stopped");
    }

    // Collects results until the batch is full, the deadline passes or the
    // queue closes. Returns true when the queue is closed.
    async fn fill(&mut self, deadline: Instant) -> bool {
        // zero timeout: the first result goes out alone
        if deadline <= Instant::now() {
            return false;
        }

        let timer = time::sleep_until(deadline);
        tokio::pin!(timer);

        while self.batch.len() < self.size {
            tokio::select! {
                biased;

                _ = &mut timer => {
                    tracing::trace!("Batch timer fired with {} results", self.batch.len());
                    return false;
                }
                next = self.rx.recv() => match next {
                    Some(result) => self.batch.push(result),
                    None => return true,
                },
            }
        }
        false
    }

    async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let count = self.batch.len();
        match time::timeout(self.deliver_timeout, self.transport.deliver(&self.batch)).await {
            Ok(Ok(())) => {
                tracing::debug!("Batch of {} results delivered", count);
            }
            Ok(Err(e)) => {
                tracing::error!(
                    "Transport '{}' failed, dropping batch of {} results: {:#}",
                    self.transport.name(),
                    count,
                    e
                );
            }
            Err(_) => {
                tracing::error!(
                    "Transport '{}' timed out after {:?}, dropping batch of {} results",
                    self.transport.name(),
                    self.deliver_timeout,
                    count
                );
            }
        }
        self.batch.clear();
    }
}
