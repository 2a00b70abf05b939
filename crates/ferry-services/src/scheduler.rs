//! Flush scheduler — the periodic drain-and-send cycle of the edge relay.
//!
//! Each tick resends parked batches, then drains the buffer and sends what
//! it got. Sends happen inside the scheduler task, one at a time. On
//! shutdown the timer stops and one final cycle runs under a timeout, so a
//! graceful stop does not strand buffered messages.
//!
//!   Idle → (tick) → Draining → Sending → Idle
//!   Idle → (shutdown) → FinalFlush → Stopped

use std::collections::VecDeque;
use std::time::Duration;

use ferry_core::Message;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::buffer::MessageBuffer;
use crate::delivery::BatchSink;
use crate::retry::RetryQueue;

/// What one flush cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub batches_sent: usize,
    pub messages_sent: usize,
    /// Messages parked in the retry queue for a later cycle.
    pub messages_parked: usize,
    /// Messages dropped for good.
    pub messages_lost: usize,
}

/// Running totals over the scheduler's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub cycles: u64,
    pub batches_sent: u64,
    pub messages_sent: u64,
    pub messages_lost: u64,
}

impl FlushStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.batches_sent += report.batches_sent as u64;
        self.messages_sent += report.messages_sent as u64;
        self.messages_lost += report.messages_lost as u64;
    }
}

pub struct FlushScheduler<S> {
    buffer: MessageBuffer,
    sink: S,
    interval: Duration,
    /// None means failed batches are dropped on the spot.
    retry: Option<RetryQueue>,
    final_flush_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
    stats: FlushStats,
}

impl<S: BatchSink> FlushScheduler<S> {
    pub fn new(
        buffer: MessageBuffer,
        sink: S,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            buffer,
            sink,
            interval,
            retry: None,
            final_flush_timeout: Duration::from_secs(10),
            shutdown,
            stats: FlushStats::default(),
        }
    }

    /// Keep up to `max_batches` failed batches for resending.
    pub fn with_retry(mut self, max_batches: usize) -> Self {
        self.retry = Some(RetryQueue::new(max_batches));
        self
    }

    pub fn with_final_flush_timeout(mut self, timeout: Duration) -> Self {
        self.final_flush_timeout = timeout;
        self
    }

    /// Messages waiting in the retry queue.
    pub fn pending_retries(&self) -> usize {
        self.retry.as_ref().map_or(0, RetryQueue::message_count)
    }

    /// Tick until shutdown, then run the final flush. Returns lifetime totals.
    pub async fn run(mut self) -> FlushStats {
        self.tick_until_shutdown().await;
        self.finish().await
    }

    /// Run periodic cycles until the shutdown signal arrives. The final
    /// flush is left to [`finish`](Self::finish).
    pub async fn tick_until_shutdown(&mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs_f64(), "flush scheduler started");

        loop {
            let stop = tokio::select! {
                _ = self.shutdown.recv() => true,
                _ = interval.tick() => false,
            };
            if stop {
                break;
            }
            let report = self.flush_once().await;
            self.stats.record(&report);
        }
    }

    /// One last cycle under the final-flush timeout. Whatever is still
    /// unsent afterwards, in flight or parked, is counted as lost.
    pub async fn finish(mut self) -> FlushStats {
        tracing::info!("flush scheduler stopping, running final flush");

        let mut report = CycleReport::default();
        let mut batches = self.collect();
        let timeout = self.final_flush_timeout;
        let timed_out = tokio::time::timeout(timeout, self.deliver(&mut batches, &mut report))
            .await
            .is_err();

        let unsent: usize = batches.iter().map(Vec::len).sum();
        if timed_out {
            tracing::warn!(
                timeout_secs = timeout.as_secs_f64(),
                messages = unsent,
                "final flush timed out, unsent messages discarded"
            );
        }
        report.messages_lost += unsent;

        let parked: usize = self
            .retry
            .as_mut()
            .map_or(0, |retry| retry.take_all().iter().map(Vec::len).sum());
        if parked > 0 {
            tracing::warn!(messages = parked, "undelivered messages discarded at shutdown");
            report.messages_lost += parked;
        }
        self.stats.record(&report);

        tracing::info!(
            cycles = self.stats.cycles,
            batches_sent = self.stats.batches_sent,
            messages_sent = self.stats.messages_sent,
            messages_lost = self.stats.messages_lost,
            "flush scheduler stopped"
        );
        self.stats
    }

    /// One cycle: parked batches first, then a fresh drain.
    ///
    /// After the first failed send the remaining batches are parked without
    /// another attempt.
    pub async fn flush_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let mut batches = self.collect();
        if batches.is_empty() {
            return report;
        }
        self.deliver(&mut batches, &mut report).await;

        tracing::debug!(
            sent = report.messages_sent,
            parked = report.messages_parked,
            lost = report.messages_lost,
            buffer_dropped = self.buffer.dropped(),
            "flush cycle finished"
        );
        report
    }

    fn collect(&mut self) -> VecDeque<Vec<Message>> {
        let mut batches: VecDeque<Vec<Message>> = match self.retry.as_mut() {
            Some(retry) => retry.take_all().into(),
            None => VecDeque::new(),
        };
        let fresh = self.buffer.drain_all();
        if !fresh.is_empty() {
            batches.push_back(fresh);
        }
        batches
    }

    // A batch leaves `batches` only once it is sent or parked, so a caller
    // that abandons this future still holds everything unsent.
    async fn deliver(&mut self, batches: &mut VecDeque<Vec<Message>>, report: &mut CycleReport) {
        let mut endpoint_down = false;
        while let Some(batch) = batches.front() {
            let sent = !endpoint_down
                && match self.sink.send(batch).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, messages = batch.len(), "failed to send batch");
                        endpoint_down = true;
                        false
                    }
                };
            let Some(batch) = batches.pop_front() else {
                break;
            };
            if sent {
                report.batches_sent += 1;
                report.messages_sent += batch.len();
            } else {
                self.park(batch, report);
            }
        }
    }

    fn park(&mut self, batch: Vec<Message>, report: &mut CycleReport) {
        let Some(retry) = self.retry.as_mut() else {
            tracing::error!(messages = batch.len(), "batch dropped after failed delivery");
            report.messages_lost += batch.len();
            return;
        };
        report.messages_parked += batch.len();
        if let Some(evicted) = retry.push(batch) {
            tracing::error!(
                messages = evicted.len(),
                "retry queue full, oldest batch dropped"
            );
            report.messages_parked -= evicted.len().min(report.messages_parked);
            report.messages_lost += evicted.len();
        }
    }
}
