//! Edge relay — ties the broker subscription to the message buffer and
//! runs the flush scheduler until shutdown.
//!
//! On shutdown the subscription is closed before the final flush, so the
//! final drain sees everything the broker will ever hand over.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ferry_core::Message;

use crate::broker::{BrokerClient, BrokerError, MessageHandler};
use crate::buffer::{AppendOutcome, MessageBuffer};
use crate::delivery::BatchSink;
use crate::scheduler::{FlushScheduler, FlushStats};

pub struct EdgeRelay<B> {
    broker: B,
    buffer: MessageBuffer,
    /// Cleared once shutdown begins; the callback stops appending.
    accepting: Arc<AtomicBool>,
    /// Messages the callback turned away after `accepting` was cleared.
    refused: Arc<AtomicU64>,
}

impl<B: BrokerClient> EdgeRelay<B> {
    pub fn new(broker: B, buffer: MessageBuffer) -> Self {
        Self {
            broker,
            buffer,
            accepting: Arc::new(AtomicBool::new(true)),
            refused: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// The subscription callback: append and nothing else.
    pub fn subscription_callback(&self) -> MessageHandler {
        let buffer = self.buffer.clone();
        let accepting = self.accepting.clone();
        let refused = self.refused.clone();
        Arc::new(move |msg: Message| {
            if !accepting.load(Ordering::SeqCst) {
                refused.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic = %msg.topic, "message arrived after shutdown, dropped");
                return;
            }
            tracing::debug!(topic = %msg.topic, bytes = msg.payload.len(), "message received");
            if buffer.append(msg) == AppendOutcome::Rejected {
                tracing::debug!("buffer full, message rejected");
            }
        })
    }

    /// Connect and subscribe. Either failure is returned as-is; nothing is
    /// retried here.
    pub async fn start(&self, topic: &str) -> Result<(), BrokerError> {
        self.broker.connect().await?;
        tracing::info!("connected to broker");

        self.broker
            .subscribe(topic, self.subscription_callback())
            .await?;
        tracing::info!(topic, "subscribed");
        Ok(())
    }

    /// Tick until shutdown, close the subscription, then run the final
    /// flush. Messages that still reach the buffer after the final drain,
    /// or arrive once the subscription is closed, are counted as lost.
    pub async fn run<S: BatchSink>(&self, mut scheduler: FlushScheduler<S>) -> FlushStats {
        scheduler.tick_until_shutdown().await;

        self.accepting.store(false, Ordering::SeqCst);
        self.broker.disconnect().await;
        tracing::info!("disconnected from broker");

        let mut stats = scheduler.finish().await;

        let stranded = self.buffer.drain_all().len() as u64;
        let refused = self.refused.load(Ordering::Relaxed);
        if stranded + refused > 0 {
            tracing::warn!(stranded, refused, "messages discarded at shutdown");
            stats.messages_lost += stranded + refused;
        }
        stats
    }
}
