//! Broker capability — what the edge relay needs from a pub/sub client.
//!
//! The relay never talks to a broker directly. Connection management,
//! keep-alive and reconnects belong to the implementation.

use std::future::Future;
use std::sync::Arc;

use ferry_core::Message;

/// Called on the broker's dispatch path for every delivered message.
/// Must return quickly and must not block on I/O.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connect failed: {0}")]
    Connect(String),
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("broker client is not connected")]
    NotConnected,
}

pub trait BrokerClient: Send + Sync {
    fn connect(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}
