//! Message — the `{topic, payload}` unit carried from broker to store.
//!
//! The JSON shape is the wire contract between the edge relay and the
//! ingestion service: a batch is a plain JSON array of these objects.

use serde::{Deserialize, Serialize};

/// One message received from the broker.
///
/// No identity beyond topic, payload and the order it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Build a message from a raw broker payload. Invalid UTF-8 is replaced,
    /// never rejected.
    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}
