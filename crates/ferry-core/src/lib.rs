//! ferry-core — the message type and configuration shared by the edge relay
//! and the ingestion service. All other Ferry crates depend on this one.

pub mod config;
pub mod message;

pub use message::Message;
