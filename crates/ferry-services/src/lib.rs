//! ferry-services — the moving parts of both Ferry processes.
//!
//! Edge side: [`MessageBuffer`], [`FlushScheduler`], [`DeliveryClient`] and
//! [`EdgeRelay`] over any [`BrokerClient`]. Cloud side: [`ConnectionPool`],
//! [`WorkerPool`] and [`BatchInserter`].

pub mod broker;
pub mod buffer;
pub mod delivery;
pub mod inserter;
pub mod pool;
pub mod relay;
pub mod retry;
pub mod scheduler;
pub mod worker_pool;

pub use broker::{BrokerClient, BrokerError, MessageHandler};
pub use buffer::{AppendOutcome, MessageBuffer};
pub use delivery::{BatchSink, DeliveryClient, DeliveryError};
pub use inserter::{BatchInserter, InsertReport};
pub use pool::{ConnectionPool, StoreError};
pub use relay::EdgeRelay;
pub use retry::RetryQueue;
pub use scheduler::{CycleReport, FlushScheduler, FlushStats};
pub use worker_pool::{PoolError, WorkerPool};
