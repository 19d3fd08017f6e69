//! logstream - durable event bus
//!
//! Every event record is appended to a crash-safe, segmented log before it
//! is fanned out to subscribed destinations. Delivery state is derived from
//! confirmation markers in the same log, so undelivered records survive a
//! crash and are re-sent on restart, and executions interrupted by a crash
//! are reconstructed from their logged node events.

pub mod bus;
pub mod config;
pub mod destination;
pub mod event;
pub mod execution;
pub mod log;
pub mod recovery;
pub mod storage;
pub mod utils;

pub use bus::{BusConfig, BusError, ConfirmCallback, EventBus};
pub use config::Config;
pub use event::{ConfirmSource, EventKind, EventRecord};
