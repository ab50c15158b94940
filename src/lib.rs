//! # tasktrail
//!
//! Lifecycle audit trail for queued background tasks.
//!
//! A [`Client`](client::Client) submits tasks to a [`Broker`](broker::Broker)
//! and records them as `created`; a [`Processor`](processor::Processor) runs
//! them and records `in_progress`, then `completed` or `failed`. Records
//! live in a relational [`TaskStore`](store::TaskStore) so task history
//! outlives the queue's own state.

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod processor;
pub mod store;
pub mod telemetry;

pub use broker::{Broker, Task, TaskContext, TaskInfo};
pub use client::{Client, ClientOptions, EnqueueOptions};
pub use error::{Error, HandlerError, HandlerResult, Result};
pub use model::{Status, TaskRecord};
pub use processor::{Processor, ProcessorConfig, ServeMux};
pub use store::{SqlStore, TaskStore};
