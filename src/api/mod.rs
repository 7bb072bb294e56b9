//! Broker service
//!
//! fjall allows one process per keyspace, so the `broker` command is the
//! only process that opens the broker and ledger partitions. Workers, the
//! status updater and the CLI talk to it over HTTP through
//! [`RemoteBroker`] and [`RemoteOperationStore`], which implement the same
//! [`BrokerClient`](crate::queue::BrokerClient) and
//! [`OperationStore`](crate::ledger::OperationStore) seams as the embedded
//! stores.

mod client;
mod error;
pub mod models;
mod server;
mod services;
pub mod state;

pub use client::{ConnectError, RemoteBroker, RemoteOperationStore};
pub use error::ApiError;
pub use server::{router, run, serve};
pub use state::AppState;
