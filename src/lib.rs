pub mod api;
pub mod config;
pub mod handlers;
pub mod humanize;
pub mod jobs;
pub mod ledger;
pub mod messaging;
pub mod observability;
pub mod queue;
pub mod server;
pub mod storage;
pub mod submit;
pub mod worker;
