pub mod client;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod event_log;
pub mod fetch;
pub mod metrics;
pub mod queue;
pub mod server;
pub mod utils;
pub mod worker;
