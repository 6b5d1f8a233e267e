pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod storage;

// Layered boundaries for application ports and their infrastructure adapters
pub mod app;
pub mod infra;
