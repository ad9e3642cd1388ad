pub mod api;
pub mod breaker;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod render;
pub mod router;
pub mod sink;
pub mod store;
pub mod utils;
pub mod worker;
