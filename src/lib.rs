pub mod app;
pub mod auth;
pub mod billing_period;
pub mod cost;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod server;
pub mod storage;
pub mod usage;
