pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod rule_seed;
pub mod scheduler;
pub mod state;
