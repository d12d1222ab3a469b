pub mod client;
pub mod config;
pub mod connection_pool;
pub mod controller;
pub mod demand;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod percentiles;
pub mod reporter;
pub mod runner;
pub mod stats;
pub mod trace;
pub mod utils;
pub mod worker;
pub mod yaml_config;
