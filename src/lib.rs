pub mod coerce;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod rules;
pub mod types;

// Ports the flow depends on and the adapters that implement them
pub mod app;
pub mod infra;
