// Observability: metrics catalog and Prometheus recorder

pub mod metrics;

pub use metrics::{init, render};
