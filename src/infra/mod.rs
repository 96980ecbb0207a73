// Outbound adapters for the application ports

pub mod http_client;
pub mod job_reporter;

pub use http_client::ReqwestAcceleration;
pub use job_reporter::HttpJobReporter;
