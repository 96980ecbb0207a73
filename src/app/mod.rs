pub mod ports;

pub use ports::{
    AccelerationPort, ArtifactSink, JobReporterPort, NoopReporter, RemoteError, RemoteRequest, RemoteResponse,
    StepContext,
};
