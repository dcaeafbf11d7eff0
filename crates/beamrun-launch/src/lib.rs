//! Launches data-processing pipelines (Python, Java or Go SDK) on a local
//! runner or on the managed remote runner, and follows remote jobs through
//! duplicate detection, completion and cancellation.

pub mod artifacts;
pub mod config;
pub mod coordinator;
pub mod dataflow;
pub mod error;
pub mod executor;
pub mod job_id;
pub mod job_name;
pub mod ledger;
pub mod options;
pub mod pipeline;
pub mod process;
pub mod remote;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use artifacts::{ArtifactFetcher, ArtifactSource, HttpArtifactFetcher, ScopedArtifact};
pub use config::{
    DuplicatePolicy, ExecutionTarget, ImpersonationChain, LaunchSpec, RemoteJobConfig,
    ServiceConfig,
};
pub use coordinator::{Coordinator, Disposition, ExecutionOutcome, JobLink, ResultSink};
pub use dataflow::DataflowClient;
pub use error::{LaunchError, Result};
pub use executor::LaunchExecutor;
pub use job_id::RemoteJobHandle;
pub use job_name::build_job_name;
pub use ledger::{LaunchLedger, LaunchRecord};
pub use options::{OptionValue, PipelineOptions};
pub use pipeline::PipelineSpec;
pub use process::{CommandSpec, ProcessLauncher, ProcessOutcome, TokioProcessLauncher};
pub use remote::{CancelMode, RemoteJobClient, RemoteJobState};
pub use tracker::RemoteJobTracker;
