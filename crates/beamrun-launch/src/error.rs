use std::{io, time::Duration};

use thiserror::Error;

use crate::remote::RemoteJobState;

#[derive(Debug, Error)]
pub enum LaunchError {
    /// Missing or contradictory launch configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid job name '{0}': must match ^[a-z]([-a-z0-9]*[a-z0-9])?$ and be at most {max} characters", max = crate::job_name::MAX_JOB_NAME_LEN)]
    InvalidJobName(String),

    #[error("failed to fetch artifact {url}: {message}")]
    ArtifactFetch { url: String, message: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The pipeline process (or one of its setup steps) exited non-zero.
    #[error("{program} failed with exit code {code}")]
    ProcessFailed {
        program: String,
        code: i32,
        recent_output: String,
    },

    #[error("remote service query failed: {0}")]
    RemoteQuery(String),

    #[error("remote job {job} finished in state {state}")]
    TerminalState { job: String, state: RemoteJobState },

    #[error("job {job_name} still running after waiting {waited:?} for it to finish")]
    DuplicateWaitTimeout { job_name: String, waited: Duration },

    #[error("job {job_name} did not reach a terminal state within {timeout:?}")]
    CompletionTimeout { job_name: String, timeout: Duration },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LaunchError {
    pub fn remote(err: impl std::fmt::Display) -> Self {
        LaunchError::RemoteQuery(err.to_string())
    }
}

pub type Result<T, E = LaunchError> = std::result::Result<T, E>;
