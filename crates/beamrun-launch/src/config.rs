use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use beamrun_util::{env_or, env_u64, env_var};

use crate::{
    error::{LaunchError, Result},
    options::PipelineOptions,
    pipeline::PipelineSpec,
};

pub const MANAGED_RUNNER: &str = "DataflowRunner";
pub const DEFAULT_RUNNER: &str = "DirectRunner";
pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_DATAFLOW_ENDPOINT: &str = "https://dataflow.googleapis.com/v1b3";
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionTarget {
    Local,
    ManagedRemote,
}

impl ExecutionTarget {
    pub fn from_runner(runner: &str) -> Self {
        if runner.eq_ignore_ascii_case(MANAGED_RUNNER) {
            ExecutionTarget::ManagedRemote
        } else {
            ExecutionTarget::Local
        }
    }
}

/// What to do when a job with the same base name is already running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    IgnoreJob,
    FinishIfRunning,
    #[default]
    WaitForRun,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImpersonationChain {
    Single(String),
    Chain(Vec<String>),
}

impl ImpersonationChain {
    pub fn joined(&self) -> String {
        match self {
            ImpersonationChain::Single(account) => account.clone(),
            ImpersonationChain::Chain(accounts) => accounts.join(","),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteJobConfig {
    /// Base job name. Falls back to the launch's task id when unset.
    pub job_name: Option<String>,
    pub append_job_name: bool,
    pub project_id: Option<String>,
    /// Region of the job. Clearing it makes the launch fire-and-forget.
    pub location: Option<String>,
    pub service_account: Option<String>,
    pub impersonation_chain: Option<ImpersonationChain>,
    pub check_if_running: DuplicatePolicy,
    pub poll_sleep_secs: u64,
    pub drain_pipeline: bool,
    pub cancel_timeout_secs: u64,
    pub wait_until_finished: Option<bool>,
    pub multiple_jobs: bool,
    pub duplicate_wait_timeout_secs: Option<u64>,
    pub completion_timeout_secs: Option<u64>,
}

impl Default for RemoteJobConfig {
    fn default() -> Self {
        Self {
            job_name: None,
            append_job_name: true,
            project_id: None,
            location: Some(DEFAULT_LOCATION.to_string()),
            service_account: None,
            impersonation_chain: None,
            check_if_running: DuplicatePolicy::WaitForRun,
            poll_sleep_secs: 10,
            drain_pipeline: false,
            cancel_timeout_secs: 300,
            wait_until_finished: None,
            multiple_jobs: false,
            duplicate_wait_timeout_secs: None,
            completion_timeout_secs: None,
        }
    }
}

impl RemoteJobConfig {
    pub fn poll_sleep(&self) -> Duration {
        Duration::from_secs(self.poll_sleep_secs)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }

    pub fn duplicate_wait_timeout(&self) -> Option<Duration> {
        self.duplicate_wait_timeout_secs.map(Duration::from_secs)
    }

    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_secs.map(Duration::from_secs)
    }
}

/// A complete launch request, usually read from a JSON file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    #[serde(default = "default_task_id")]
    pub task_id: String,
    #[serde(default = "default_runner")]
    pub runner: String,
    pub pipeline: PipelineSpec,
    #[serde(default)]
    pub default_pipeline_options: PipelineOptions,
    #[serde(default)]
    pub pipeline_options: PipelineOptions,
    #[serde(default)]
    pub dataflow: Option<RemoteJobConfig>,
}

fn default_task_id() -> String {
    "beamrun-task".to_string()
}

fn default_runner() -> String {
    DEFAULT_RUNNER.to_string()
}

impl LaunchSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|err| {
            LaunchError::Configuration(format!("invalid launch file {}: {err}", path.display()))
        })
    }

    pub fn target(&self) -> ExecutionTarget {
        ExecutionTarget::from_runner(&self.runner)
    }
}

/// Endpoints and credentials for the concrete remote collaborators.
#[derive(Clone)]
pub struct ServiceConfig {
    pub dataflow_endpoint: String,
    pub storage_endpoint: String,
    pub access_token: Option<String>,
    pub project_id: Option<String>,
    pub http_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            dataflow_endpoint: env_or("BEAMRUN_DATAFLOW_ENDPOINT", DEFAULT_DATAFLOW_ENDPOINT),
            storage_endpoint: env_or("BEAMRUN_STORAGE_ENDPOINT", DEFAULT_STORAGE_ENDPOINT),
            access_token: env_var("BEAMRUN_ACCESS_TOKEN"),
            project_id: env_var("BEAMRUN_PROJECT").or_else(|| env_var("GOOGLE_CLOUD_PROJECT")),
            http_timeout: Duration::from_secs(env_u64("BEAMRUN_HTTP_TIMEOUT_SECS", 60)),
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("dataflow_endpoint", &self.dataflow_endpoint)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("project_id", &self.project_id)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}
