//! Boundary to the managed remote execution service.

use std::{any::Any, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteJobState {
    Pending,
    Running,
    Cancelling,
    Draining,
    Succeeded,
    Failed,
    Cancelled,
    Drained,
    Updated,
    /// A state string the client did not recognise. Treated as terminal.
    Unknown(String),
}

impl RemoteJobState {
    pub fn from_api(raw: &str) -> Self {
        match raw {
            "JOB_STATE_UNKNOWN" | "JOB_STATE_STOPPED" | "JOB_STATE_PENDING"
            | "JOB_STATE_QUEUED" => RemoteJobState::Pending,
            "JOB_STATE_RUNNING" => RemoteJobState::Running,
            "JOB_STATE_CANCELLING" | "JOB_STATE_RESOURCE_CLEANING_UP" => {
                RemoteJobState::Cancelling
            }
            "JOB_STATE_DRAINING" => RemoteJobState::Draining,
            "JOB_STATE_DONE" => RemoteJobState::Succeeded,
            "JOB_STATE_FAILED" => RemoteJobState::Failed,
            "JOB_STATE_CANCELLED" => RemoteJobState::Cancelled,
            "JOB_STATE_DRAINED" => RemoteJobState::Drained,
            "JOB_STATE_UPDATED" => RemoteJobState::Updated,
            other => RemoteJobState::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteJobState::Succeeded
                | RemoteJobState::Failed
                | RemoteJobState::Cancelled
                | RemoteJobState::Drained
                | RemoteJobState::Updated
                | RemoteJobState::Unknown(_)
        )
    }
}

impl fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RemoteJobState::Pending => "JOB_STATE_PENDING",
            RemoteJobState::Running => "JOB_STATE_RUNNING",
            RemoteJobState::Cancelling => "JOB_STATE_CANCELLING",
            RemoteJobState::Draining => "JOB_STATE_DRAINING",
            RemoteJobState::Succeeded => "JOB_STATE_DONE",
            RemoteJobState::Failed => "JOB_STATE_FAILED",
            RemoteJobState::Cancelled => "JOB_STATE_CANCELLED",
            RemoteJobState::Drained => "JOB_STATE_DRAINED",
            RemoteJobState::Updated => "JOB_STATE_UPDATED",
            RemoteJobState::Unknown(raw) => raw.as_str(),
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobType {
    #[default]
    Unspecified,
    Batch,
    Streaming,
}

impl JobType {
    pub fn from_api(raw: &str) -> Self {
        match raw {
            "JOB_TYPE_BATCH" => JobType::Batch,
            "JOB_TYPE_STREAMING" => JobType::Streaming,
            _ => JobType::Unspecified,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteJobStatus {
    pub id: String,
    pub name: String,
    pub state: RemoteJobState,
    pub job_type: JobType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobLookup {
    ById(String),
    /// Every job whose name equals `name`, or starts with it when `prefix`.
    ByName { name: String, prefix: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobQuery {
    pub project_id: String,
    pub location: String,
    pub lookup: JobLookup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelMode {
    Cancel,
    Drain,
}

impl CancelMode {
    pub fn requested_state(self) -> &'static str {
        match self {
            CancelMode::Cancel => "JOB_STATE_CANCELLED",
            CancelMode::Drain => "JOB_STATE_DRAINED",
        }
    }
}

/// Credentials made available to a launched process. Whatever backs them
/// (a token file, a refreshed session) lives as long as this value.
#[derive(Default)]
pub struct AuthorizedContext {
    envs: Vec<(String, String)>,
    _guard: Option<Box<dyn Any + Send + Sync>>,
}

impl AuthorizedContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(envs: Vec<(String, String)>, guard: impl Any + Send + Sync) -> Self {
        Self {
            envs,
            _guard: Some(Box::new(guard)),
        }
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }
}

impl fmt::Debug for AuthorizedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.envs.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("AuthorizedContext")
            .field("env_keys", &keys)
            .finish()
    }
}

#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// True if a non-terminal job whose name starts with `name` exists.
    async fn is_job_running(&self, name: &str, project_id: &str, location: &str) -> Result<bool>;

    async fn job_statuses(&self, query: &JobQuery) -> Result<Vec<RemoteJobStatus>>;

    async fn request_cancel(
        &self,
        job_id: &str,
        project_id: &str,
        location: &str,
        mode: CancelMode,
    ) -> Result<()>;

    fn default_project_id(&self) -> Option<String>;

    fn authorize(&self) -> Result<AuthorizedContext>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_states_map_onto_terminality() {
        for raw in ["JOB_STATE_UNKNOWN", "JOB_STATE_QUEUED", "JOB_STATE_STOPPED", "JOB_STATE_PENDING"] {
            assert_eq!(RemoteJobState::from_api(raw), RemoteJobState::Pending);
        }
        assert!(!RemoteJobState::from_api("JOB_STATE_RUNNING").is_terminal());
        assert!(!RemoteJobState::from_api("JOB_STATE_DRAINING").is_terminal());
        assert!(RemoteJobState::from_api("JOB_STATE_DONE").is_terminal());
        assert!(RemoteJobState::from_api("JOB_STATE_UPDATED").is_terminal());
    }

    #[test]
    fn unrecognised_state_is_terminal_and_keeps_raw_text() {
        let state = RemoteJobState::from_api("JOB_STATE_SOMETHING_NEW");
        assert!(state.is_terminal());
        assert_eq!(state.to_string(), "JOB_STATE_SOMETHING_NEW");
    }

    #[test]
    fn authorized_context_releases_guard_on_drop() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        let ctx = AuthorizedContext::new(vec![("TOKEN_FILE".into(), path.display().to_string())], file);
        assert!(path.exists());
        assert_eq!(ctx.envs().len(), 1);
        drop(ctx);
        assert!(!path.exists());
    }
}
