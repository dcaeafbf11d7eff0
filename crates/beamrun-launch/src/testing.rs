//! In-memory collaborators shared by the unit tests.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    artifacts::ArtifactFetcher,
    coordinator::{JobLink, ResultSink},
    error::{LaunchError, Result},
    process::{CommandSpec, ProcessLauncher, ProcessOutcome},
    remote::{
        AuthorizedContext, CancelMode, JobQuery, JobType, RemoteJobClient, RemoteJobState,
        RemoteJobStatus,
    },
};

pub(crate) fn status(id: &str, state: RemoteJobState, job_type: JobType) -> RemoteJobStatus {
    RemoteJobStatus {
        id: id.to_string(),
        name: format!("{id}-name"),
        state,
        job_type,
    }
}

#[derive(Default)]
pub(crate) struct FakeRemoteClient {
    running: Mutex<VecDeque<bool>>,
    running_names: Mutex<Vec<String>>,
    statuses: Mutex<VecDeque<Vec<RemoteJobStatus>>>,
    last_statuses: Mutex<Vec<RemoteJobStatus>>,
    status_queries: Mutex<Vec<JobQuery>>,
    cancels: Mutex<Vec<(String, CancelMode)>>,
    cancel_fails: AtomicBool,
    pub(crate) default_project: Option<String>,
    authorizations: AtomicUsize,
    auth_live: Arc<AtomicBool>,
}

struct AuthGuard(Arc<AtomicBool>);

impl Drop for AuthGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FakeRemoteClient {
    pub(crate) fn with_default_project(project: &str) -> Self {
        Self {
            default_project: Some(project.to_string()),
            ..Self::default()
        }
    }

    /// Answers for successive running checks; `false` once exhausted.
    pub(crate) fn script_running(&self, answers: impl IntoIterator<Item = bool>) {
        self.running.lock().unwrap().extend(answers);
    }

    /// Answers for successive status queries; the last one repeats.
    pub(crate) fn script_statuses(&self, answers: impl IntoIterator<Item = Vec<RemoteJobStatus>>) {
        self.statuses.lock().unwrap().extend(answers);
    }

    pub(crate) fn fail_cancel(&self) {
        self.cancel_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn running_checks(&self) -> usize {
        self.running_names.lock().unwrap().len()
    }

    pub(crate) fn running_names(&self) -> Vec<String> {
        self.running_names.lock().unwrap().clone()
    }

    pub(crate) fn status_queries(&self) -> Vec<JobQuery> {
        self.status_queries.lock().unwrap().clone()
    }

    pub(crate) fn cancel_requests(&self) -> Vec<(String, CancelMode)> {
        self.cancels.lock().unwrap().clone()
    }

    pub(crate) fn authorizations(&self) -> usize {
        self.authorizations.load(Ordering::SeqCst)
    }

    pub(crate) fn authorization_live(&self) -> bool {
        self.auth_live.load(Ordering::SeqCst)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.running_checks()
            + self.status_queries.lock().unwrap().len()
            + self.cancels.lock().unwrap().len()
            + self.authorizations()
    }
}

#[async_trait]
impl RemoteJobClient for FakeRemoteClient {
    async fn is_job_running(&self, name: &str, _project_id: &str, _location: &str) -> Result<bool> {
        self.running_names.lock().unwrap().push(name.to_string());
        Ok(self.running.lock().unwrap().pop_front().unwrap_or(false))
    }

    async fn job_statuses(&self, query: &JobQuery) -> Result<Vec<RemoteJobStatus>> {
        self.status_queries.lock().unwrap().push(query.clone());
        let mut last = self.last_statuses.lock().unwrap();
        if let Some(next) = self.statuses.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    async fn request_cancel(
        &self,
        job_id: &str,
        _project_id: &str,
        _location: &str,
        mode: CancelMode,
    ) -> Result<()> {
        self.cancels.lock().unwrap().push((job_id.to_string(), mode));
        if self.cancel_fails.load(Ordering::SeqCst) {
            return Err(LaunchError::RemoteQuery("cancel rejected".into()));
        }
        Ok(())
    }

    fn default_project_id(&self) -> Option<String> {
        self.default_project.clone()
    }

    fn authorize(&self) -> Result<AuthorizedContext> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        self.auth_live.store(true, Ordering::SeqCst);
        Ok(AuthorizedContext::new(
            vec![("BEAMRUN_TEST_AUTH".into(), "granted".into())],
            AuthGuard(self.auth_live.clone()),
        ))
    }
}

/// Reply a [`ScriptedLauncher`] gives to one command.
#[derive(Clone, Debug, Default)]
pub(crate) struct Reply {
    pub(crate) lines: Vec<String>,
    pub(crate) exit_code: i32,
}

impl Reply {
    pub(crate) fn lines(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|line| line.to_string()).collect(),
            exit_code: 0,
        }
    }

    pub(crate) fn exit(code: i32) -> Self {
        Self {
            lines: vec![format!("exit {code}")],
            exit_code: code,
        }
    }
}

/// Records every command and plays back scripted replies; commands without
/// a scripted reply succeed silently.
#[derive(Default)]
pub(crate) struct ScriptedLauncher {
    replies: Mutex<VecDeque<Reply>>,
    commands: Mutex<Vec<CommandSpec>>,
    existing_paths: Mutex<Vec<PathBuf>>,
}

impl ScriptedLauncher {
    pub(crate) fn with_replies(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    /// Arguments that named an existing file or directory at call time.
    pub(crate) fn existing_paths(&self) -> Vec<PathBuf> {
        self.existing_paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn run(
        &self,
        command: &CommandSpec,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> Result<ProcessOutcome> {
        self.commands.lock().unwrap().push(command.clone());
        {
            let mut existing = self.existing_paths.lock().unwrap();
            for arg in &command.args {
                let path = Path::new(arg);
                if path.is_absolute() && path.exists() {
                    existing.push(path.to_path_buf());
                }
            }
        }
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();
        for line in &reply.lines {
            on_line(line);
        }
        Ok(ProcessOutcome {
            exit_code: Some(reply.exit_code),
            recent_output: reply.lines.join("\n"),
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeFetcher {
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch_to_local(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        self.fetched.lock().unwrap().push(url.to_string());
        let name = url.rsplit('/').next().unwrap_or("artifact");
        let path = dest_dir.join(name);
        fs::write(&path, b"artifact")?;
        Ok(path)
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    links: Mutex<Vec<JobLink>>,
}

impl RecordingSink {
    pub(crate) fn links(&self) -> Vec<JobLink> {
        self.links.lock().unwrap().clone()
    }
}

impl ResultSink for RecordingSink {
    fn publish_job(&self, link: &JobLink) {
        self.links.lock().unwrap().push(link.clone());
    }
}
