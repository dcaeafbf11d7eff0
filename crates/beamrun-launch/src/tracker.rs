use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::{
    config::{DuplicatePolicy, RemoteJobConfig},
    error::{LaunchError, Result},
    job_id::RemoteJobHandle,
    remote::{
        CancelMode, JobLookup, JobQuery, JobType, RemoteJobClient, RemoteJobState,
        RemoteJobStatus,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateDecision {
    Proceed,
    Skip,
}

#[derive(Clone, Debug)]
pub struct TrackerSettings {
    pub poll_sleep: Duration,
    pub drain_pipeline: bool,
    pub cancel_timeout: Duration,
    pub wait_until_finished: Option<bool>,
    pub duplicate_wait_timeout: Option<Duration>,
    pub completion_timeout: Option<Duration>,
}

impl From<&RemoteJobConfig> for TrackerSettings {
    fn from(config: &RemoteJobConfig) -> Self {
        Self {
            poll_sleep: config.poll_sleep(),
            drain_pipeline: config.drain_pipeline,
            cancel_timeout: config.cancel_timeout(),
            wait_until_finished: config.wait_until_finished,
            duplicate_wait_timeout: config.duplicate_wait_timeout(),
            completion_timeout: config.completion_timeout(),
        }
    }
}

/// Polls and steers jobs on the remote service.
#[derive(Clone)]
pub struct RemoteJobTracker {
    client: Arc<dyn RemoteJobClient>,
    settings: TrackerSettings,
}

impl RemoteJobTracker {
    pub fn new(client: Arc<dyn RemoteJobClient>, settings: TrackerSettings) -> Self {
        Self { client, settings }
    }

    pub async fn is_running(&self, base_name: &str, project_id: &str, location: &str) -> Result<bool> {
        self.client
            .is_job_running(&base_name.to_lowercase(), project_id, location)
            .await
    }

    pub async fn resolve_duplicate_policy(
        &self,
        policy: DuplicatePolicy,
        base_name: &str,
        project_id: &str,
        location: &str,
    ) -> Result<DuplicateDecision> {
        match policy {
            DuplicatePolicy::IgnoreJob => Ok(DuplicateDecision::Proceed),
            DuplicatePolicy::FinishIfRunning => {
                if self.is_running(base_name, project_id, location).await? {
                    info!("job {base_name} is already running; skipping launch");
                    Ok(DuplicateDecision::Skip)
                } else {
                    Ok(DuplicateDecision::Proceed)
                }
            }
            DuplicatePolicy::WaitForRun => {
                let started = Instant::now();
                while self.is_running(base_name, project_id, location).await? {
                    if let Some(limit) = self.settings.duplicate_wait_timeout {
                        if started.elapsed() >= limit {
                            return Err(LaunchError::DuplicateWaitTimeout {
                                job_name: base_name.to_string(),
                                waited: started.elapsed(),
                            });
                        }
                    }
                    info!(
                        "job {base_name} is still running; checking again in {:?}",
                        self.settings.poll_sleep
                    );
                    sleep(self.settings.poll_sleep).await;
                }
                Ok(DuplicateDecision::Proceed)
            }
        }
    }

    /// Polls until every job the handle refers to is finished. Which jobs
    /// those are depends on whether the id is known and on `multiple_jobs`.
    pub async fn wait_for_completion(
        &self,
        handle: &RemoteJobHandle,
        multiple_jobs: bool,
    ) -> Result<()> {
        let lookup = match handle.job_id() {
            Some(job_id) if !multiple_jobs => JobLookup::ById(job_id.to_string()),
            _ => JobLookup::ByName {
                name: handle.job_name().to_string(),
                prefix: multiple_jobs,
            },
        };
        let query = JobQuery {
            project_id: handle.project_id().to_string(),
            location: handle.location().to_string(),
            lookup,
        };

        let started = Instant::now();
        loop {
            let jobs = self.client.job_statuses(&query).await?;
            if !jobs.is_empty() && self.all_finished(&jobs)? {
                info!("job {} finished", handle.job_name());
                return Ok(());
            }
            if let Some(limit) = self.settings.completion_timeout {
                if started.elapsed() >= limit {
                    return Err(LaunchError::CompletionTimeout {
                        job_name: handle.job_name().to_string(),
                        timeout: limit,
                    });
                }
            }
            sleep(self.settings.poll_sleep).await;
        }
    }

    fn all_finished(&self, jobs: &[RemoteJobStatus]) -> Result<bool> {
        let mut finished = true;
        for job in jobs {
            match &job.state {
                RemoteJobState::Succeeded => {}
                RemoteJobState::Running if self.returns_while_running(job.job_type) => {}
                state if state.is_terminal() => {
                    return Err(LaunchError::TerminalState {
                        job: job.id.clone(),
                        state: state.clone(),
                    });
                }
                state => {
                    info!("job {} is {state}", job.id);
                    finished = false;
                }
            }
        }
        Ok(finished)
    }

    fn returns_while_running(&self, job_type: JobType) -> bool {
        match self.settings.wait_until_finished {
            Some(wait) => !wait,
            None => job_type == JobType::Streaming,
        }
    }

    /// Asks the service to stop `job_id` and waits for it to settle. Failures
    /// are logged and swallowed.
    pub async fn cancel(&self, job_id: &str, project_id: &str, location: &str) {
        let query = JobQuery {
            project_id: project_id.to_string(),
            location: location.to_string(),
            lookup: JobLookup::ById(job_id.to_string()),
        };
        let jobs = match self.client.job_statuses(&query).await {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!("failed to look up job {job_id} before cancelling: {err}");
                Vec::new()
            }
        };
        if !jobs.is_empty() && jobs.iter().all(|job| job.state.is_terminal()) {
            info!("job {job_id} is already in a terminal state; nothing to cancel");
            return;
        }

        let streaming = jobs.iter().any(|job| job.job_type == JobType::Streaming);
        let mode = if self.settings.drain_pipeline && streaming {
            CancelMode::Drain
        } else {
            CancelMode::Cancel
        };
        info!("requesting {mode:?} for job {job_id}");
        if let Err(err) = self
            .client
            .request_cancel(job_id, project_id, location, mode)
            .await
        {
            warn!("failed to cancel job {job_id}: {err}");
            return;
        }

        let settle = async {
            loop {
                match self.client.job_statuses(&query).await {
                    Ok(jobs) if !jobs.is_empty() && jobs.iter().all(|job| job.state.is_terminal()) => {
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => warn!("failed to poll job {job_id} after cancel: {err}"),
                }
                sleep(self.settings.poll_sleep).await;
            }
        };
        if tokio::time::timeout(self.settings.cancel_timeout, settle)
            .await
            .is_err()
        {
            warn!(
                "job {job_id} did not reach a terminal state within {:?} of the cancel request",
                self.settings.cancel_timeout
            );
        } else {
            info!("job {job_id} stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{status, FakeRemoteClient};

    fn settings() -> TrackerSettings {
        TrackerSettings::from(&RemoteJobConfig::default())
    }

    fn tracker(client: &Arc<FakeRemoteClient>, settings: TrackerSettings) -> RemoteJobTracker {
        RemoteJobTracker::new(client.clone(), settings)
    }

    fn handle(job_id: Option<&str>) -> RemoteJobHandle {
        let handle = RemoteJobHandle::new("etl-1a2b3c4d", "us-central1", "proj");
        if let Some(job_id) = job_id {
            handle.set_job_id(job_id);
        }
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn ignore_policy_makes_no_queries() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_running([true]);
        let decision = tracker(&client, settings())
            .resolve_duplicate_policy(DuplicatePolicy::IgnoreJob, "etl", "proj", "us-central1")
            .await
            .unwrap();
        assert_eq!(decision, DuplicateDecision::Proceed);
        assert_eq!(client.running_checks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_if_running_skips_running_job() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_running([true]);
        let decision = tracker(&client, settings())
            .resolve_duplicate_policy(DuplicatePolicy::FinishIfRunning, "ETL", "proj", "us-central1")
            .await
            .unwrap();
        assert_eq!(decision, DuplicateDecision::Skip);
        assert_eq!(client.running_checks(), 1);
        assert_eq!(client.running_names(), vec!["etl".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_run_polls_until_clear() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_running([true, false]);
        let started = Instant::now();
        let decision = tracker(&client, settings())
            .resolve_duplicate_policy(DuplicatePolicy::WaitForRun, "etl", "proj", "us-central1")
            .await
            .unwrap();
        assert_eq!(decision, DuplicateDecision::Proceed);
        assert_eq!(client.running_checks(), 2);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_run_honours_timeout() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_running([true; 10]);
        let mut settings = settings();
        settings.duplicate_wait_timeout = Some(Duration::from_secs(25));
        let err = tracker(&client, settings)
            .resolve_duplicate_policy(DuplicatePolicy::WaitForRun, "etl", "proj", "us-central1")
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::DuplicateWaitTimeout { .. }));
        assert_eq!(client.running_checks(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_wait_polls_by_id_until_done() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([
            vec![],
            vec![status("job-1", RemoteJobState::Running, JobType::Batch)],
            vec![status("job-1", RemoteJobState::Succeeded, JobType::Batch)],
        ]);
        tracker(&client, settings())
            .wait_for_completion(&handle(Some("job-1")), false)
            .await
            .unwrap();
        let queries = client.status_queries();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].lookup, JobLookup::ById("job-1".into()));
        assert_eq!(queries[0].project_id, "proj");
    }

    #[tokio::test(start_paused = true)]
    async fn completion_wait_falls_back_to_name_lookup() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([vec![status("job-1", RemoteJobState::Succeeded, JobType::Batch)]]);
        tracker(&client, settings())
            .wait_for_completion(&handle(None), false)
            .await
            .unwrap();
        tracker(&client, settings())
            .wait_for_completion(&handle(Some("job-1")), true)
            .await
            .unwrap();
        let queries = client.status_queries();
        assert_eq!(
            queries[0].lookup,
            JobLookup::ByName { name: "etl-1a2b3c4d".into(), prefix: false }
        );
        assert_eq!(
            queries[1].lookup,
            JobLookup::ByName { name: "etl-1a2b3c4d".into(), prefix: true }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_terminal_state_is_an_error() {
        for state in [
            RemoteJobState::Failed,
            RemoteJobState::Cancelled,
            RemoteJobState::Drained,
            RemoteJobState::Updated,
            RemoteJobState::Unknown("JOB_STATE_MYSTERY".into()),
        ] {
            let client = Arc::new(FakeRemoteClient::default());
            client.script_statuses([vec![status("job-1", state.clone(), JobType::Batch)]]);
            let err = tracker(&client, settings())
                .wait_for_completion(&handle(Some("job-1")), false)
                .await
                .unwrap_err();
            assert!(
                matches!(err, LaunchError::TerminalState { state: ref got, .. } if *got == state),
                "unexpected error for {state}: {err}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_jobs_return_once_running() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([
            vec![status("job-1", RemoteJobState::Pending, JobType::Streaming)],
            vec![status("job-1", RemoteJobState::Running, JobType::Streaming)],
        ]);
        tracker(&client, settings())
            .wait_for_completion(&handle(Some("job-1")), false)
            .await
            .unwrap();
        assert_eq!(client.status_queries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_finished_overrides_job_type() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([vec![status("job-1", RemoteJobState::Running, JobType::Batch)]]);
        let mut no_wait = settings();
        no_wait.wait_until_finished = Some(false);
        tracker(&client, no_wait)
            .wait_for_completion(&handle(Some("job-1")), false)
            .await
            .unwrap();

        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([
            vec![status("job-1", RemoteJobState::Running, JobType::Streaming)],
            vec![status("job-1", RemoteJobState::Succeeded, JobType::Streaming)],
        ]);
        let mut wait = settings();
        wait.wait_until_finished = Some(true);
        tracker(&client, wait)
            .wait_for_completion(&handle(Some("job-1")), false)
            .await
            .unwrap();
        assert_eq!(client.status_queries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_timeout_bounds_the_wait() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([vec![status("job-1", RemoteJobState::Running, JobType::Batch)]]);
        let mut settings = settings();
        settings.completion_timeout = Some(Duration::from_secs(30));
        let err = tracker(&client, settings)
            .wait_for_completion(&handle(Some("job-1")), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::CompletionTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drains_streaming_jobs_when_configured() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([
            vec![status("job-1", RemoteJobState::Running, JobType::Streaming)],
            vec![status("job-1", RemoteJobState::Draining, JobType::Streaming)],
            vec![status("job-1", RemoteJobState::Drained, JobType::Streaming)],
        ]);
        let mut settings = settings();
        settings.drain_pipeline = true;
        tracker(&client, settings).cancel("job-1", "proj", "us-central1").await;
        assert_eq!(client.cancel_requests(), vec![("job-1".to_string(), CancelMode::Drain)]);
        assert_eq!(client.status_queries().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_uses_cancel_for_batch_even_when_draining() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([
            vec![status("job-1", RemoteJobState::Running, JobType::Batch)],
            vec![status("job-1", RemoteJobState::Cancelled, JobType::Batch)],
        ]);
        let mut settings = settings();
        settings.drain_pipeline = true;
        tracker(&client, settings).cancel("job-1", "proj", "us-central1").await;
        assert_eq!(client.cancel_requests(), vec![("job-1".to_string(), CancelMode::Cancel)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_leaves_terminal_jobs_alone() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([vec![status("job-1", RemoteJobState::Succeeded, JobType::Batch)]]);
        tracker(&client, settings()).cancel("job-1", "proj", "us-central1").await;
        assert!(client.cancel_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_failures_are_swallowed() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([vec![status("job-1", RemoteJobState::Running, JobType::Batch)]]);
        client.fail_cancel();
        tracker(&client, settings()).cancel("job-1", "proj", "us-central1").await;
        assert_eq!(client.cancel_requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_gives_up_after_timeout() {
        let client = Arc::new(FakeRemoteClient::default());
        client.script_statuses([vec![status("job-1", RemoteJobState::Cancelling, JobType::Batch)]]);
        let started = Instant::now();
        tracker(&client, settings()).cancel("job-1", "proj", "us-central1").await;
        assert_eq!(client.cancel_requests().len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert!(started.elapsed() < Duration::from_secs(320));
    }
}
