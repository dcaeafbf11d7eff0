//! Drives one launch attempt: assembles options, applies the duplicate-job
//! policy, launches, and follows the remote job to completion.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::{ExecutionTarget, LaunchSpec, RemoteJobConfig, DEFAULT_LOCATION},
    error::{LaunchError, Result},
    executor::LaunchExecutor,
    job_id::RemoteJobHandle,
    job_name::build_job_name,
    options::{merge, EngineOptions, PipelineOptions},
    remote::RemoteJobClient,
    tracker::{DuplicateDecision, RemoteJobTracker, TrackerSettings},
};

/// Where a launched remote job can be found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLink {
    pub job_name: String,
    pub job_id: Option<String>,
    pub project_id: String,
    pub location: String,
}

pub trait ResultSink: Send + Sync {
    fn publish_job(&self, link: &JobLink);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Ran on the local/direct runner.
    Local,
    /// Remote job reached a successful state.
    Completed,
    /// Remote job submitted without waiting for it.
    Submitted,
    /// An equivalent job was running; nothing was launched.
    SkippedDuplicate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub disposition: Disposition,
    pub job_name: Option<String>,
    pub job_id: Option<String>,
}

#[derive(Clone)]
struct ActiveJob {
    handle: RemoteJobHandle,
    tracker: RemoteJobTracker,
}

pub struct Coordinator {
    spec: LaunchSpec,
    executor: LaunchExecutor,
    client: Arc<dyn RemoteJobClient>,
    active: Mutex<Option<ActiveJob>>,
}

impl Coordinator {
    pub fn new(spec: LaunchSpec, executor: LaunchExecutor, client: Arc<dyn RemoteJobClient>) -> Self {
        Self {
            spec,
            executor,
            client,
            active: Mutex::new(None),
        }
    }

    /// Identity of the remote job this coordinator launched, if any.
    pub fn current_job(&self) -> Option<RemoteJobHandle> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| active.handle.clone())
    }

    pub async fn execute(&self, sink: &dyn ResultSink) -> Result<ExecutionOutcome> {
        match self.spec.target() {
            ExecutionTarget::Local => self.execute_local().await,
            ExecutionTarget::ManagedRemote => self.execute_remote(sink).await,
        }
    }

    /// Cancels the remote job if its id is known. Safe to call at any time.
    pub async fn on_kill(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(active) = active else {
            info!("kill requested before any remote job was launched");
            return;
        };
        match active.handle.job_id() {
            Some(job_id) => {
                active
                    .tracker
                    .cancel(job_id, active.handle.project_id(), active.handle.location())
                    .await;
            }
            None => info!(
                "kill requested but no job id was captured for {}; nothing to cancel",
                active.handle.job_name()
            ),
        }
    }

    fn user_overrides(&self) -> PipelineOptions {
        let mut overrides = self.spec.pipeline_options.clone();
        if self.spec.pipeline.stamps_version_label() {
            overrides.stamp_version_label();
        }
        overrides
    }

    async fn execute_local(&self) -> Result<ExecutionOutcome> {
        if self.spec.dataflow.is_some() {
            warn!(
                "dataflow configuration is ignored for runner {}; it only applies to the managed runner",
                self.spec.runner
            );
        }
        let options = self.assemble_options(None, None);
        self.executor
            .launch(&self.spec.pipeline, &self.spec.runner, &options, &[], &|_: &str| {})
            .await?;
        Ok(ExecutionOutcome {
            disposition: Disposition::Local,
            job_name: None,
            job_id: None,
        })
    }

    async fn execute_remote(&self, sink: &dyn ResultSink) -> Result<ExecutionOutcome> {
        let config = self.spec.dataflow.clone().unwrap_or_default();
        let pipeline = &self.spec.pipeline;

        let project_id = config
            .project_id
            .clone()
            .or_else(|| self.client.default_project_id())
            .ok_or_else(|| {
                LaunchError::Configuration(
                    "project_id is required for the managed runner and no default project is configured"
                        .into(),
                )
            })?;
        let base_name = config
            .job_name
            .clone()
            .unwrap_or_else(|| self.spec.task_id.clone());
        let job_name = build_job_name(&base_name, config.append_job_name)?;
        let options = self.remote_options(&config, &job_name, &project_id);

        let location = config
            .location
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        let tracker = RemoteJobTracker::new(self.client.clone(), TrackerSettings::from(&config));
        let decision = tracker
            .resolve_duplicate_policy(config.check_if_running, &base_name, &project_id, &location)
            .await?;
        if decision == DuplicateDecision::Skip {
            return Ok(ExecutionOutcome {
                disposition: Disposition::SkippedDuplicate,
                job_name: Some(job_name),
                job_id: None,
            });
        }

        let handle = RemoteJobHandle::new(job_name.clone(), location.clone(), project_id.clone());
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveJob {
            handle: handle.clone(),
            tracker: tracker.clone(),
        });

        info!("launching {job_name} in project {project_id}");
        {
            let auth = self.client.authorize()?;
            let on_line = |line: &str| handle.process_line(line);
            self.executor
                .launch(pipeline, &self.spec.runner, &options, auth.envs(), &on_line)
                .await?;
        }

        let job_id = handle.job_id().map(str::to_string);
        if job_id.is_none() {
            warn!("no job id found in the output of {job_name}");
        }
        sink.publish_job(&JobLink {
            job_name: job_name.clone(),
            job_id: job_id.clone(),
            project_id,
            location,
        });

        if config.location.is_none() {
            return Ok(ExecutionOutcome {
                disposition: Disposition::Submitted,
                job_name: Some(job_name),
                job_id,
            });
        }
        tracker
            .wait_for_completion(&handle, config.multiple_jobs)
            .await?;
        Ok(ExecutionOutcome {
            disposition: Disposition::Completed,
            job_name: Some(job_name),
            job_id,
        })
    }

    fn remote_options(&self, config: &RemoteJobConfig, job_name: &str, project_id: &str) -> PipelineOptions {
        let pipeline = &self.spec.pipeline;
        if !pipeline.supports_impersonation() && config.impersonation_chain.is_some() {
            info!(
                "impersonation_chain is not supported for {} pipelines and will not be passed on",
                pipeline.kind()
            );
        }
        let engine = EngineOptions {
            job_name: job_name.to_string(),
            service_account: config.service_account.clone(),
            impersonation_chain: config.impersonation_chain.clone(),
            supports_impersonation: pipeline.supports_impersonation(),
            project_id: Some(project_id.to_string()),
            region: config.location.clone(),
        };
        self.assemble_options(Some(&engine), Some(pipeline.job_name_key()))
    }

    /// Merges the option layers and normalises keys for the pipeline's SDK.
    fn assemble_options(
        &self,
        engine: Option<&EngineOptions>,
        job_name_key: Option<&str>,
    ) -> PipelineOptions {
        let merged = merge(
            &self.spec.default_pipeline_options,
            engine,
            &self.user_overrides(),
            job_name_key,
        );
        if self.spec.pipeline.snake_case_options() {
            merged.to_snake_case()
        } else {
            merged
        }
    }
}
