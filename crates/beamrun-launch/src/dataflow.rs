//! REST client for the managed runner's `v1b3` jobs API.

use std::io::Write;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::{
    config::ServiceConfig,
    error::{LaunchError, Result},
    remote::{
        AuthorizedContext, CancelMode, JobLookup, JobQuery, JobType, RemoteJobClient,
        RemoteJobState, RemoteJobStatus,
    },
};

pub const TOKEN_FILE_ENV: &str = "CLOUDSDK_AUTH_ACCESS_TOKEN_FILE";
pub const PROJECT_ENV: &str = "CLOUDSDK_CORE_PROJECT";

#[derive(Clone)]
pub struct DataflowClient {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
    project_id: Option<String>,
}

impl std::fmt::Debug for DataflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataflowClient")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiJob {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    current_state: String,
    #[serde(default, rename = "type")]
    job_type: String,
}

impl From<ApiJob> for RemoteJobStatus {
    fn from(job: ApiJob) -> Self {
        let state = if job.current_state.is_empty() {
            RemoteJobState::Pending
        } else {
            RemoteJobState::from_api(&job.current_state)
        };
        RemoteJobStatus {
            id: job.id,
            name: job.name,
            state,
            job_type: JobType::from_api(&job.job_type),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListJobsResponse {
    #[serde(default)]
    jobs: Vec<ApiJob>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateJobRequest<'a> {
    requested_state: &'a str,
}

impl DataflowClient {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("beamrun/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| LaunchError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.dataflow_endpoint.clone(),
            access_token: config.access_token.clone(),
            project_id: config.project_id.clone(),
        })
    }

    fn jobs_url(&self, project_id: &str, location: &str, job_id: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| LaunchError::Configuration(format!("invalid dataflow endpoint: {e}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                LaunchError::Configuration(format!("invalid dataflow endpoint {}", self.endpoint))
            })?;
            segments
                .pop_if_empty()
                .extend(["projects", project_id, "locations", location, "jobs"]);
            if let Some(job_id) = job_id {
                segments.push(job_id);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.access_token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| LaunchError::remote(format!("{what} failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(LaunchError::remote(format!(
            "{what} returned {}: {}",
            status.as_u16(),
            body.trim()
        )))
    }

    async fn list_jobs(
        &self,
        project_id: &str,
        location: &str,
        filter: &str,
    ) -> Result<Vec<RemoteJobStatus>> {
        let mut jobs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.jobs_url(project_id, location, None)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("filter", filter);
                if let Some(token) = page_token.as_deref() {
                    query.append_pair("pageToken", token);
                }
            }
            let response = self.send(self.request(Method::GET, url), "list jobs").await?;
            let page: ListJobsResponse = response
                .json()
                .await
                .map_err(|e| LaunchError::remote(format!("failed to parse job list: {e}")))?;
            debug!("listed {} job(s) in {project_id}/{location}", page.jobs.len());
            jobs.extend(page.jobs.into_iter().map(RemoteJobStatus::from));
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(jobs),
            }
        }
    }

    async fn get_job(&self, project_id: &str, location: &str, job_id: &str) -> Result<RemoteJobStatus> {
        let url = self.jobs_url(project_id, location, Some(job_id))?;
        let response = self.send(self.request(Method::GET, url), "get job").await?;
        let job: ApiJob = response
            .json()
            .await
            .map_err(|e| LaunchError::remote(format!("failed to parse job {job_id}: {e}")))?;
        Ok(job.into())
    }
}

#[async_trait]
impl RemoteJobClient for DataflowClient {
    async fn is_job_running(&self, name: &str, project_id: &str, location: &str) -> Result<bool> {
        let jobs = self.list_jobs(project_id, location, "ACTIVE").await?;
        Ok(jobs
            .iter()
            .any(|job| job.name.starts_with(name) && !job.state.is_terminal()))
    }

    async fn job_statuses(&self, query: &JobQuery) -> Result<Vec<RemoteJobStatus>> {
        match &query.lookup {
            JobLookup::ById(job_id) => {
                let job = self.get_job(&query.project_id, &query.location, job_id).await?;
                Ok(vec![job])
            }
            JobLookup::ByName { name, prefix } => {
                let jobs = self.list_jobs(&query.project_id, &query.location, "ALL").await?;
                Ok(jobs
                    .into_iter()
                    .filter(|job| {
                        if *prefix {
                            job.name.starts_with(name.as_str())
                        } else {
                            job.name == *name
                        }
                    })
                    .collect())
            }
        }
    }

    async fn request_cancel(
        &self,
        job_id: &str,
        project_id: &str,
        location: &str,
        mode: CancelMode,
    ) -> Result<()> {
        let url = self.jobs_url(project_id, location, Some(job_id))?;
        let body = UpdateJobRequest {
            requested_state: mode.requested_state(),
        };
        self.send(self.request(Method::PUT, url).json(&body), "update job")
            .await?;
        info!("requested {} for job {job_id}", mode.requested_state());
        Ok(())
    }

    fn default_project_id(&self) -> Option<String> {
        self.project_id.clone()
    }

    fn authorize(&self) -> Result<AuthorizedContext> {
        let mut envs = Vec::new();
        if let Some(project) = self.project_id.as_deref() {
            envs.push((PROJECT_ENV.to_string(), project.to_string()));
        }
        let Some(token) = self.access_token.as_deref() else {
            return Ok(AuthorizedContext::new(envs, ()));
        };
        let mut file = tempfile::Builder::new()
            .prefix("beamrun-token-")
            .tempfile()?;
        file.write_all(token.as_bytes())?;
        file.flush()?;
        envs.push((TOKEN_FILE_ENV.to_string(), file.path().display().to_string()));
        Ok(AuthorizedContext::new(envs, file))
    }
}
