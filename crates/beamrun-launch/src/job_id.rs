use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::info;

const JOB_ID_PATTERNS: &[&str] = &[
    r".*console\.cloud\.google\.com/dataflow.*/jobs/.*/([a-zA-Z0-9_-]+).*",
    r".*Submitted job: ([a-zA-Z0-9_-]+).*",
    r".*Created job with id: \[([a-zA-Z0-9_-]+)\].*",
    r".*Created Dataflow job with id: ([a-zA-Z0-9_-]+).*",
];

fn job_id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        JOB_ID_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Returns the remote job id printed on `line`, if any.
pub fn extract_job_id(line: &str) -> Option<&str> {
    job_id_patterns()
        .iter()
        .find_map(|re| re.captures(line).and_then(|caps| caps.get(1)))
        .map(|m| m.as_str())
}

#[derive(Debug)]
struct HandleInner {
    job_name: String,
    location: String,
    project_id: String,
    job_id: OnceLock<String>,
}

/// Identity of a job on the remote service. Cloning shares the same slot, so
/// an id recorded by the output reader is visible to every other holder.
#[derive(Clone, Debug)]
pub struct RemoteJobHandle {
    inner: Arc<HandleInner>,
}

impl RemoteJobHandle {
    pub fn new(
        job_name: impl Into<String>,
        location: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                job_name: job_name.into(),
                location: location.into(),
                project_id: project_id.into(),
                job_id: OnceLock::new(),
            }),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.inner.job_name
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    pub fn job_id(&self) -> Option<&str> {
        self.inner.job_id.get().map(String::as_str)
    }

    /// Records `job_id` unless one is already set. Returns whether it was stored.
    pub fn set_job_id(&self, job_id: impl Into<String>) -> bool {
        self.inner.job_id.set(job_id.into()).is_ok()
    }

    /// Feeds one line of launcher output. The first id found wins.
    pub fn process_line(&self, line: &str) {
        if self.job_id().is_some() {
            return;
        }
        if let Some(job_id) = extract_job_id(line) {
            if self.set_job_id(job_id) {
                info!(job_id, job_name = self.job_name(), "captured remote job id");
            }
        }
    }
}
