use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use beamrun_util::{now_millis, read_json_or_default, state_file_path, write_json_atomic};

use crate::coordinator::{JobLink, ResultSink};

pub const LEDGER_FILE_NAME: &str = "launches.json";
const MAX_LAUNCH_RECORDS: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchRecord {
    pub job_name: String,
    pub job_id: Option<String>,
    pub project_id: String,
    pub location: String,
    pub status: String,
    pub updated_at_unix_millis: i64,
}

impl Default for LaunchRecord {
    fn default() -> Self {
        Self {
            job_name: String::new(),
            job_id: None,
            project_id: String::new(),
            location: String::new(),
            status: "submitted".into(),
            updated_at_unix_millis: 0,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LedgerState {
    records: Vec<LaunchRecord>,
}

/// Launches recorded on disk, newest first.
#[derive(Debug)]
pub struct LaunchLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl LaunchLedger {
    pub fn open_default() -> Self {
        Self::open(state_file_path(LEDGER_FILE_NAME))
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = read_json_or_default(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Vec<LaunchRecord> {
        self.lock().records.clone()
    }

    /// Updates the status of the record for `job_name`, if there is one.
    pub fn record_status(&self, job_name: &str, status: &str) {
        let mut state = self.lock();
        let Some(record) = state.records.iter_mut().find(|r| r.job_name == job_name) else {
            return;
        };
        record.status = status.to_string();
        record.updated_at_unix_millis = now_millis();
        self.save_best_effort(&state);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save_best_effort(&self, state: &LedgerState) {
        if let Err(err) = write_json_atomic(&self.path, state) {
            warn!("failed to persist launch ledger {}: {err}", self.path.display());
        }
    }
}

fn upsert_record(state: &mut LedgerState, record: LaunchRecord) {
    state.records.retain(|item| item.job_name != record.job_name);
    state.records.insert(0, record);
    if state.records.len() > MAX_LAUNCH_RECORDS {
        state.records.truncate(MAX_LAUNCH_RECORDS);
    }
}

impl ResultSink for LaunchLedger {
    fn publish_job(&self, link: &JobLink) {
        let mut state = self.lock();
        upsert_record(
            &mut state,
            LaunchRecord {
                job_name: link.job_name.clone(),
                job_id: link.job_id.clone(),
                project_id: link.project_id.clone(),
                location: link.location.clone(),
                status: "submitted".into(),
                updated_at_unix_millis: now_millis(),
            },
        );
        self.save_best_effort(&state);
    }
}
