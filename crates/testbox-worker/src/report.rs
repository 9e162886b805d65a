//! Job reports published on `reporting.jobs`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Message type of a finished job report.
pub const JOB_FINISHED: &str = "job:test:finished";

/// Final state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// The job ran to completion
    Passed,
    /// The sandbox couldn't be provided or the job failed
    Errored,
}

/// Outcome of one job on one sandbox slot.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Slot the job ran on, as `{host}:travis-{name}`
    pub worker: String,
    /// Hostname of the sandbox container
    pub hostname: String,
    /// Requested language, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub state: JobState,
    /// Shell endpoint the job used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Identification the shell server sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// Report for a job that ran.
    pub fn passed(
        worker: String,
        hostname: String,
        language: Option<String>,
        endpoint: String,
        server_id: Option<String>,
    ) -> Self {
        Self {
            worker,
            hostname,
            language,
            state: JobState::Passed,
            endpoint: Some(endpoint),
            server_id,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Report for a job that couldn't run.
    pub fn errored(
        worker: String,
        hostname: String,
        language: Option<String>,
        error: impl ToString,
    ) -> Self {
        Self {
            worker,
            hostname,
            language,
            state: JobState::Errored,
            endpoint: None,
            server_id: None,
            error: Some(error.to_string()),
            finished_at: Utc::now(),
        }
    }
}
