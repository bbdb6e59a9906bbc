use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::details::JobDetails;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle states of a job record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Scheduled,
    Enqueued,
    Processing,
    Succeeded,
    Failed,
    Deleted,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Scheduled,
        JobState::Enqueued,
        JobState::Processing,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "SCHEDULED",
            JobState::Enqueued => "ENQUEUED",
            JobState::Processing => "PROCESSING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Deleted => "DELETED",
        }
    }

    /// Whether no worker will move the job out of this state on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Deleted
        )
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown job state `{s}`"))
    }
}

/// A request to run a unit of work, as handed to the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Identifier of the handler that runs the job.
    pub kind: String,
    pub payload: serde_json::Value,
}

impl JobRequest {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// A persisted job and its current state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub details: JobDetails,
    pub state: JobState,
    /// Failed attempts so far.
    pub attempts: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create an enqueued record for a request.
    pub fn enqueued(request: JobRequest, details: JobDetails, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind: request.kind,
            payload: request.payload,
            details,
            state: JobState::Enqueued,
            attempts: 0,
            max_retries,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `state`, stamping the update time.
    pub fn transition(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing_is_case_insensitive() {
        assert_eq!("succeeded".parse::<JobState>().unwrap(), JobState::Succeeded);
        assert_eq!("ENQUEUED".parse::<JobState>().unwrap(), JobState::Enqueued);
        assert!("RUNNING".parse::<JobState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = JobState::ALL.into_iter().filter(JobState::is_terminal).collect();
        assert_eq!(
            terminal,
            vec![JobState::Succeeded, JobState::Failed, JobState::Deleted]
        );
    }

    #[test]
    fn test_job_id_round_trips_through_display() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn test_transition_updates_timestamp() {
        let request = JobRequest::new("noop", serde_json::json!({}));
        let details = JobDetails::for_request(&request);
        let mut record = JobRecord::enqueued(request, details, 10);
        let before = record.updated_at;

        record.transition(JobState::Processing);

        assert_eq!(record.state, JobState::Processing);
        assert!(record.updated_at >= before);
    }
}
