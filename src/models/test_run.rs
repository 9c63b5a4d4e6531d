//! Test run and session models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::runnable::{RunnableId, SuiteOption};

/// Lifecycle of a test run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Waiting,
    Cancelling,
    Done,
}

impl RunStatus {
    /// Whether the run still occupies its session
    pub fn is_active(&self) -> bool {
        !matches!(self, RunStatus::Done)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Waiting => write!(f, "waiting"),
            RunStatus::Cancelling => write!(f, "cancelling"),
            RunStatus::Done => write!(f, "done"),
        }
    }
}

/// A session groups runs of one suite with one set of options
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub id: String,
    pub suite_id: RunnableId,
    #[serde(default)]
    pub suite_options: Vec<SuiteOption>,
    pub created_at: DateTime<Utc>,
}

impl TestSession {
    pub fn new(
        id: impl Into<String>,
        suite_id: RunnableId,
        suite_options: Vec<SuiteOption>,
    ) -> Self {
        Self {
            id: id.into(),
            suite_id,
            suite_options,
            created_at: Utc::now(),
        }
    }
}

/// One execution request against a chosen runnable
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    pub test_session_id: String,
    pub runnable_id: RunnableId,
    pub status: RunStatus,
    /// Correlation identifier while waiting
    pub identifier: Option<String>,
    /// Deadline for the awaited event
    pub wait_timeout: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestRun {
    pub fn new(
        id: impl Into<String>,
        test_session_id: impl Into<String>,
        runnable_id: RunnableId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            test_session_id: test_session_id.into(),
            runnable_id,
            status: RunStatus::Queued,
            identifier: None,
            wait_timeout: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the awaited event is overdue at `now`
    pub fn wait_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == RunStatus::Waiting
            && self.wait_timeout.map(|deadline| deadline <= now).unwrap_or(false)
    }
}

impl fmt::Display for TestRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} [{}] -> {}", self.id, self.status, self.runnable_id)?;
        if let Some(identifier) = &self.identifier {
            write!(f, " (waiting for {identifier})")?;
        }
        Ok(())
    }
}
