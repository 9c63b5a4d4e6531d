//! Persistence collaborators
//!
//! The engine only talks to storage through these traits. Two backends are
//! provided: an in-memory store and a directory of JSON documents.
//!
//! Stores give no isolation between concurrent runs of one session: the last
//! session data write wins.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    RequestRecord, ResultKind, RunStatus, RunnableId, TestResult, TestRun, TestSession,
};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Result records
pub trait ResultRepository: Send + Sync {
    /// Persist a new result
    fn create(&self, result: TestResult) -> Result<TestResult, StoreError>;

    fn find(&self, id: &str) -> Result<Option<TestResult>, StoreError>;

    /// Store a newer version of `id` with a different outcome.
    ///
    /// The original record is left untouched; the new one becomes current.
    fn update_result(
        &self,
        id: &str,
        new_id: &str,
        result: ResultKind,
        result_message: Option<String>,
    ) -> Result<TestResult, StoreError>;

    /// Latest result for a runnable within one run
    fn result_for_test_run(
        &self,
        test_run_id: &str,
        runnable_id: &RunnableId,
    ) -> Result<Option<TestResult>, StoreError>;

    /// Current result of each runnable within one run, oldest first
    fn results_for_test_run(&self, test_run_id: &str) -> Result<Vec<TestResult>, StoreError>;

    /// Current result for a runnable within a session
    fn current_result(
        &self,
        test_session_id: &str,
        runnable_id: &RunnableId,
    ) -> Result<Option<TestResult>, StoreError>;

    /// Current results for the given runnables; runnables without one are skipped
    fn current_results(
        &self,
        test_session_id: &str,
        runnable_ids: &[RunnableId],
    ) -> Result<Vec<TestResult>, StoreError> {
        let mut results = Vec::new();
        for runnable_id in runnable_ids {
            if let Some(result) = self.current_result(test_session_id, runnable_id)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Current `wait` result of the test a run is parked on, if any
    fn find_waiting_result(&self, test_run_id: &str) -> Result<Option<TestResult>, StoreError> {
        Ok(self
            .results_for_test_run(test_run_id)?
            .into_iter()
            .find(|result| result.is_waiting() && result.runnable_kind.is_leaf()))
    }

    /// Most recent request stored under `name` in a session
    fn named_request(
        &self,
        test_session_id: &str,
        name: &str,
    ) -> Result<Option<RequestRecord>, StoreError>;
}

/// Test run records
pub trait TestRunRepository: Send + Sync {
    fn create(&self, run: TestRun) -> Result<TestRun, StoreError>;

    fn find(&self, id: &str) -> Result<Option<TestRun>, StoreError>;

    fn set_status(&self, id: &str, status: RunStatus) -> Result<(), StoreError>;

    fn mark_as_waiting(
        &self,
        id: &str,
        identifier: &str,
        timeout: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Clear the wait and queue the run for resumption
    fn mark_as_no_longer_waiting(&self, id: &str) -> Result<(), StoreError>;

    /// Waiting run awaiting `identifier`
    fn find_waiting(&self, identifier: &str) -> Result<Option<TestRun>, StoreError>;

    fn waiting_runs(&self) -> Result<Vec<TestRun>, StoreError>;

    fn runs_for_session(&self, test_session_id: &str) -> Result<Vec<TestRun>, StoreError>;

    /// Freshly read status
    fn status(&self, id: &str) -> Result<Option<RunStatus>, StoreError> {
        Ok(self.find(id)?.map(|run| run.status))
    }

    /// Move the run to `running` unless a cancel already landed, as one
    /// store operation. Returns the status the run is left in.
    fn mark_as_running_unless_cancelling(&self, id: &str) -> Result<RunStatus, StoreError>;

    fn mark_as_cancelling(&self, id: &str) -> Result<(), StoreError> {
        self.set_status(id, RunStatus::Cancelling)
    }

    fn mark_as_done(&self, id: &str) -> Result<(), StoreError> {
        self.set_status(id, RunStatus::Done)
    }

    /// Run still occupying the session, if any
    fn active_run_for_session(&self, test_session_id: &str) -> Result<Option<TestRun>, StoreError> {
        Ok(self
            .runs_for_session(test_session_id)?
            .into_iter()
            .find(|run| run.status.is_active()))
    }
}

/// Named values scoped to a session
pub trait SessionDataRepository: Send + Sync {
    fn load(&self, test_session_id: &str, name: &str) -> Result<Option<Value>, StoreError>;

    fn save(&self, test_session_id: &str, name: &str, value: Value) -> Result<(), StoreError>;

    fn all(&self, test_session_id: &str) -> Result<BTreeMap<String, Value>, StoreError>;
}

/// Test session records
pub trait TestSessionRepository: Send + Sync {
    fn create(&self, session: TestSession) -> Result<TestSession, StoreError>;

    fn find(&self, id: &str) -> Result<Option<TestSession>, StoreError>;

    fn list(&self) -> Result<Vec<TestSession>, StoreError>;
}

/// Repositories injected into the runner and services
#[derive(Clone)]
pub struct Repositories {
    pub results: Arc<dyn ResultRepository>,
    pub test_runs: Arc<dyn TestRunRepository>,
    pub session_data: Arc<dyn SessionDataRepository>,
    pub sessions: Arc<dyn TestSessionRepository>,
}

impl Repositories {
    /// All repositories backed by one in-memory store
    pub fn in_memory() -> Self {
        Self::from_store(MemoryStore::new())
    }

    /// All repositories backed by JSON files under `base_dir`
    pub fn file(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = FileStore::new(base_dir);
        store.ensure_dirs()?;
        Ok(Self::from_store(store))
    }

    fn from_store<S>(store: S) -> Self
    where
        S: ResultRepository
            + TestRunRepository
            + SessionDataRepository
            + TestSessionRepository
            + 'static,
    {
        let store = Arc::new(store);
        Self {
            results: store.clone(),
            test_runs: store.clone(),
            session_data: store.clone(),
            sessions: store,
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Repositories(..)")
    }
}
