//! In-memory store
//!
//! Mutex-guarded maps implementing every repository trait. Used by tests and
//! by one-shot CLI runs that do not need results to outlive the process.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ResultRepository, SessionDataRepository, StoreError, TestRunRepository, TestSessionRepository,
};
use crate::models::{
    RequestRecord, ResultKind, RunStatus, RunnableId, TestResult, TestRun, TestSession,
};

#[derive(Debug, Default)]
struct State {
    /// Append-only; later entries supersede earlier ones
    results: Vec<TestResult>,
    runs: BTreeMap<String, TestRun>,
    sessions: BTreeMap<String, TestSession>,
    session_data: HashMap<String, BTreeMap<String, Value>>,
}

/// In-memory store shared by clones
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Poisoned("memory store mutex poisoned".to_string()))
    }
}

/// Keep only the newest result per runnable, preserving first-seen order
pub(super) fn current_per_runnable<'a>(
    results: impl Iterator<Item = &'a TestResult>,
) -> Vec<TestResult> {
    let mut order: Vec<RunnableId> = Vec::new();
    let mut latest: HashMap<RunnableId, &TestResult> = HashMap::new();
    for result in results {
        if latest.insert(result.runnable_id.clone(), result).is_none() {
            order.push(result.runnable_id.clone());
        }
    }
    order
        .into_iter()
        .filter_map(|id| latest.get(&id).map(|r| (*r).clone()))
        .collect()
}

impl ResultRepository for MemoryStore {
    fn create(&self, result: TestResult) -> Result<TestResult, StoreError> {
        self.lock()?.results.push(result.clone());
        Ok(result)
    }

    fn find(&self, id: &str) -> Result<Option<TestResult>, StoreError> {
        Ok(self.lock()?.results.iter().find(|r| r.id == id).cloned())
    }

    fn update_result(
        &self,
        id: &str,
        new_id: &str,
        result: ResultKind,
        result_message: Option<String>,
    ) -> Result<TestResult, StoreError> {
        let mut state = self.lock()?;
        let original = state
            .results
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("result {id}")))?;
        let updated = original.superseded_by(new_id, result, result_message);
        state.results.push(updated.clone());
        Ok(updated)
    }

    fn result_for_test_run(
        &self,
        test_run_id: &str,
        runnable_id: &RunnableId,
    ) -> Result<Option<TestResult>, StoreError> {
        Ok(self
            .lock()?
            .results
            .iter()
            .rev()
            .find(|r| r.test_run_id == test_run_id && &r.runnable_id == runnable_id)
            .cloned())
    }

    fn results_for_test_run(&self, test_run_id: &str) -> Result<Vec<TestResult>, StoreError> {
        let state = self.lock()?;
        Ok(current_per_runnable(
            state.results.iter().filter(|r| r.test_run_id == test_run_id),
        ))
    }

    fn current_result(
        &self,
        test_session_id: &str,
        runnable_id: &RunnableId,
    ) -> Result<Option<TestResult>, StoreError> {
        Ok(self
            .lock()?
            .results
            .iter()
            .rev()
            .find(|r| r.test_session_id == test_session_id && &r.runnable_id == runnable_id)
            .cloned())
    }

    fn named_request(
        &self,
        test_session_id: &str,
        name: &str,
    ) -> Result<Option<RequestRecord>, StoreError> {
        Ok(self
            .lock()?
            .results
            .iter()
            .rev()
            .filter(|r| r.test_session_id == test_session_id)
            .flat_map(|r| r.requests.iter().rev())
            .find(|request| request.name.as_deref() == Some(name))
            .cloned())
    }
}

impl TestRunRepository for MemoryStore {
    fn create(&self, run: TestRun) -> Result<TestRun, StoreError> {
        self.lock()?.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    fn find(&self, id: &str) -> Result<Option<TestRun>, StoreError> {
        Ok(self.lock()?.runs.get(id).cloned())
    }

    fn set_status(&self, id: &str, status: RunStatus) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("test run {id}")))?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    fn mark_as_running_unless_cancelling(&self, id: &str) -> Result<RunStatus, StoreError> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("test run {id}")))?;
        if run.status != RunStatus::Cancelling {
            run.status = RunStatus::Running;
            run.updated_at = Utc::now();
        }
        Ok(run.status)
    }

    fn mark_as_waiting(
        &self,
        id: &str,
        identifier: &str,
        timeout: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("test run {id}")))?;
        run.status = RunStatus::Waiting;
        run.identifier = Some(identifier.to_string());
        run.wait_timeout = Some(timeout);
        run.updated_at = Utc::now();
        Ok(())
    }

    fn mark_as_no_longer_waiting(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("test run {id}")))?;
        run.status = RunStatus::Queued;
        run.identifier = None;
        run.wait_timeout = None;
        run.updated_at = Utc::now();
        Ok(())
    }

    fn find_waiting(&self, identifier: &str) -> Result<Option<TestRun>, StoreError> {
        Ok(self
            .lock()?
            .runs
            .values()
            .find(|run| {
                run.status == RunStatus::Waiting && run.identifier.as_deref() == Some(identifier)
            })
            .cloned())
    }

    fn waiting_runs(&self) -> Result<Vec<TestRun>, StoreError> {
        Ok(self
            .lock()?
            .runs
            .values()
            .filter(|run| run.status == RunStatus::Waiting)
            .cloned()
            .collect())
    }

    fn runs_for_session(&self, test_session_id: &str) -> Result<Vec<TestRun>, StoreError> {
        let mut runs: Vec<TestRun> = self
            .lock()?
            .runs
            .values()
            .filter(|run| run.test_session_id == test_session_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }
}

impl SessionDataRepository for MemoryStore {
    fn load(&self, test_session_id: &str, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .lock()?
            .session_data
            .get(test_session_id)
            .and_then(|data| data.get(name))
            .cloned())
    }

    fn save(&self, test_session_id: &str, name: &str, value: Value) -> Result<(), StoreError> {
        self.lock()?
            .session_data
            .entry(test_session_id.to_string())
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }

    fn all(&self, test_session_id: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        Ok(self
            .lock()?
            .session_data
            .get(test_session_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl TestSessionRepository for MemoryStore {
    fn create(&self, session: TestSession) -> Result<TestSession, StoreError> {
        self.lock()?
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn find(&self, id: &str) -> Result<Option<TestSession>, StoreError> {
        Ok(self.lock()?.sessions.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<TestSession>, StoreError> {
        Ok(self.lock()?.sessions.values().cloned().collect())
    }
}
