//! JSON file store
//!
//! Persists every record as pretty-printed JSON under a base directory:
//!
//! ```text
//! <base>/sessions/<session_id>.json
//! <base>/runs/<run_id>.json
//! <base>/results/<session_id>.json        (append-only list)
//! <base>/session_data/<session_id>.json
//! ```
//!
//! Records are replaced by writing a sibling temp file and renaming it over
//! the old one, so readers never see a partially written document.
//!
//! A session's results live in a single list that is rewritten on every new
//! result. Cost grows with the square of the session's result count, which is
//! fine for interactive sessions but not for long-lived ones with thousands
//! of results.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::debug;

use super::memory::current_per_runnable;
use super::{
    ResultRepository, SessionDataRepository, StoreError, TestRunRepository, TestSessionRepository,
};
use crate::models::{
    RequestRecord, ResultKind, RunStatus, RunnableId, TestResult, TestRun, TestSession,
};

const SESSIONS_DIR: &str = "sessions";
const RUNS_DIR: &str = "runs";
const RESULTS_DIR: &str = "results";
const SESSION_DATA_DIR: &str = "session_data";

/// Directory-backed store
#[derive(Clone, Debug)]
pub struct FileStore {
    base_dir: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Default location under the user's data directory
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("conformance-engine")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure storage directories exist
    pub fn ensure_dirs(&self) -> Result<(), StoreError> {
        for dir in [SESSIONS_DIR, RUNS_DIR, RESULTS_DIR, SESSION_DATA_DIR] {
            fs::create_dir_all(self.base_dir.join(dir))?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Poisoned("file store mutex poisoned".to_string()))
    }

    fn path(&self, dir: &str, id: &str) -> PathBuf {
        self.base_dir.join(dir).join(format!("{id}.json"))
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Replace `path` atomically with the serialized `value`
    fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let parent = path.parent().unwrap_or(&self.base_dir);
        fs::create_dir_all(parent)?;

        let mut file = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }
        file.persist(path).map_err(|e| StoreError::Io(e.error))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Every JSON record in `dir`, skipping unreadable files
    fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, StoreError> {
        let dir = self.base_dir.join(dir);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match self.read(&path) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => debug!("Failed to load {}: {}", path.display(), e),
                }
            }
        }
        Ok(records)
    }

    fn session_results(&self, test_session_id: &str) -> Result<Vec<TestResult>, StoreError> {
        Ok(self
            .read(&self.path(RESULTS_DIR, test_session_id))?
            .unwrap_or_default())
    }

    fn run_results(&self, test_run_id: &str) -> Result<Vec<TestResult>, StoreError> {
        let results = match TestRunRepository::find(self, test_run_id)? {
            Some(run) => self.session_results(&run.test_session_id)?,
            None => self
                .read_all::<Vec<TestResult>>(RESULTS_DIR)?
                .into_iter()
                .flatten()
                .collect(),
        };
        Ok(results
            .into_iter()
            .filter(|r| r.test_run_id == test_run_id)
            .collect())
    }

    fn update_run<F>(&self, id: &str, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TestRun),
    {
        let _guard = self.lock()?;
        let path = self.path(RUNS_DIR, id);
        let mut run: TestRun = self
            .read(&path)?
            .ok_or_else(|| StoreError::NotFound(format!("test run {id}")))?;
        update(&mut run);
        run.updated_at = Utc::now();
        self.write(&path, &run)
    }

    fn all_results(&self) -> Result<Vec<TestResult>, StoreError> {
        Ok(self
            .read_all::<Vec<TestResult>>(RESULTS_DIR)?
            .into_iter()
            .flatten()
            .collect())
    }
}

impl ResultRepository for FileStore {
    fn create(&self, result: TestResult) -> Result<TestResult, StoreError> {
        let _guard = self.lock()?;
        let path = self.path(RESULTS_DIR, &result.test_session_id);
        let mut results: Vec<TestResult> = self.read(&path)?.unwrap_or_default();
        results.push(result.clone());
        self.write(&path, &results)?;
        Ok(result)
    }

    fn find(&self, id: &str) -> Result<Option<TestResult>, StoreError> {
        Ok(self.all_results()?.into_iter().find(|r| r.id == id))
    }

    fn update_result(
        &self,
        id: &str,
        new_id: &str,
        result: ResultKind,
        result_message: Option<String>,
    ) -> Result<TestResult, StoreError> {
        let original = ResultRepository::find(self, id)?
            .ok_or_else(|| StoreError::NotFound(format!("result {id}")))?;
        let updated = original.superseded_by(new_id, result, result_message);
        ResultRepository::create(self, updated)
    }

    fn result_for_test_run(
        &self,
        test_run_id: &str,
        runnable_id: &RunnableId,
    ) -> Result<Option<TestResult>, StoreError> {
        Ok(self
            .run_results(test_run_id)?
            .into_iter()
            .rev()
            .find(|r| &r.runnable_id == runnable_id))
    }

    fn results_for_test_run(&self, test_run_id: &str) -> Result<Vec<TestResult>, StoreError> {
        let results = self.run_results(test_run_id)?;
        Ok(current_per_runnable(results.iter()))
    }

    fn current_result(
        &self,
        test_session_id: &str,
        runnable_id: &RunnableId,
    ) -> Result<Option<TestResult>, StoreError> {
        Ok(self
            .session_results(test_session_id)?
            .into_iter()
            .rev()
            .find(|r| &r.runnable_id == runnable_id))
    }

    fn named_request(
        &self,
        test_session_id: &str,
        name: &str,
    ) -> Result<Option<RequestRecord>, StoreError> {
        Ok(self
            .session_results(test_session_id)?
            .into_iter()
            .rev()
            .flat_map(|r| r.requests.into_iter().rev())
            .find(|request| request.name.as_deref() == Some(name)))
    }
}

impl TestRunRepository for FileStore {
    fn create(&self, run: TestRun) -> Result<TestRun, StoreError> {
        let _guard = self.lock()?;
        self.write(&self.path(RUNS_DIR, &run.id), &run)?;
        Ok(run)
    }

    fn find(&self, id: &str) -> Result<Option<TestRun>, StoreError> {
        self.read(&self.path(RUNS_DIR, id))
    }

    fn set_status(&self, id: &str, status: RunStatus) -> Result<(), StoreError> {
        self.update_run(id, |run| run.status = status)
    }

    fn mark_as_running_unless_cancelling(&self, id: &str) -> Result<RunStatus, StoreError> {
        let mut status = RunStatus::Running;
        self.update_run(id, |run| {
            if run.status != RunStatus::Cancelling {
                run.status = RunStatus::Running;
            }
            status = run.status;
        })?;
        Ok(status)
    }

    fn mark_as_waiting(
        &self,
        id: &str,
        identifier: &str,
        timeout: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_run(id, |run| {
            run.status = RunStatus::Waiting;
            run.identifier = Some(identifier.to_string());
            run.wait_timeout = Some(timeout);
        })
    }

    fn mark_as_no_longer_waiting(&self, id: &str) -> Result<(), StoreError> {
        self.update_run(id, |run| {
            run.status = RunStatus::Queued;
            run.identifier = None;
            run.wait_timeout = None;
        })
    }

    fn find_waiting(&self, identifier: &str) -> Result<Option<TestRun>, StoreError> {
        Ok(self.waiting_runs()?.into_iter().find(|run| {
            run.identifier.as_deref() == Some(identifier)
        }))
    }

    fn waiting_runs(&self) -> Result<Vec<TestRun>, StoreError> {
        Ok(self
            .read_all::<TestRun>(RUNS_DIR)?
            .into_iter()
            .filter(|run| run.status == RunStatus::Waiting)
            .collect())
    }

    fn runs_for_session(&self, test_session_id: &str) -> Result<Vec<TestRun>, StoreError> {
        let mut runs: Vec<TestRun> = self
            .read_all::<TestRun>(RUNS_DIR)?
            .into_iter()
            .filter(|run| run.test_session_id == test_session_id)
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }
}

impl SessionDataRepository for FileStore {
    fn load(&self, test_session_id: &str, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.all(test_session_id)?.remove(name))
    }

    fn save(&self, test_session_id: &str, name: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let path = self.path(SESSION_DATA_DIR, test_session_id);
        let mut data: BTreeMap<String, Value> = self.read(&path)?.unwrap_or_default();
        data.insert(name.to_string(), value);
        self.write(&path, &data)
    }

    fn all(&self, test_session_id: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        Ok(self
            .read(&self.path(SESSION_DATA_DIR, test_session_id))?
            .unwrap_or_default())
    }
}

impl TestSessionRepository for FileStore {
    fn create(&self, session: TestSession) -> Result<TestSession, StoreError> {
        let _guard = self.lock()?;
        self.write(&self.path(SESSIONS_DIR, &session.id), &session)?;
        Ok(session)
    }

    fn find(&self, id: &str) -> Result<Option<TestSession>, StoreError> {
        self.read(&self.path(SESSIONS_DIR, id))
    }

    fn list(&self) -> Result<Vec<TestSession>, StoreError> {
        let mut sessions: Vec<TestSession> = self.read_all(SESSIONS_DIR)?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunnableKind;
    use crate::repository::Repositories;
    use tempfile::tempdir;

    fn result(id: &str, kind: ResultKind) -> TestResult {
        TestResult {
            id: id.to_string(),
            test_session_id: "session".to_string(),
            test_run_id: "run-1".to_string(),
            runnable_id: RunnableId::new("t1"),
            runnable_kind: RunnableKind::Test,
            optional: false,
            result: kind,
            result_message: Some("waiting".to_string()),
            messages: Vec::new(),
            requests: Vec::new(),
            input_json: None,
            output_json: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let repos = Repositories::file(dir.path()).unwrap();
            repos
                .sessions
                .create(TestSession::new("session", RunnableId::new("suite"), Vec::new()))
                .unwrap();
            repos
                .test_runs
                .create(TestRun::new("run-1", "session", RunnableId::new("suite")))
                .unwrap();
            repos.results.create(result("r1", ResultKind::Wait)).unwrap();
            repos
                .session_data
                .save("session", "url", Value::from("http://localhost"))
                .unwrap();
            repos
                .test_runs
                .mark_as_waiting("run-1", "abc", Utc::now())
                .unwrap();
        }

        let repos = Repositories::file(dir.path()).unwrap();
        assert_eq!(repos.sessions.list().unwrap().len(), 1);
        assert_eq!(
            repos.test_runs.find_waiting("abc").unwrap().map(|r| r.id),
            Some("run-1".to_string())
        );
        assert_eq!(
            repos.session_data.load("session", "url").unwrap(),
            Some(Value::from("http://localhost"))
        );
        let waiting = repos.results.find_waiting_result("run-1").unwrap().unwrap();
        assert_eq!(waiting.id, "r1");
    }

    #[test]
    fn test_update_result_appends_new_version() {
        let dir = tempdir().unwrap();
        let repos = Repositories::file(dir.path()).unwrap();
        repos
            .test_runs
            .create(TestRun::new("run-1", "session", RunnableId::new("suite")))
            .unwrap();
        repos.results.create(result("r1", ResultKind::Wait)).unwrap();

        let updated = repos
            .results
            .update_result("r1", "r2", ResultKind::Pass, None)
            .unwrap();
        assert_eq!(updated.id, "r2");
        assert_eq!(
            repos
                .results
                .result_for_test_run("run-1", &RunnableId::new("t1"))
                .unwrap()
                .map(|r| r.result),
            Some(ResultKind::Pass)
        );
        assert!(repos.results.find("r1").unwrap().is_some());
    }

    #[test]
    fn test_status_reads_never_see_partial_writes() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.ensure_dirs().unwrap();
        TestRunRepository::create(
            &store,
            TestRun::new("run-1", "session", RunnableId::new("suite")),
        )
        .unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    let status = if i % 2 == 0 {
                        RunStatus::Running
                    } else {
                        RunStatus::Cancelling
                    };
                    store.set_status("run-1", status).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let status = store.status("run-1").unwrap();
            assert!(matches!(
                status,
                Some(RunStatus::Queued | RunStatus::Running | RunStatus::Cancelling)
            ));
            assert_eq!(store.waiting_runs().unwrap().len(), 0);
            assert_eq!(store.runs_for_session("session").unwrap().len(), 1);
        }
        writer.join().unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path().join(RUNS_DIR))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_start_keeps_pending_cancel() {
        let dir = tempdir().unwrap();
        let repos = Repositories::file(dir.path()).unwrap();
        repos
            .test_runs
            .create(TestRun::new("run-1", "session", RunnableId::new("suite")))
            .unwrap();
        repos.test_runs.mark_as_cancelling("run-1").unwrap();

        assert_eq!(
            repos.test_runs.mark_as_running_unless_cancelling("run-1").unwrap(),
            RunStatus::Cancelling
        );
        assert_eq!(
            repos.test_runs.status("run-1").unwrap(),
            Some(RunStatus::Cancelling)
        );
    }

    #[test]
    fn test_missing_run_status_update_fails() {
        let dir = tempdir().unwrap();
        let repos = Repositories::file(dir.path()).unwrap();
        let err = repos.test_runs.mark_as_done("missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
