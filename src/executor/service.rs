//! Session and run orchestration
//!
//! The entry points callers use: open a session, request a run, deliver the
//! event a waiting run is parked on, cancel a run.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::runner::CANCELLED_MESSAGE;
use crate::jobs::{Job, JobReceipt, Jobs};
use crate::models::{
    ResultKind, RunStatus, RunnableId, RunnableKind, RunnableTree, SuiteOption, TestResult,
    TestRun, TestSession, TreeError,
};
use crate::repository::{Repositories, StoreError};
use crate::utils::generate_id;

/// Errors from service operations
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0} is not a test suite")]
    NotASuite(RunnableId),

    #[error("Test session not found: {0}")]
    SessionNotFound(String),

    #[error("Test run not found: {0}")]
    RunNotFound(String),

    #[error("{runnable} does not belong to suite {suite}")]
    OutsideSuite {
        runnable: RunnableId,
        suite: RunnableId,
    },

    #[error("{0} can only be run as part of its group")]
    NotUserRunnable(RunnableId),

    #[error("Test session {session} already has an active run: {run}")]
    ActiveRun { session: String, run: String },

    #[error("No test run is waiting for `{0}`")]
    NoWaitingRun(String),

    #[error("Test run {0} is already done")]
    AlreadyDone(String),

    #[error("Job dispatch failed: {0:#}")]
    Job(anyhow::Error),
}

/// Outcome delivered to a waiting test
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeOutcome {
    Pass,
    Fail(String),
}

impl ResumeOutcome {
    /// Parse `pass` or `fail`; a failure needs a message
    pub fn from_str(s: &str, message: Option<String>) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pass" => Some(ResumeOutcome::Pass),
            "fail" => Some(ResumeOutcome::Fail(
                message.unwrap_or_else(|| "Resumed with failure".to_string()),
            )),
            _ => None,
        }
    }

    fn result(&self) -> (ResultKind, Option<String>) {
        match self {
            ResumeOutcome::Pass => (ResultKind::Pass, None),
            ResumeOutcome::Fail(message) => (ResultKind::Fail, Some(message.clone())),
        }
    }
}

/// Orchestrates sessions and runs over one loaded tree
#[derive(Clone, Debug)]
pub struct TestRunService {
    tree: Arc<RunnableTree>,
    repos: Repositories,
    jobs: Arc<Jobs>,
}

impl TestRunService {
    pub fn new(tree: Arc<RunnableTree>, repos: Repositories, jobs: Arc<Jobs>) -> Self {
        Self { tree, repos, jobs }
    }

    /// Service whose jobs always run inline
    pub fn inline(tree: Arc<RunnableTree>, repos: Repositories) -> Self {
        let jobs = Arc::new(Jobs::new(tree.clone(), repos.clone()));
        Self::new(tree, repos, jobs)
    }

    pub fn tree(&self) -> &RunnableTree {
        &self.tree
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn jobs(&self) -> &Jobs {
        &self.jobs
    }

    /// Open a session against a suite with the selected options
    pub fn create_session(
        &self,
        suite_id: &str,
        suite_options: Vec<SuiteOption>,
    ) -> Result<TestSession, ServiceError> {
        let suite = self.tree.resolve(suite_id)?;
        if suite.kind != RunnableKind::Suite {
            return Err(ServiceError::NotASuite(suite.id.clone()));
        }

        let session = TestSession::new(generate_id("session"), suite.id.clone(), suite_options);
        let session = self.repos.sessions.create(session)?;
        info!("Created session {} for {}", session.id, suite.id);
        Ok(session)
    }

    pub fn find_session(&self, test_session_id: &str) -> Result<TestSession, ServiceError> {
        self.repos
            .sessions
            .find(test_session_id)?
            .ok_or_else(|| ServiceError::SessionNotFound(test_session_id.to_string()))
    }

    pub fn find_run(&self, test_run_id: &str) -> Result<TestRun, ServiceError> {
        self.repos
            .test_runs
            .find(test_run_id)?
            .ok_or_else(|| ServiceError::RunNotFound(test_run_id.to_string()))
    }

    /// Request execution of a runnable within a session.
    ///
    /// Provided inputs are saved to session data before the run is queued.
    /// In inline mode the run has finished when this returns.
    pub async fn create_run(
        &self,
        test_session_id: &str,
        runnable_id: &str,
        inputs: BTreeMap<String, Value>,
    ) -> Result<TestRun, ServiceError> {
        let session = self.find_session(test_session_id)?;
        let runnable = self.tree.resolve(runnable_id)?;

        let in_suite = self
            .tree
            .suite_of(&runnable.id)
            .map(|suite| suite.id == session.suite_id)
            .unwrap_or(false);
        if !in_suite {
            return Err(ServiceError::OutsideSuite {
                runnable: runnable.id.clone(),
                suite: session.suite_id.clone(),
            });
        }
        if !runnable.user_runnable {
            return Err(ServiceError::NotUserRunnable(runnable.id.clone()));
        }
        if let Some(active) = self.repos.test_runs.active_run_for_session(&session.id)? {
            return Err(ServiceError::ActiveRun {
                session: session.id.clone(),
                run: active.id,
            });
        }

        for (name, value) in inputs {
            self.repos.session_data.save(&session.id, &name, value)?;
        }

        let test_run = TestRun::new(generate_id("run"), &session.id, runnable.id.clone());
        let test_run = self.repos.test_runs.create(test_run)?;
        info!("Queued {}", test_run);

        let job = Job::ExecuteTestRun {
            test_session_id: session.id.clone(),
            test_run_id: test_run.id.clone(),
        };
        self.dispatch(job).await?;
        self.find_run(&test_run.id)
    }

    /// Deliver the event a waiting run is parked on.
    ///
    /// The waiting result is superseded with `outcome` and the run resumes
    /// after the test that waited.
    pub async fn resume(
        &self,
        identifier: &str,
        outcome: ResumeOutcome,
    ) -> Result<TestRun, ServiceError> {
        let test_run = self
            .repos
            .test_runs
            .find_waiting(identifier)?
            .ok_or_else(|| ServiceError::NoWaitingRun(identifier.to_string()))?;

        let (result, message) = outcome.result();
        self.resolve_waiting_result(&test_run, result, message)?;
        self.repos.test_runs.mark_as_no_longer_waiting(&test_run.id)?;
        info!("Resuming {} after `{}`", test_run.id, identifier);

        self.dispatch(Job::ResumeTestRun {
            test_run_id: test_run.id.clone(),
        })
        .await?;
        self.find_run(&test_run.id)
    }

    /// Ask a run to stop at the next test boundary.
    ///
    /// A waiting run is resumed immediately so its remaining tests cancel.
    pub async fn cancel(&self, test_run_id: &str) -> Result<TestRun, ServiceError> {
        let test_run = self.find_run(test_run_id)?;

        match test_run.status {
            RunStatus::Done => return Err(ServiceError::AlreadyDone(test_run.id)),
            RunStatus::Waiting => {
                self.cancel_waiting(&test_run, CANCELLED_MESSAGE.to_string())
                    .await?
            }
            _ => {
                self.repos.test_runs.mark_as_cancelling(&test_run.id)?;
                info!("Cancelling {}", test_run.id);
            }
        }
        self.find_run(&test_run.id)
    }

    /// Cancel every waiting run whose deadline passed by `now`
    pub async fn expire_waiting_runs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TestRun>, ServiceError> {
        let mut expired = Vec::new();
        for test_run in self.repos.test_runs.waiting_runs()? {
            if !test_run.wait_expired(now) {
                continue;
            }
            let identifier = test_run.identifier.clone().unwrap_or_default();
            warn!("Run {} timed out waiting for `{}`", test_run.id, identifier);
            self.cancel_waiting(&test_run, format!("Timed out waiting for `{identifier}`"))
                .await?;
            expired.push(self.find_run(&test_run.id)?);
        }
        Ok(expired)
    }

    /// Current results of a run, in execution order
    pub fn results(&self, test_run_id: &str) -> Result<Vec<TestResult>, ServiceError> {
        self.find_run(test_run_id)?;
        Ok(self.repos.results.results_for_test_run(test_run_id)?)
    }

    /// Current result of every node under the session's suite that has one
    pub fn session_results(&self, test_session_id: &str) -> Result<Vec<TestResult>, ServiceError> {
        let session = self.find_session(test_session_id)?;
        let ids: Vec<RunnableId> = self
            .tree
            .walk(&session.suite_id, &session.suite_options)
            .into_iter()
            .map(|(_, runnable)| runnable.id.clone())
            .collect();
        Ok(self.repos.results.current_results(&session.id, &ids)?)
    }

    async fn cancel_waiting(&self, test_run: &TestRun, message: String) -> Result<(), ServiceError> {
        self.resolve_waiting_result(test_run, ResultKind::Cancel, Some(message))?;
        self.repos.test_runs.mark_as_no_longer_waiting(&test_run.id)?;
        self.repos.test_runs.mark_as_cancelling(&test_run.id)?;
        info!("Cancelling waiting run {}", test_run.id);

        self.dispatch(Job::ResumeTestRun {
            test_run_id: test_run.id.clone(),
        })
        .await
    }

    fn resolve_waiting_result(
        &self,
        test_run: &TestRun,
        result: ResultKind,
        message: Option<String>,
    ) -> Result<(), ServiceError> {
        match self.repos.results.find_waiting_result(&test_run.id)? {
            Some(waiting) => {
                self.repos
                    .results
                    .update_result(&waiting.id, &generate_id("result"), result, message)?;
            }
            None => warn!("Run {} is waiting without a waiting result", test_run.id),
        }
        Ok(())
    }

    async fn dispatch(&self, job: Job) -> Result<(), ServiceError> {
        match self.jobs.perform(job, false).await.map_err(ServiceError::Job)? {
            JobReceipt::Completed | JobReceipt::Enqueued => Ok(()),
        }
    }
}
