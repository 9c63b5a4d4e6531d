//! Background job dispatch
//!
//! Runs are handed to [`Jobs::perform`]. With asynchronous jobs disabled the
//! job executes inline; otherwise it is queued and picked up by a bounded pool
//! of workers. The runner behaves the same either way.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::executor::{RunnerError, TestRunner, DEFAULT_WAIT_TIMEOUT};
use crate::models::{RunnableTree, TestResult};
use crate::repository::Repositories;

/// Work the dispatcher knows how to run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    /// First execution of a queued run
    ExecuteTestRun {
        test_session_id: String,
        test_run_id: String,
    },
    /// Continue a run after its awaited event arrived
    ResumeTestRun { test_run_id: String },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::ExecuteTestRun { .. } => "ExecuteTestRun",
            Job::ResumeTestRun { .. } => "ResumeTestRun",
        }
    }

    pub fn test_run_id(&self) -> &str {
        match self {
            Job::ExecuteTestRun { test_run_id, .. } | Job::ResumeTestRun { test_run_id } => {
                test_run_id
            }
        }
    }

    /// Run the job to completion on the current task
    pub async fn execute(&self, context: &JobContext) -> Result<Vec<TestResult>, RunnerError> {
        let repos = &context.repos;
        let (test_session_id, resuming) = match self {
            Job::ExecuteTestRun {
                test_session_id, ..
            } => (Some(test_session_id.as_str()), false),
            Job::ResumeTestRun { .. } => (None, true),
        };

        let test_run = repos
            .test_runs
            .find(self.test_run_id())?
            .ok_or_else(|| RunnerError::RunNotFound(self.test_run_id().to_string()))?;
        let test_session_id = test_session_id.unwrap_or(test_run.test_session_id.as_str());
        let test_session = repos
            .sessions
            .find(test_session_id)?
            .ok_or_else(|| RunnerError::SessionNotFound(test_session_id.to_string()))?;

        TestRunner::new(context.tree.clone(), repos.clone(), test_session, test_run)
            .resuming(resuming)
            .with_default_wait_timeout(context.default_wait_timeout)
            .start()
            .await
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.test_run_id())
    }
}

/// What `perform` did with a job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobReceipt {
    Completed,
    Enqueued,
}

/// Shared state every job runs against
#[derive(Debug)]
pub struct JobContext {
    pub tree: Arc<RunnableTree>,
    pub repos: Repositories,
    pub default_wait_timeout: Duration,
}

/// Job dispatcher
pub struct Jobs {
    context: Arc<JobContext>,
    async_jobs: bool,
    max_workers: usize,
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Jobs {
    /// Dispatcher that runs every job inline
    pub fn new(tree: Arc<RunnableTree>, repos: Repositories) -> Self {
        Self {
            context: Arc::new(JobContext {
                tree,
                repos,
                default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            }),
            async_jobs: false,
            max_workers: 1,
            queue: Mutex::new(None),
            dispatcher: Mutex::new(None),
        }
    }

    /// Queue jobs onto at most `max_workers` concurrent workers
    pub fn with_async(mut self, max_workers: usize) -> Self {
        self.async_jobs = true;
        self.max_workers = max_workers.max(1);
        self
    }

    /// Wait deadline for tests that do not set one.
    ///
    /// Must be called before the first job is dispatched.
    pub fn with_default_wait_timeout(mut self, timeout: Duration) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.default_wait_timeout = timeout;
        }
        self
    }

    pub fn is_async(&self) -> bool {
        self.async_jobs
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    /// Execute `job` inline or hand it to a worker.
    ///
    /// `force_synchronous` runs inline even when asynchronous jobs are enabled.
    pub async fn perform(&self, job: Job, force_synchronous: bool) -> Result<JobReceipt> {
        if force_synchronous || !self.async_jobs {
            debug!("Performing {} inline", job);
            job.execute(&self.context).await?;
            return Ok(JobReceipt::Completed);
        }

        let sender = self.sender()?;
        debug!("Enqueuing {}", job);
        sender
            .send(job)
            .map_err(|e| anyhow!("Job queue closed; dropped {}", e.0))?;
        Ok(JobReceipt::Enqueued)
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) -> Result<()> {
        self.queue
            .lock()
            .map_err(|_| anyhow!("job queue mutex poisoned"))?
            .take();
        let dispatcher = self
            .dispatcher
            .lock()
            .map_err(|_| anyhow!("job dispatcher mutex poisoned"))?
            .take();

        if let Some(handle) = dispatcher {
            handle.await?;
            info!("Job dispatcher stopped");
        }
        Ok(())
    }

    /// Sender for the worker queue, starting the dispatcher on first use
    fn sender(&self) -> Result<mpsc::UnboundedSender<Job>> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| anyhow!("job queue mutex poisoned"))?;
        if let Some(sender) = queue.as_ref() {
            return Ok(sender.clone());
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch(self.context.clone(), receiver, self.max_workers));
        *self
            .dispatcher
            .lock()
            .map_err(|_| anyhow!("job dispatcher mutex poisoned"))? = Some(handle);
        *queue = Some(sender.clone());
        info!("Job dispatcher started with {} workers", self.max_workers);
        Ok(sender)
    }
}

impl fmt::Debug for Jobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jobs")
            .field("async_jobs", &self.async_jobs)
            .field("max_workers", &self.max_workers)
            .finish()
    }
}

async fn dispatch(
    context: Arc<JobContext>,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    max_workers: usize,
) {
    let semaphore = Arc::new(Semaphore::new(max_workers));
    let mut workers = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let context = context.clone();

        workers.spawn(async move {
            let _permit = permit;
            match job.execute(&context).await {
                Ok(results) => debug!("{} finished with {} results", job, results.len()),
                Err(e) => error!("{} failed: {}", job, e),
            }
        });

        while let Some(finished) = workers.try_join_next() {
            if let Err(e) = finished {
                error!("Job worker crashed: {}", e);
            }
        }
    }

    while let Some(finished) = workers.join_next().await {
        if let Err(e) = finished {
            error!("Job worker crashed: {}", e);
        }
    }
}
