//! Test run execution
//!
//! [`TestRunner`] drives one [`TestRun`]: it walks the tree depth-first in
//! declared order, evaluates each test body, persists a result per node and
//! rolls results up to the ancestors.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::context::{Scratch, TestContext};
use super::signal::{Defect, Signal, TestError};
use super::summarizer::{ResultCollection, ResultSummarizer, Rollup};
use crate::models::{
    RequestRecord, ResultKind, RunStatus, Runnable, RunnableId, RunnableTree, TestResult, TestRun,
    TestSession,
};
use crate::repository::{Repositories, StoreError};
use crate::utils::generate_id;
use crate::utils::timer::Timer;

/// Message used when a cancelled run reaches a test
pub const CANCELLED_MESSAGE: &str = "Test cancelled by user";

/// Message of a branch without children
pub const NO_TESTS_MESSAGE: &str = "No tests defined";

pub const DEFAULT_WAIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Failures that abort a run.
///
/// Test bodies never produce these; only the collaborators around them do.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown runnable: {0}")]
    UnknownRunnable(RunnableId),

    #[error("Test run not found: {0}")]
    RunNotFound(String),

    #[error("Test session not found: {0}")]
    SessionNotFound(String),
}

/// Outcome of evaluating one test body
#[derive(Debug)]
struct Evaluation {
    result: ResultKind,
    message: Option<String>,
    wait: Option<(String, std::time::Duration)>,
}

impl Evaluation {
    fn new(result: ResultKind, message: Option<String>) -> Self {
        Self {
            result,
            message,
            wait: None,
        }
    }

    fn from_signal(signal: Signal) -> Self {
        let result = signal.result_kind();
        match signal {
            Signal::Wait {
                identifier,
                message,
                timeout,
            } => Self {
                result,
                message: Some(message),
                wait: Some((identifier, timeout)),
            },
            other => Self::new(result, other.message().map(str::to_string)),
        }
    }
}

/// Executes one test run
pub struct TestRunner {
    tree: Arc<RunnableTree>,
    repos: Repositories,
    test_session: TestSession,
    test_run: TestRun,
    resuming: bool,
    default_wait_timeout: std::time::Duration,
    run_results: HashMap<RunnableId, TestResult>,
}

impl TestRunner {
    pub fn new(
        tree: Arc<RunnableTree>,
        repos: Repositories,
        test_session: TestSession,
        test_run: TestRun,
    ) -> Self {
        Self {
            tree,
            repos,
            test_session,
            test_run,
            resuming: false,
            default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            run_results: HashMap::new(),
        }
    }

    /// Reuse results already persisted for this run instead of re-executing
    pub fn resuming(mut self, resuming: bool) -> Self {
        self.resuming = resuming;
        self
    }

    /// Deadline used when a test waits with a zero timeout
    pub fn with_default_wait_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.default_wait_timeout = timeout;
        self
    }

    pub fn test_run(&self) -> &TestRun {
        &self.test_run
    }

    /// Results produced or reused by this invocation
    pub fn run_results(&self) -> impl Iterator<Item = &TestResult> {
        self.run_results.values()
    }

    /// Execute the run's target and settle the run status.
    ///
    /// Returns the current result of every runnable reached by the run.
    pub async fn start(&mut self) -> Result<Vec<TestResult>, RunnerError> {
        self.test_run.status = match self
            .repos
            .test_runs
            .mark_as_running_unless_cancelling(&self.test_run.id)
        {
            Ok(status) => status,
            Err(StoreError::NotFound(_)) => {
                return Err(RunnerError::RunNotFound(self.test_run.id.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "{} run {} for {}",
            if self.resuming { "Resuming" } else { "Starting" },
            self.test_run.id,
            self.test_run.runnable_id
        );

        let timer = Timer::start(format!("Run {}", self.test_run.id));
        let mut scratch = Scratch::new();
        let target = self.test_run.runnable_id.clone();
        let result = self.run(target, &mut scratch).await?;
        let elapsed = timer.stop();

        if self.run_results.values().any(|r| r.is_waiting()) {
            info!(
                "Run {} is waiting after {}ms",
                self.test_run.id,
                elapsed.as_millis()
            );
        } else {
            self.repos.test_runs.mark_as_done(&self.test_run.id)?;
            self.test_run.status = RunStatus::Done;
            info!(
                "Run {} completed in {}ms: {}",
                self.test_run.id,
                elapsed.as_millis(),
                result
            );
        }

        Ok(self.repos.results.results_for_test_run(&self.test_run.id)?)
    }

    /// Execute a runnable and everything below it
    pub fn run<'a>(
        &'a mut self,
        id: RunnableId,
        scratch: &'a mut Scratch,
    ) -> BoxFuture<'a, Result<TestResult, RunnerError>> {
        async move {
            let tree = self.tree.clone();
            let runnable = tree
                .get(&id)
                .ok_or_else(|| RunnerError::UnknownRunnable(id.clone()))?;

            if runnable.is_leaf() {
                self.run_test(runnable, scratch).await
            } else {
                self.run_group(runnable, scratch).await
            }
        }
        .boxed()
    }

    async fn run_test(
        &mut self,
        test: &Runnable,
        scratch: &mut Scratch,
    ) -> Result<TestResult, RunnerError> {
        if self.resuming {
            if let Some(existing) = self
                .repos
                .results
                .result_for_test_run(&self.test_run.id, &test.id)?
            {
                debug!("Reusing {} result for {}", existing.result, test.id);
                self.run_results.insert(test.id.clone(), existing.clone());
                if self.is_direct_target(test) {
                    self.update_parent_result(test)?;
                }
                return Ok(existing);
            }
        }

        let inputs = self.load_inputs(test)?;
        let named_requests = self.load_named_requests(test)?;
        let mut ctx = TestContext::new(&self.test_session.id, &self.test_run.id, test.id.clone())
            .with_inputs(inputs.clone())
            .with_scratch(std::mem::take(scratch))
            .with_named_requests(named_requests);

        let timer = Timer::start(format!("Test {}", test.id));
        let evaluation = self.evaluate_runnable_result(test, &mut ctx).await?;
        timer.stop();

        *scratch = ctx.take_scratch();
        let (outputs, messages, requests) = ctx.into_parts();
        self.save_outputs(test, &outputs)?;

        if let Some((identifier, timeout)) = &evaluation.wait {
            let timeout = if timeout.is_zero() {
                self.default_wait_timeout
            } else {
                *timeout
            };
            let deadline = wait_deadline(Utc::now(), timeout);
            self.repos
                .test_runs
                .mark_as_waiting(&self.test_run.id, identifier, deadline)?;
            self.test_run.status = RunStatus::Waiting;
            info!(
                "Run {} waiting for `{}` until {}",
                self.test_run.id, identifier, deadline
            );
        }

        let mut result = self.new_result(test, evaluation.result, evaluation.message);
        result.messages = messages;
        result.requests = requests;
        result.input_json = serde_json::to_string(&inputs).ok();
        result.output_json = serde_json::to_string(&outputs).ok();
        let result = self.save_result(result)?;
        info!("  {}", result);

        if self.is_direct_target(test) {
            self.update_parent_result(test)?;
        }
        Ok(result)
    }

    async fn run_group(
        &mut self,
        group: &Runnable,
        scratch: &mut Scratch,
    ) -> Result<TestResult, RunnerError> {
        let children: Vec<RunnableId> = self
            .tree
            .children(&group.id, &self.test_session.suite_options)
            .into_iter()
            .map(|child| child.id.clone())
            .collect();

        if children.is_empty() {
            let rollup = Rollup::new(ResultKind::Omit).with_message(NO_TESTS_MESSAGE);
            let result = self.save_result(self.new_result(group, rollup.result, rollup.message))?;
            self.update_parent_result(group)?;
            return Ok(result);
        }

        info!("Running {}", group);

        let mut results = Vec::with_capacity(children.len());
        let mut parked = false;
        for child in children {
            let result = self.run(child, scratch).await?;
            parked = result.is_waiting();
            results.push(result);
            if parked {
                break;
            }
        }

        let collection = ResultCollection::new(results);
        let rollup = match group.aggregation() {
            Some(aggregation) if !parked => aggregation.aggregate(&collection),
            _ => Rollup::new(ResultSummarizer::new(&collection).summarize()),
        };

        let result = self.save_result(self.new_result(group, rollup.result, rollup.message))?;
        info!("  {}", result);
        self.update_parent_result(group)?;
        Ok(result)
    }

    /// Re-derive the results of `node`'s ancestors after it changed.
    ///
    /// A branch is only recomputed once its required children (or all
    /// children, under custom aggregation) have results in this session.
    /// Propagation stops at the first ancestor whose result is unchanged.
    fn update_parent_result(&mut self, node: &Runnable) -> Result<(), RunnerError> {
        let tree = self.tree.clone();
        let mut current = node.id.clone();

        while let Some(parent) = tree.parent(&current) {
            let children = tree.children(&parent.id, &self.test_session.suite_options);
            let child_ids: Vec<RunnableId> = children.iter().map(|c| c.id.clone()).collect();
            let results = self
                .repos
                .results
                .current_results(&self.test_session.id, &child_ids)?;

            if parent.has_custom_aggregation() {
                if results.len() != children.len() {
                    return Ok(());
                }
            } else {
                let required_children = children.iter().filter(|c| c.is_required()).count();
                let required_results = results.iter().filter(|r| r.is_required()).count();
                if required_results != required_children {
                    return Ok(());
                }
            }

            let collection = ResultCollection::new(results);
            let rollup = match parent.aggregation() {
                Some(aggregation) => aggregation.aggregate(&collection),
                None => Rollup::new(ResultSummarizer::new(&collection).summarize()),
            };

            let previous = self
                .repos
                .results
                .current_result(&self.test_session.id, &parent.id)?;
            if previous.map(|p| p.result) == Some(rollup.result) {
                return Ok(());
            }

            debug!("Updating {} to {}", parent.id, rollup.result);
            self.save_result(self.new_result(parent, rollup.result, rollup.message))?;
            current = parent.id.clone();
        }
        Ok(())
    }

    /// Evaluate a test body and map how it ended to a result kind.
    ///
    /// Signals map one to one. Defects and panics become `error`; nothing
    /// raised by a body leaves this function.
    async fn evaluate_runnable_result(
        &self,
        test: &Runnable,
        ctx: &mut TestContext,
    ) -> Result<Evaluation, RunnerError> {
        if self.repos.test_runs.status(&self.test_run.id)? == Some(RunStatus::Cancelling) {
            return Ok(Evaluation::from_signal(Signal::cancel(CANCELLED_MESSAGE)));
        }

        let missing: Vec<&str> = test
            .inputs
            .iter()
            .filter(|input| !input.optional && is_blank(ctx.input(&input.name)))
            .map(|input| input.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Ok(Evaluation::from_signal(Signal::skip(missing_inputs_message(
                &missing,
            ))));
        }

        let Some(body) = test.body() else {
            return Ok(Evaluation::new(ResultKind::Pass, None));
        };

        install_panic_hook();
        // Synchronous bodies run inside `call`, so it must happen under the guard.
        let outcome = AssertUnwindSafe(async move { body.call(ctx).await })
            .catch_unwind()
            .await;
        let evaluation = match outcome {
            Ok(Ok(())) => Evaluation::new(ResultKind::Pass, None),
            Ok(Err(TestError::Signal(signal))) => Evaluation::from_signal(signal),
            Ok(Err(TestError::Defect(defect))) => {
                error!("Error in {} at {}: {:#}", test.id, defect.location, defect.error);
                Evaluation::new(ResultKind::Error, Some(defect_message(&defect)))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref(), take_panic_location());
                error!("Test {} panicked: {}", test.id, message);
                Evaluation::new(ResultKind::Error, Some(message))
            }
        };
        Ok(evaluation)
    }

    /// Declared inputs from session data, falling back to declared defaults
    fn load_inputs(&self, runnable: &Runnable) -> Result<BTreeMap<String, Value>, RunnerError> {
        let mut inputs = BTreeMap::new();
        for input in &runnable.inputs {
            let stored = self
                .repos
                .session_data
                .load(&self.test_session.id, &input.name)?
                .filter(|value| !value.is_null());
            if let Some(value) = stored.or_else(|| input.default.clone()) {
                inputs.insert(input.name.clone(), value);
            }
        }
        Ok(inputs)
    }

    fn load_named_requests(
        &self,
        runnable: &Runnable,
    ) -> Result<BTreeMap<String, RequestRecord>, RunnerError> {
        let mut requests = BTreeMap::new();
        for name in &runnable.uses_requests {
            match self.repos.results.named_request(&self.test_session.id, name)? {
                Some(request) => {
                    requests.insert(name.clone(), request);
                }
                None => debug!("No `{}` request stored for {}", name, runnable.id),
            }
        }
        Ok(requests)
    }

    /// Persist declared outputs into session data
    fn save_outputs(
        &self,
        runnable: &Runnable,
        outputs: &BTreeMap<String, Value>,
    ) -> Result<(), RunnerError> {
        for (name, value) in outputs {
            if runnable.outputs.iter().any(|output| &output.name == name) {
                self.repos
                    .session_data
                    .save(&self.test_session.id, name, value.clone())?;
            } else {
                warn!("{} set undeclared output `{}`; ignoring", runnable.id, name);
            }
        }
        Ok(())
    }

    fn new_result(
        &self,
        runnable: &Runnable,
        result: ResultKind,
        result_message: Option<String>,
    ) -> TestResult {
        let now = Utc::now();
        TestResult {
            id: generate_id("result"),
            test_session_id: self.test_session.id.clone(),
            test_run_id: self.test_run.id.clone(),
            runnable_id: runnable.id.clone(),
            runnable_kind: runnable.kind,
            optional: runnable.optional,
            result,
            result_message,
            messages: Vec::new(),
            requests: Vec::new(),
            input_json: None,
            output_json: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn save_result(&mut self, result: TestResult) -> Result<TestResult, RunnerError> {
        let result = self.repos.results.create(result)?;
        self.run_results
            .insert(result.runnable_id.clone(), result.clone());
        Ok(result)
    }

    /// Whether the run targets this node itself rather than an ancestor
    fn is_direct_target(&self, runnable: &Runnable) -> bool {
        self.test_run.runnable_id == runnable.id
    }
}

/// Skip message for absent required inputs
pub fn missing_inputs_message(missing: &[&str]) -> String {
    let names: Vec<String> = missing.iter().map(|name| format!("`{name}`")).collect();
    if names.len() == 1 {
        format!("Missing input: {}", names[0])
    } else {
        format!("Missing inputs: {}", names.join(", "))
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn wait_deadline(now: DateTime<Utc>, timeout: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Error text plus its first frame: the first captured backtrace frame
/// outside std and anyhow, else the place the defect was raised
fn defect_message(defect: &Defect) -> String {
    let frame = first_frame(defect.error.backtrace()).unwrap_or_else(|| defect.frame());
    format!("{:#}\n{frame}", defect.error)
}

fn first_frame(backtrace: &Backtrace) -> Option<String> {
    if backtrace.status() != BacktraceStatus::Captured {
        return None;
    }
    backtrace
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("at "))
        .find(|line| !line.contains("/rustc/") && !line.contains("/anyhow-"))
        .map(|line| line.trim_start_matches("at ").to_string())
}

thread_local! {
    static PANIC_LOCATION: Cell<Option<String>> = const { Cell::new(None) };
}

/// Record the location of every panic on the panicking thread, then defer
/// to the previously installed hook.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                PANIC_LOCATION.with(|slot| slot.set(Some(location.to_string())));
            }
            previous(info);
        }));
    });
}

fn take_panic_location() -> Option<String> {
    PANIC_LOCATION.with(Cell::take)
}

fn panic_message(payload: &(dyn Any + Send), location: Option<String>) -> String {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test body panicked".to_string()
    };
    match location {
        Some(location) => format!("{message}\n{location}"),
        None => message,
    }
}
