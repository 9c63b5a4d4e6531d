//! Test execution context
//!
//! Everything a test body can see or produce: its inputs, the run's scratch
//! bag, declared outputs, messages and captured requests.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::signal::Signal;
use crate::models::{Message, MessageType, RequestRecord, RunnableId};

/// Ad hoc key/value data shared by the tests of one run
pub type Scratch = HashMap<String, Value>;

/// Context handed to a test body
#[derive(Debug, Default)]
pub struct TestContext {
    test_session_id: String,
    test_run_id: String,
    runnable_id: Option<RunnableId>,
    inputs: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
    scratch: Scratch,
    messages: Vec<Message>,
    requests: Vec<RequestRecord>,
    named_requests: BTreeMap<String, RequestRecord>,
}

impl TestContext {
    pub fn new(
        test_session_id: impl Into<String>,
        test_run_id: impl Into<String>,
        runnable_id: RunnableId,
    ) -> Self {
        Self {
            test_session_id: test_session_id.into(),
            test_run_id: test_run_id.into(),
            runnable_id: Some(runnable_id),
            ..Self::default()
        }
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_scratch(mut self, scratch: Scratch) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn with_named_requests(mut self, requests: BTreeMap<String, RequestRecord>) -> Self {
        self.named_requests = requests;
        self
    }

    pub fn test_session_id(&self) -> &str {
        &self.test_session_id
    }

    pub fn test_run_id(&self) -> &str {
        &self.test_run_id
    }

    pub fn runnable_id(&self) -> Option<&RunnableId> {
        self.runnable_id.as_ref()
    }

    // Inputs

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).filter(|value| !value.is_null())
    }

    /// String input; non-string JSON values are rendered as JSON
    pub fn input_str(&self, name: &str) -> Option<String> {
        self.input(name).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Input that the body cannot proceed without
    pub fn require_input(&self, name: &str) -> Result<String, Signal> {
        self.input_str(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Signal::skip(format!("Missing input: `{name}`")))
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    // Outputs

    /// Record an output to persist into session data
    pub fn output(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.outputs.insert(name.into(), value.into());
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    // Scratch

    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }

    pub fn scratch_mut(&mut self) -> &mut Scratch {
        &mut self.scratch
    }

    pub(crate) fn take_scratch(&mut self) -> Scratch {
        std::mem::take(&mut self.scratch)
    }

    // Messages

    pub fn info(&mut self, message: impl Into<String>) {
        self.messages.push(Message::new(MessageType::Info, message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.messages.push(Message::new(MessageType::Warning, message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.messages.push(Message::new(MessageType::Error, message));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    // Requests

    pub fn record_request(&mut self, request: RequestRecord) {
        self.requests.push(request);
    }

    pub fn requests(&self) -> &[RequestRecord] {
        &self.requests
    }

    /// Most recent request stored under `name`, from this test or an earlier one
    pub fn named_request(&self, name: &str) -> Option<&RequestRecord> {
        self.requests
            .iter()
            .rev()
            .find(|request| request.name.as_deref() == Some(name))
            .or_else(|| self.named_requests.get(name))
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, Value>, Vec<Message>, Vec<RequestRecord>) {
        (self.outputs, self.messages, self.requests)
    }

    // Assertions

    /// Fail with `message` unless `condition` holds
    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<(), Signal> {
        if condition {
            Ok(())
        } else {
            Err(Signal::fail(message))
        }
    }

    pub fn pass_if(&self, condition: bool, message: impl Into<String>) -> Result<(), Signal> {
        if condition {
            Err(Signal::Pass(Some(message.into())))
        } else {
            Ok(())
        }
    }

    pub fn skip_if(&self, condition: bool, reason: impl Into<String>) -> Result<(), Signal> {
        if condition {
            Err(Signal::skip(reason))
        } else {
            Ok(())
        }
    }

    pub fn omit_if(&self, condition: bool, reason: impl Into<String>) -> Result<(), Signal> {
        if condition {
            Err(Signal::omit(reason))
        } else {
            Ok(())
        }
    }

    /// Park the run until an event carrying `identifier` arrives
    pub fn wait(
        &self,
        identifier: impl Into<String>,
        message: impl Into<String>,
        timeout: Duration,
    ) -> Result<(), Signal> {
        Err(Signal::wait(identifier, message, timeout))
    }
}
