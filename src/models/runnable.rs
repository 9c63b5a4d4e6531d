//! Runnable definitions
//!
//! A runnable is one node of the authored tree: a suite, a group or a test.
//! Nodes are created once when the tree is built and never change afterwards.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::executor::{ResultCollection, Rollup, TestContext, TestOutcome};

/// Identifier of a runnable, unique within a tree
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunnableId(String);

impl RunnableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunnableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunnableId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RunnableId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Runnable variant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnableKind {
    Suite,
    Group,
    Test,
}

impl RunnableKind {
    pub fn is_leaf(&self) -> bool {
        matches!(self, RunnableKind::Test)
    }
}

impl fmt::Display for RunnableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnableKind::Suite => write!(f, "suite"),
            RunnableKind::Group => write!(f, "group"),
            RunnableKind::Test => write!(f, "test"),
        }
    }
}

/// Input value kinds a test may declare
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    #[default]
    Text,
    Textarea,
    Radio,
    Checkbox,
    Credentials,
}

/// Declared input of a runnable
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputDefinition {
    pub name: String,
    #[serde(default)]
    pub input_type: InputType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl InputDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_type: InputType::Text,
            title: None,
            optional: false,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_type(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Declared output of a runnable
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDefinition {
    pub name: String,
    #[serde(default)]
    pub output_type: InputType,
}

impl OutputDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_type: InputType::Text,
        }
    }
}

/// A selected suite option, e.g. `launch = ehr`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuiteOption {
    pub id: String,
    pub value: String,
}

impl SuiteOption {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }

    /// Parse `id=value`
    pub fn parse(s: &str) -> Option<Self> {
        let (id, value) = s.split_once('=')?;
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        Some(Self::new(id, value.trim()))
    }
}

type BodyFn = dyn for<'a> Fn(&'a mut TestContext) -> BoxFuture<'a, TestOutcome> + Send + Sync;

/// Test body bound to a leaf at registration time.
///
/// The engine only knows the calling convention: a mutable context in,
/// `Ok(())` or a [`crate::executor::TestError`] out.
#[derive(Clone)]
pub struct TestBody(Arc<BodyFn>);

impl TestBody {
    pub fn new<F>(body: F) -> Self
    where
        F: for<'a> Fn(&'a mut TestContext) -> BoxFuture<'a, TestOutcome> + Send + Sync + 'static,
    {
        Self(Arc::new(body))
    }

    /// Wrap a synchronous body
    pub fn from_fn<F>(body: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        Self::new(move |ctx| {
            let outcome = body(ctx);
            Box::pin(futures::future::ready(outcome))
        })
    }

    pub fn call<'a>(&self, ctx: &'a mut TestContext) -> BoxFuture<'a, TestOutcome> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TestBody(..)")
    }
}

type AggregationFn = dyn Fn(&ResultCollection) -> Rollup + Send + Sync;

/// Branch-supplied rollup that replaces the automatic summarizer
#[derive(Clone)]
pub struct CustomAggregation(Arc<AggregationFn>);

impl CustomAggregation {
    pub fn new<F>(aggregate: F) -> Self
    where
        F: Fn(&ResultCollection) -> Rollup + Send + Sync + 'static,
    {
        Self(Arc::new(aggregate))
    }

    pub fn aggregate(&self, results: &ResultCollection) -> Rollup {
        (self.0)(results)
    }
}

impl fmt::Debug for CustomAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomAggregation(..)")
    }
}

/// One node of the authored tree
#[derive(Clone, Debug)]
pub struct Runnable {
    pub id: RunnableId,
    pub title: String,
    pub description: Option<String>,
    pub kind: RunnableKind,
    pub parent: Option<RunnableId>,
    pub children: Vec<RunnableId>,
    pub inputs: Vec<InputDefinition>,
    pub outputs: Vec<OutputDefinition>,
    pub optional: bool,
    pub user_runnable: bool,
    pub run_as_group: bool,
    /// Options that must all be selected for this node to be included
    pub required_options: Vec<SuiteOption>,
    /// Names under which this test's requests are stored
    pub makes_requests: Vec<String>,
    /// Named requests loaded before this test runs
    pub uses_requests: Vec<String>,
    pub(crate) body: Option<TestBody>,
    pub(crate) aggregation: Option<CustomAggregation>,
}

impl Runnable {
    pub fn is_required(&self) -> bool {
        !self.optional
    }

    pub fn is_leaf(&self) -> bool {
        self.kind.is_leaf()
    }

    pub fn body(&self) -> Option<&TestBody> {
        self.body.as_ref()
    }

    pub fn aggregation(&self) -> Option<&CustomAggregation> {
        self.aggregation.as_ref()
    }

    pub fn has_custom_aggregation(&self) -> bool {
        self.aggregation.is_some()
    }

    /// Whether this node is included under the selected suite options
    pub fn matches_options(&self, selected: &[SuiteOption]) -> bool {
        self.required_options
            .iter()
            .all(|required| selected.contains(required))
    }
}

impl fmt::Display for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.id, self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_option_parse() {
        assert_eq!(
            SuiteOption::parse("launch = ehr"),
            Some(SuiteOption::new("launch", "ehr"))
        );
        assert_eq!(SuiteOption::parse("no-separator"), None);
        assert_eq!(SuiteOption::parse("=value"), None);
    }

    #[test]
    fn test_input_definition_builder() {
        let input = InputDefinition::new("url")
            .with_title("Server URL")
            .with_default("http://localhost")
            .optional();

        assert!(input.optional);
        assert_eq!(input.default, Some(Value::from("http://localhost")));
        assert_eq!(input.input_type, InputType::Text);
    }

    #[test]
    fn test_runnable_id_serializes_transparently() {
        let id = RunnableId::new("suite-group-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"suite-group-1\"");
        assert_eq!(id.to_string(), "suite-group-1");
    }
}
