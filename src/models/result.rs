//! Result models for conformance runs
//!
//! Defines the result taxonomy and the persisted outcome of one runnable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::runnable::{RunnableId, RunnableKind};

/// Outcome of executing one runnable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Pass,
    Fail,
    Skip,
    Omit,
    Error,
    Wait,
    Cancel,
    Running,
}

impl ResultKind {
    /// Rollup priority, most dominant first.
    ///
    /// When sibling results disagree the first kind in this list that is
    /// present wins. The order is part of the persisted contract.
    pub const PRIORITY: [ResultKind; 8] = [
        ResultKind::Cancel,
        ResultKind::Wait,
        ResultKind::Running,
        ResultKind::Error,
        ResultKind::Fail,
        ResultKind::Skip,
        ResultKind::Pass,
        ResultKind::Omit,
    ];

    /// Position in [`ResultKind::PRIORITY`] (0 = most dominant)
    pub fn priority(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|kind| *kind == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ResultKind::Pass => "✓",
            ResultKind::Fail => "✗",
            ResultKind::Skip => "○",
            ResultKind::Omit => "-",
            ResultKind::Error => "!",
            ResultKind::Wait => "…",
            ResultKind::Cancel => "⊘",
            ResultKind::Running => "▶",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultKind::Pass)
    }

    /// Parse from the lowercase wire name
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pass" => Some(ResultKind::Pass),
            "fail" => Some(ResultKind::Fail),
            "skip" => Some(ResultKind::Skip),
            "omit" => Some(ResultKind::Omit),
            "error" => Some(ResultKind::Error),
            "wait" => Some(ResultKind::Wait),
            "cancel" => Some(ResultKind::Cancel),
            "running" => Some(ResultKind::Running),
            _ => None,
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKind::Pass => write!(f, "PASS"),
            ResultKind::Fail => write!(f, "FAIL"),
            ResultKind::Skip => write!(f, "SKIP"),
            ResultKind::Omit => write!(f, "OMIT"),
            ResultKind::Error => write!(f, "ERROR"),
            ResultKind::Wait => write!(f, "WAIT"),
            ResultKind::Cancel => write!(f, "CANCEL"),
            ResultKind::Running => write!(f, "RUNNING"),
        }
    }
}

/// Severity of a message attached to a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Info,
    Warning,
    Error,
}

/// Structured message recorded by a test body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub message: String,
}

impl Message {
    pub fn new(message_type: MessageType, message: impl Into<String>) -> Self {
        Self {
            message_type,
            message: message.into(),
        }
    }
}

/// One HTTP exchange captured while a test ran
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Name used to share the request with later tests
    #[serde(default)]
    pub name: Option<String>,
    pub verb: String,
    pub url: String,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub request_body: Option<String>,
    pub status: Option<u16>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_body: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl RequestRecord {
    pub fn new(verb: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: None,
            verb: verb.into(),
            url: url.into(),
            request_headers: BTreeMap::new(),
            request_body: None,
            status: None,
            response_headers: BTreeMap::new(),
            response_body: None,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_response_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    /// Case-insensitive response header lookup
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Persisted outcome of one runnable within one test run.
///
/// Records are never modified in place. Resolving a waiting result stores a
/// newer record for the same runnable, and the newest record is the current one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub test_session_id: String,
    pub test_run_id: String,
    pub runnable_id: RunnableId,
    pub runnable_kind: RunnableKind,
    /// Copied from the runnable so rollups can partition without the tree
    #[serde(default)]
    pub optional: bool,
    pub result: ResultKind,
    pub result_message: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub requests: Vec<RequestRecord>,
    pub input_json: Option<String>,
    pub output_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestResult {
    pub fn is_required(&self) -> bool {
        !self.optional
    }

    pub fn is_waiting(&self) -> bool {
        self.result == ResultKind::Wait
    }

    /// Copy of this record carrying a new outcome, used to supersede it
    pub fn superseded_by(
        &self,
        id: impl Into<String>,
        result: ResultKind,
        result_message: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            result,
            result_message,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.result.symbol(), self.runnable_id, self.result)?;
        if let Some(msg) = &self.result_message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_is_total() {
        for (index, kind) in ResultKind::PRIORITY.iter().enumerate() {
            assert_eq!(kind.priority(), index);
        }
        assert!(ResultKind::Cancel.priority() < ResultKind::Error.priority());
        assert!(ResultKind::Fail.priority() < ResultKind::Pass.priority());
        assert!(ResultKind::Pass.priority() < ResultKind::Omit.priority());
    }

    #[test]
    fn test_result_kind_serde_names() {
        let json = serde_json::to_string(&ResultKind::Cancel).unwrap();
        assert_eq!(json, "\"cancel\"");
        let kind: ResultKind = serde_json::from_str("\"omit\"").unwrap();
        assert_eq!(kind, ResultKind::Omit);
        assert_eq!(ResultKind::from_str("WAIT"), Some(ResultKind::Wait));
        assert_eq!(ResultKind::from_str("unknown"), None);
    }

    #[test]
    fn test_response_header_lookup() {
        let mut record = RequestRecord::new("GET", "http://example.com/metadata").with_status(200);
        record
            .response_headers
            .insert("Content-Type".to_string(), "application/json".to_string());

        assert_eq!(record.response_header("content-type"), Some("application/json"));
        assert_eq!(record.response_header("x-missing"), None);
    }
}
