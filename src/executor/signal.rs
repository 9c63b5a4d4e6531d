//! Test body control flow
//!
//! A body ends early by returning a [`Signal`]. Anything else that goes wrong
//! is a defect and becomes an `error` result.

use std::fmt;
use std::panic::Location;
use std::time::Duration;

use crate::http::HttpError;
use crate::models::ResultKind;

/// Intentional early exit from a test body
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    Pass(Option<String>),
    Fail(String),
    Skip(String),
    Omit(String),
    Wait {
        identifier: String,
        message: String,
        timeout: Duration,
    },
    Cancel(String),
}

impl Signal {
    pub fn pass() -> Self {
        Signal::Pass(None)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Signal::Fail(message.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Signal::Skip(reason.into())
    }

    pub fn omit(reason: impl Into<String>) -> Self {
        Signal::Omit(reason.into())
    }

    pub fn wait(identifier: impl Into<String>, message: impl Into<String>, timeout: Duration) -> Self {
        Signal::Wait {
            identifier: identifier.into(),
            message: message.into(),
            timeout,
        }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Signal::Cancel(reason.into())
    }

    /// Result kind this signal maps to
    pub fn result_kind(&self) -> ResultKind {
        match self {
            Signal::Pass(_) => ResultKind::Pass,
            Signal::Fail(_) => ResultKind::Fail,
            Signal::Skip(_) => ResultKind::Skip,
            Signal::Omit(_) => ResultKind::Omit,
            Signal::Wait { .. } => ResultKind::Wait,
            Signal::Cancel(_) => ResultKind::Cancel,
        }
    }

    /// Author-supplied result message
    pub fn message(&self) -> Option<&str> {
        match self {
            Signal::Pass(message) => message.as_deref(),
            Signal::Fail(message)
            | Signal::Skip(message)
            | Signal::Omit(message)
            | Signal::Cancel(message) => Some(message),
            Signal::Wait { message, .. } => Some(message),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) if !message.is_empty() => write!(f, "{}: {message}", self.result_kind()),
            _ => write!(f, "{}", self.result_kind()),
        }
    }
}

/// Unexpected error raised by a test body, with the place it was raised
#[derive(Debug)]
pub struct Defect {
    pub error: anyhow::Error,
    pub location: &'static Location<'static>,
}

impl Defect {
    #[track_caller]
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            location: Location::caller(),
        }
    }

    /// `file:line:column` of the raising call
    pub fn frame(&self) -> String {
        self.location.to_string()
    }
}

/// Why a test body stopped before returning `Ok(())`
#[derive(Debug)]
pub enum TestError {
    Signal(Signal),
    Defect(Defect),
}

impl TestError {
    /// Defect located at the caller
    #[track_caller]
    pub fn defect(error: impl Into<anyhow::Error>) -> Self {
        TestError::Defect(Defect::new(error))
    }
}

impl From<Signal> for TestError {
    fn from(signal: Signal) -> Self {
        TestError::Signal(signal)
    }
}

// `?` forwards its call site to these conversions.
impl From<anyhow::Error> for TestError {
    #[track_caller]
    fn from(err: anyhow::Error) -> Self {
        TestError::defect(err)
    }
}

impl From<serde_json::Error> for TestError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        TestError::defect(err)
    }
}

impl From<HttpError> for TestError {
    #[track_caller]
    fn from(err: HttpError) -> Self {
        TestError::defect(err)
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Signal(signal) => write!(f, "{signal}"),
            TestError::Defect(defect) => write!(f, "{}", defect.error),
        }
    }
}

/// Return type of every test body
pub type TestOutcome = Result<(), TestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_map_one_to_one() {
        let cases = vec![
            (Signal::pass(), ResultKind::Pass),
            (Signal::fail("bad"), ResultKind::Fail),
            (Signal::skip("no data"), ResultKind::Skip),
            (Signal::omit("n/a"), ResultKind::Omit),
            (
                Signal::wait("abc", "waiting", Duration::from_secs(5)),
                ResultKind::Wait,
            ),
            (Signal::cancel("stop"), ResultKind::Cancel),
        ];

        for (signal, kind) in cases {
            assert_eq!(signal.result_kind(), kind);
        }
    }

    #[test]
    fn test_signal_messages() {
        assert_eq!(Signal::pass().message(), None);
        assert_eq!(Signal::fail("bad").message(), Some("bad"));
        assert_eq!(
            Signal::wait("abc", "waiting for launch", Duration::from_secs(1)).message(),
            Some("waiting for launch")
        );
        assert_eq!(Signal::skip("no data").to_string(), "SKIP: no data");
    }

    #[test]
    fn test_question_mark_converts_signals_and_defects() {
        fn body(fail: bool) -> TestOutcome {
            if fail {
                return Err(Signal::fail("assertion").into());
            }
            let _: serde_json::Value = serde_json::from_str("{not json")?;
            Ok(())
        }

        assert!(matches!(body(true), Err(TestError::Signal(Signal::Fail(_)))));
        assert!(matches!(body(false), Err(TestError::Defect(_))));
    }

    #[test]
    fn test_defect_records_where_it_was_raised() {
        let line = line!() + 1;
        let err = TestError::defect(anyhow::anyhow!("connection refused"));

        let TestError::Defect(defect) = err else {
            panic!("expected a defect");
        };
        assert!(defect.location.file().ends_with("signal.rs"));
        assert_eq!(defect.location.line(), line);
        assert!(defect.frame().contains("signal.rs:"));
        assert_eq!(defect.error.to_string(), "connection refused");
    }
}
