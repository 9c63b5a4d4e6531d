//! Test execution engine
//!
//! Runs authored trees, maps test body outcomes to results and rolls them up.

mod context;
mod runner;
mod service;
mod signal;
mod summarizer;

pub use context::{Scratch, TestContext};
pub use runner::{
    missing_inputs_message, RunnerError, TestRunner, CANCELLED_MESSAGE, DEFAULT_WAIT_TIMEOUT,
    NO_TESTS_MESSAGE,
};
pub use service::{ResumeOutcome, ServiceError, TestRunService};
pub use signal::{Defect, Signal, TestError, TestOutcome};
pub use summarizer::{ResultCollection, ResultSummarizer, Rollup};
