//! Data models for conformance runs
//!
//! The authored runnable tree plus the entities the engine persists.

mod result;
mod runnable;
mod test_run;
mod tree;

pub use result::{Message, MessageType, RequestRecord, ResultKind, TestResult};
pub use runnable::{
    CustomAggregation, InputDefinition, InputType, OutputDefinition, Runnable, RunnableId,
    RunnableKind, SuiteOption, TestBody,
};
pub use test_run::{RunStatus, TestRun, TestSession};
pub use tree::{GroupDefinition, RunnableTree, SuiteDefinition, TestDefinition, TreeError};
