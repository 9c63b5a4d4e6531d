//! Built-in suites
//!
//! Suites are registered here and loaded into one [`RunnableTree`] at start-up.

mod capability;

pub use capability::{capability_suite, capability_suite_with_timeout};

use crate::models::{RunnableTree, SuiteDefinition, TreeError};

/// Every suite shipped with the binary
pub fn all() -> Vec<SuiteDefinition> {
    vec![capability_suite()]
}

/// Tree holding every built-in suite
pub fn load_tree() -> Result<RunnableTree, TreeError> {
    RunnableTree::from_suites(all())
}

/// Same as [`load_tree`] with a configured HTTP timeout
pub fn load_tree_with_timeout(http_timeout_secs: u64) -> Result<RunnableTree, TreeError> {
    RunnableTree::from_suites(vec![capability_suite_with_timeout(http_timeout_secs)])
}
