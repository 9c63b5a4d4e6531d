//! Result rollup
//!
//! Derives a branch's result from its children's results. Rollup is a pure
//! function of the multiset of (kind, required) pairs: order and identity of
//! the children never matter.

use std::collections::HashSet;

use crate::models::{ResultKind, RunnableId, TestResult};

/// Result computed for a branch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rollup {
    pub result: ResultKind,
    pub message: Option<String>,
}

impl Rollup {
    pub fn new(result: ResultKind) -> Self {
        Self {
            result,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl From<ResultKind> for Rollup {
    fn from(result: ResultKind) -> Self {
        Self::new(result)
    }
}

/// Owned set of child results handed to rollup and custom aggregation
#[derive(Clone, Debug, Default)]
pub struct ResultCollection {
    results: Vec<TestResult>,
}

impl ResultCollection {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter()
    }

    pub fn required(&self) -> Vec<&TestResult> {
        self.results.iter().filter(|r| r.is_required()).collect()
    }

    pub fn optional(&self) -> Vec<&TestResult> {
        self.results.iter().filter(|r| r.optional).collect()
    }

    pub fn find(&self, runnable_id: &RunnableId) -> Option<&TestResult> {
        self.results.iter().find(|r| &r.runnable_id == runnable_id)
    }

    /// Every required result passed (and at least one exists)
    pub fn pass_all(&self) -> bool {
        let required = self.required();
        !required.is_empty() && required.iter().all(|r| r.result == ResultKind::Pass)
    }

    pub fn pass_any(&self) -> bool {
        self.contains(ResultKind::Pass)
    }

    pub fn contains(&self, kind: ResultKind) -> bool {
        self.results.iter().any(|r| r.result == kind)
    }

    /// (kind, required) pairs the summarizer works on
    pub fn outcomes(&self) -> Vec<(ResultKind, bool)> {
        self.results
            .iter()
            .map(|r| (r.result, r.is_required()))
            .collect()
    }
}

impl FromIterator<TestResult> for ResultCollection {
    fn from_iter<I: IntoIterator<Item = TestResult>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Automatic rollup used when a branch has no custom aggregation
#[derive(Clone, Debug)]
pub struct ResultSummarizer {
    outcomes: Vec<(ResultKind, bool)>,
}

impl ResultSummarizer {
    pub fn new(results: &ResultCollection) -> Self {
        Self::from_outcomes(results.outcomes())
    }

    pub fn from_outcomes(outcomes: Vec<(ResultKind, bool)>) -> Self {
        Self { outcomes }
    }

    pub fn summarize(&self) -> ResultKind {
        let required: Vec<ResultKind> = self
            .outcomes
            .iter()
            .filter(|(_, required)| *required)
            .map(|(kind, _)| *kind)
            .collect();

        if !required.is_empty() {
            return Self::dominant(&required);
        }

        let optional: Vec<ResultKind> = self.outcomes.iter().map(|(kind, _)| *kind).collect();
        if Self::optional_passing_criteria_met(&optional) {
            return ResultKind::Pass;
        }
        Self::dominant(&optional)
    }

    /// An optional-only branch passes when something passed and nothing is pending
    fn optional_passing_criteria_met(optional: &[ResultKind]) -> bool {
        optional.contains(&ResultKind::Pass)
            && !optional
                .iter()
                .any(|kind| matches!(kind, ResultKind::Wait | ResultKind::Running))
    }

    /// First kind in priority order present in `kinds`; `omit` when empty
    fn dominant(kinds: &[ResultKind]) -> ResultKind {
        let present: HashSet<ResultKind> = kinds.iter().copied().collect();
        ResultKind::PRIORITY
            .iter()
            .copied()
            .find(|kind| present.contains(kind))
            .unwrap_or(ResultKind::Omit)
    }
}
