//! Runnable tree
//!
//! Authors describe suites with the `*Definition` builders; [`RunnableTree`]
//! flattens them into an arena keyed by id. Parents are stored as ids, so
//! walking upward for rollup is a map lookup per level.

use std::collections::HashMap;
use thiserror::Error;

use super::runnable::{
    CustomAggregation, InputDefinition, OutputDefinition, Runnable, RunnableId, RunnableKind,
    SuiteOption, TestBody,
};
use crate::executor::{ResultCollection, Rollup, TestContext, TestOutcome};
use futures::future::BoxFuture;

/// Tree construction and lookup errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("Duplicate runnable id: {0}")]
    DuplicateId(RunnableId),

    #[error("Unknown runnable: {0}")]
    UnknownRunnable(String),
}

/// Authored test (leaf)
#[derive(Clone, Debug)]
pub struct TestDefinition {
    id: RunnableId,
    title: String,
    description: Option<String>,
    optional: bool,
    inputs: Vec<InputDefinition>,
    outputs: Vec<OutputDefinition>,
    required_options: Vec<SuiteOption>,
    makes_requests: Vec<String>,
    uses_requests: Vec<String>,
    body: Option<TestBody>,
}

impl TestDefinition {
    pub fn new(id: impl Into<RunnableId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            optional: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            required_options: Vec::new(),
            makes_requests: Vec::new(),
            uses_requests: Vec::new(),
            body: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn input(mut self, input: InputDefinition) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputDefinition::new(name));
        self
    }

    pub fn requires_option(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.required_options.push(SuiteOption::new(id, value));
        self
    }

    pub fn makes_request(mut self, name: impl Into<String>) -> Self {
        self.makes_requests.push(name.into());
        self
    }

    pub fn uses_request(mut self, name: impl Into<String>) -> Self {
        self.uses_requests.push(name.into());
        self
    }

    /// Bind an asynchronous body
    pub fn body<F>(mut self, body: F) -> Self
    where
        F: for<'a> Fn(&'a mut TestContext) -> BoxFuture<'a, TestOutcome> + Send + Sync + 'static,
    {
        self.body = Some(TestBody::new(body));
        self
    }

    /// Bind a synchronous body
    pub fn run<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        self.body = Some(TestBody::from_fn(body));
        self
    }
}

/// Child of a suite or group
#[derive(Clone, Debug)]
pub enum ChildDefinition {
    Group(GroupDefinition),
    Test(TestDefinition),
}

/// Authored group (branch)
#[derive(Clone, Debug)]
pub struct GroupDefinition {
    id: RunnableId,
    title: String,
    description: Option<String>,
    optional: bool,
    run_as_group: bool,
    inputs: Vec<InputDefinition>,
    outputs: Vec<OutputDefinition>,
    required_options: Vec<SuiteOption>,
    aggregation: Option<CustomAggregation>,
    children: Vec<ChildDefinition>,
}

impl GroupDefinition {
    pub fn new(id: impl Into<RunnableId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            optional: false,
            run_as_group: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            required_options: Vec::new(),
            aggregation: None,
            children: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Children may only be executed together with this group
    pub fn run_as_group(mut self) -> Self {
        self.run_as_group = true;
        self
    }

    pub fn input(mut self, input: InputDefinition) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputDefinition::new(name));
        self
    }

    pub fn requires_option(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.required_options.push(SuiteOption::new(id, value));
        self
    }

    pub fn aggregate<F>(mut self, aggregate: F) -> Self
    where
        F: Fn(&ResultCollection) -> Rollup + Send + Sync + 'static,
    {
        self.aggregation = Some(CustomAggregation::new(aggregate));
        self
    }

    pub fn group(mut self, group: GroupDefinition) -> Self {
        self.children.push(ChildDefinition::Group(group));
        self
    }

    pub fn test(mut self, test: TestDefinition) -> Self {
        self.children.push(ChildDefinition::Test(test));
        self
    }
}

/// Authored suite (root branch)
#[derive(Clone, Debug)]
pub struct SuiteDefinition {
    group: GroupDefinition,
}

impl SuiteDefinition {
    pub fn new(id: impl Into<RunnableId>, title: impl Into<String>) -> Self {
        Self {
            group: GroupDefinition::new(id, title),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.group = self.group.description(description);
        self
    }

    pub fn input(mut self, input: InputDefinition) -> Self {
        self.group = self.group.input(input);
        self
    }

    pub fn aggregate<F>(mut self, aggregate: F) -> Self
    where
        F: Fn(&ResultCollection) -> Rollup + Send + Sync + 'static,
    {
        self.group = self.group.aggregate(aggregate);
        self
    }

    pub fn group(mut self, group: GroupDefinition) -> Self {
        self.group = self.group.group(group);
        self
    }

    pub fn test(mut self, test: TestDefinition) -> Self {
        self.group = self.group.test(test);
        self
    }
}

/// Arena of loaded runnables
#[derive(Debug, Default)]
pub struct RunnableTree {
    nodes: HashMap<RunnableId, Runnable>,
    suites: Vec<RunnableId>,
}

impl RunnableTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree holding the given suites
    pub fn from_suites(suites: Vec<SuiteDefinition>) -> Result<Self, TreeError> {
        let mut tree = Self::new();
        for suite in suites {
            tree.add_suite(suite)?;
        }
        Ok(tree)
    }

    /// Load one suite into the arena
    pub fn add_suite(&mut self, suite: SuiteDefinition) -> Result<RunnableId, TreeError> {
        let id = self.insert_branch(suite.group, RunnableKind::Suite, None, true)?;
        self.suites.push(id.clone());
        Ok(id)
    }

    fn insert_branch(
        &mut self,
        def: GroupDefinition,
        kind: RunnableKind,
        parent: Option<RunnableId>,
        user_runnable: bool,
    ) -> Result<RunnableId, TreeError> {
        self.ensure_unused(&def.id)?;
        let id = def.id.clone();
        let children_user_runnable = user_runnable && !def.run_as_group;

        let mut children = Vec::with_capacity(def.children.len());
        // Reserve the id before descending so children cannot reuse it.
        self.nodes.insert(
            id.clone(),
            Runnable {
                id: id.clone(),
                title: def.title,
                description: def.description,
                kind,
                parent,
                children: Vec::new(),
                inputs: def.inputs,
                outputs: def.outputs,
                optional: def.optional,
                user_runnable,
                run_as_group: def.run_as_group,
                required_options: def.required_options,
                makes_requests: Vec::new(),
                uses_requests: Vec::new(),
                body: None,
                aggregation: def.aggregation,
            },
        );

        for child in def.children {
            let child_id = match child {
                ChildDefinition::Group(group) => self.insert_branch(
                    group,
                    RunnableKind::Group,
                    Some(id.clone()),
                    children_user_runnable,
                )?,
                ChildDefinition::Test(test) => {
                    self.insert_test(test, id.clone(), children_user_runnable)?
                }
            };
            children.push(child_id);
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.children = children;
        }
        Ok(id)
    }

    fn insert_test(
        &mut self,
        def: TestDefinition,
        parent: RunnableId,
        user_runnable: bool,
    ) -> Result<RunnableId, TreeError> {
        self.ensure_unused(&def.id)?;
        let id = def.id.clone();
        self.nodes.insert(
            id.clone(),
            Runnable {
                id: id.clone(),
                title: def.title,
                description: def.description,
                kind: RunnableKind::Test,
                parent: Some(parent),
                children: Vec::new(),
                inputs: def.inputs,
                outputs: def.outputs,
                optional: def.optional,
                user_runnable,
                run_as_group: false,
                required_options: def.required_options,
                makes_requests: def.makes_requests,
                uses_requests: def.uses_requests,
                body: def.body,
                aggregation: None,
            },
        );
        Ok(id)
    }

    fn ensure_unused(&self, id: &RunnableId) -> Result<(), TreeError> {
        if self.nodes.contains_key(id) {
            return Err(TreeError::DuplicateId(id.clone()));
        }
        Ok(())
    }

    pub fn get(&self, id: &RunnableId) -> Option<&Runnable> {
        self.nodes.get(id)
    }

    /// Resolve a string id to its loaded definition
    pub fn resolve(&self, id: &str) -> Result<&Runnable, TreeError> {
        self.nodes
            .get(&RunnableId::new(id))
            .ok_or_else(|| TreeError::UnknownRunnable(id.to_string()))
    }

    pub fn suites(&self) -> impl Iterator<Item = &Runnable> {
        self.suites.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children in declared order, filtered by the selected suite options
    pub fn children(&self, id: &RunnableId, selected: &[SuiteOption]) -> Vec<&Runnable> {
        self.nodes
            .get(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .filter(|child| child.matches_options(selected))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn parent(&self, id: &RunnableId) -> Option<&Runnable> {
        self.nodes
            .get(id)
            .and_then(|node| node.parent.as_ref())
            .and_then(|parent| self.nodes.get(parent))
    }

    /// Root suite of the given node
    pub fn suite_of(&self, id: &RunnableId) -> Option<&Runnable> {
        let mut current = self.nodes.get(id)?;
        while let Some(parent) = current.parent.as_ref() {
            current = self.nodes.get(parent)?;
        }
        Some(current)
    }

    /// Depth-first walk in declared order, with depth relative to `id`
    pub fn walk(&self, id: &RunnableId, selected: &[SuiteOption]) -> Vec<(usize, &Runnable)> {
        let mut nodes = Vec::new();
        if let Some(root) = self.nodes.get(id) {
            self.walk_into(root, 0, selected, &mut nodes);
        }
        nodes
    }

    fn walk_into<'a>(
        &'a self,
        node: &'a Runnable,
        depth: usize,
        selected: &[SuiteOption],
        nodes: &mut Vec<(usize, &'a Runnable)>,
    ) {
        nodes.push((depth, node));
        for child in self.children(&node.id, selected) {
            self.walk_into(child, depth + 1, selected, nodes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_suite() -> SuiteDefinition {
        SuiteDefinition::new("suite", "Sample Suite")
            .group(
                GroupDefinition::new("g1", "Group 1")
                    .test(TestDefinition::new("t1", "Test 1"))
                    .test(TestDefinition::new("t2", "Test 2").requires_option("launch", "ehr")),
            )
            .group(
                GroupDefinition::new("g2", "Group 2")
                    .run_as_group()
                    .test(TestDefinition::new("t3", "Test 3")),
            )
    }

    #[test]
    fn test_tree_links_parents_by_id() {
        let tree = RunnableTree::from_suites(vec![sample_suite()]).unwrap();
        assert_eq!(tree.len(), 6);

        let t1 = tree.resolve("t1").unwrap();
        assert_eq!(t1.parent, Some(RunnableId::new("g1")));
        assert_eq!(tree.parent(&t1.id).unwrap().id, RunnableId::new("g1"));
        assert_eq!(tree.suite_of(&t1.id).unwrap().id, RunnableId::new("suite"));
        assert_eq!(tree.suites().count(), 1);
    }

    #[test]
    fn test_children_filtered_by_options() {
        let tree = RunnableTree::from_suites(vec![sample_suite()]).unwrap();
        let g1 = RunnableId::new("g1");

        let unfiltered: Vec<_> = tree.children(&g1, &[]).iter().map(|r| r.id.clone()).collect();
        assert_eq!(unfiltered, vec![RunnableId::new("t1")]);

        let selected = vec![SuiteOption::new("launch", "ehr")];
        let filtered: Vec<_> = tree
            .children(&g1, &selected)
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(filtered, vec![RunnableId::new("t1"), RunnableId::new("t2")]);
    }

    #[test]
    fn test_run_as_group_children_not_user_runnable() {
        let tree = RunnableTree::from_suites(vec![sample_suite()]).unwrap();
        assert!(tree.resolve("g2").unwrap().user_runnable);
        assert!(!tree.resolve("t3").unwrap().user_runnable);
        assert!(tree.resolve("t1").unwrap().user_runnable);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let suite = SuiteDefinition::new("suite", "Dup")
            .test(TestDefinition::new("t1", "A"))
            .test(TestDefinition::new("t1", "B"));

        let err = RunnableTree::from_suites(vec![suite]).unwrap_err();
        assert_eq!(err, TreeError::DuplicateId(RunnableId::new("t1")));
    }

    #[test]
    fn test_walk_in_declared_order() {
        let tree = RunnableTree::from_suites(vec![sample_suite()]).unwrap();
        let ids: Vec<_> = tree
            .walk(&RunnableId::new("suite"), &[])
            .into_iter()
            .map(|(depth, node)| (depth, node.id.to_string()))
            .collect();

        assert_eq!(
            ids,
            vec![
                (0, "suite".to_string()),
                (1, "g1".to_string()),
                (2, "t1".to_string()),
                (1, "g2".to_string()),
                (2, "t3".to_string()),
            ]
        );
    }

    #[test]
    fn test_resolve_unknown() {
        let tree = RunnableTree::new();
        assert!(tree.is_empty());
        assert_eq!(
            tree.resolve("missing").unwrap_err(),
            TreeError::UnknownRunnable("missing".to_string())
        );
    }
}
