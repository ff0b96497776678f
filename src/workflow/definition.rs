//! Immutable workflow definitions and their builder.

use super::step::Step;
use crate::backoff::RetryPolicy;
use crate::context::Context;
use crate::dag::{Dag, DagError, Partition};
use crate::state_machine::ExecutionState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Failure handling for steps running side by side in one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    /// Cancel siblings and roll back on the first failure
    #[default]
    FailFast,
    /// Let every sibling finish, then roll back with all errors
    CollectAll,
    /// Record failures and keep going with partial results
    Continue,
}

/// Cleanup callback run once an execution settles
pub type EnsureHook = Arc<dyn Fn(&Context, ExecutionState) + Send + Sync>;

/// Workflow-wide options
#[derive(Debug, Clone, Default)]
pub struct WorkflowOptions {
    pub total_timeout: Option<Duration>,
    pub default_step_timeout: Option<Duration>,
    pub default_retry: Option<RetryPolicy>,
    pub default_group_policy: GroupPolicy,
    pub tags: Vec<String>,
}

/// Validated, immutable workflow
pub struct Workflow {
    name: String,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    dag: Dag,
    options: WorkflowOptions,
    group_policies: HashMap<String, GroupPolicy>,
    ensure: Vec<EnsureHook>,
}

impl Workflow {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in declaration order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn execution_order(&self) -> &[Partition] {
        self.dag.execution_order()
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    pub fn tags(&self) -> &[String] {
        &self.options.tags
    }

    /// Policy for a step's group, or the workflow default for ungrouped steps
    pub fn group_policy(&self, group: Option<&str>) -> GroupPolicy {
        group
            .and_then(|g| self.group_policies.get(g).copied())
            .unwrap_or(self.options.default_group_policy)
    }

    /// Timeout for a step, falling back to the workflow default
    pub fn step_timeout(&self, step: &Step) -> Option<Duration> {
        step.timeout_value().or(self.options.default_step_timeout)
    }

    /// Explicit retry policy for a step, falling back to the workflow default
    pub fn step_retry<'a>(&'a self, step: &'a Step) -> Option<&'a RetryPolicy> {
        step.retry_policy().or(self.options.default_retry.as_ref())
    }

    pub fn ensure_hooks(&self) -> &[EnsureHook] {
        &self.ensure
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("options", &self.options)
            .field("group_policies", &self.group_policies)
            .field("ensure_hooks", &self.ensure.len())
            .finish()
    }
}

/// Registration-time builder; `build` validates the graph exactly once
pub struct WorkflowBuilder {
    name: String,
    steps: Vec<Step>,
    options: WorkflowOptions,
    group_policies: HashMap<String, GroupPolicy>,
    ensure: Vec<EnsureHook>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            options: WorkflowOptions::default(),
            group_policies: HashMap::new(),
            ensure: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.options.total_timeout = Some(timeout);
        self
    }

    pub fn default_step_timeout(mut self, timeout: Duration) -> Self {
        self.options.default_step_timeout = Some(timeout);
        self
    }

    pub fn default_retry(mut self, policy: RetryPolicy) -> Self {
        self.options.default_retry = Some(policy);
        self
    }

    pub fn default_group_policy(mut self, policy: GroupPolicy) -> Self {
        self.options.default_group_policy = policy;
        self
    }

    pub fn group_policy(mut self, group: impl Into<String>, policy: GroupPolicy) -> Self {
        self.group_policies.insert(group.into(), policy);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.options.tags.push(tag.into());
        self
    }

    pub fn ensure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, ExecutionState) + Send + Sync + 'static,
    {
        self.ensure.push(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Workflow, DagError> {
        let dag = Dag::build(self.steps.iter().map(Step::dag_node).collect())?;
        let index = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name().to_string(), i))
            .collect();

        Ok(Workflow {
            name: self.name,
            steps: self.steps,
            index,
            dag,
            options: self.options,
            group_policies: self.group_policies,
            ensure: self.ensure,
        })
    }
}
