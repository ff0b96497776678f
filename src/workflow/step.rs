//! Step definitions and the handler contracts step authors implement.

use super::outcome::{StepError, StepOutcome};
use crate::backoff::RetryPolicy;
use crate::context::Context;
use crate::dag::DagNode;
use crate::resilience::RateLimitScope;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a step invocation can see
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: Uuid,
    pub workflow: String,
    pub step: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Pre-partition snapshot; identical for every step of a partition
    pub context: Arc<Context>,
    /// Payload supplied by `resume` after an `Await`
    pub resume_input: Option<Value>,
    cancellation: CancellationToken,
}

impl StepContext {
    pub fn new(
        execution_id: Uuid,
        workflow: impl Into<String>,
        step: impl Into<String>,
        attempt: u32,
        context: Arc<Context>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution_id,
            workflow: workflow.into(),
            step: step.into(),
            attempt,
            context,
            resume_input: None,
            cancellation,
        }
    }

    pub fn with_resume_input(mut self, input: Option<Value>) -> Self {
        self.resume_input = input;
        self
    }

    /// Long-running steps poll this between units of work
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// A unit of work inside a workflow
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, ctx: StepContext) -> StepOutcome;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    async fn run(&self, ctx: StepContext) -> StepOutcome {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`StepHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Undo logic for a completed step
#[async_trait]
pub trait Compensator: Send + Sync {
    /// `error` is the failure that triggered the rollback
    async fn compensate(&self, context: Arc<Context>, error: StepError) -> Result<(), StepError>;
}

struct RollbackFn<F>(F);

#[async_trait]
impl<F, Fut> Compensator for RollbackFn<F>
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    async fn compensate(&self, context: Arc<Context>, _error: StepError) -> Result<(), StepError> {
        (self.0)(context).await
    }
}

struct CompensateFn<F>(F);

#[async_trait]
impl<F, Fut> Compensator for CompensateFn<F>
where
    F: Fn(Arc<Context>, StepError) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    async fn compensate(&self, context: Arc<Context>, error: StepError) -> Result<(), StepError> {
        (self.0)(context, error).await
    }
}

pub type WhenPredicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;
pub type FallbackFn = Arc<dyn Fn(&Context, &StepError) -> StepOutcome + Send + Sync>;

/// Immutable step definition
#[derive(Clone)]
pub struct Step {
    name: String,
    handler: Arc<dyn StepHandler>,
    after: Vec<String>,
    after_any: Vec<String>,
    when: Option<WhenPredicate>,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    compensator: Option<Arc<dyn Compensator>>,
    circuit: Option<String>,
    rate_limits: Vec<RateLimitScope>,
    group: Option<String>,
    checkpoint: Option<String>,
    fallback: Option<FallbackFn>,
}

impl Step {
    pub fn new(name: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            after: Vec::new(),
            after_any: Vec::new(),
            when: None,
            timeout: None,
            retry: None,
            compensator: None,
            circuit: None,
            rate_limits: Vec::new(),
            group: None,
            checkpoint: None,
            fallback: None,
        }
    }

    /// Step backed by an async closure
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutcome> + Send + 'static,
    {
        Self::new(name, handler_fn(f))
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn after_any<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_any.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(predicate));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Rollback that only needs the context
    pub fn rollback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensator = Some(Arc::new(RollbackFn(f)));
        self
    }

    /// Compensation that also receives the triggering error
    pub fn compensate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Context>, StepError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensator = Some(Arc::new(CompensateFn(f)));
        self
    }

    pub fn compensator(mut self, compensator: Arc<dyn Compensator>) -> Self {
        self.compensator = Some(compensator);
        self
    }

    pub fn circuit(mut self, name: impl Into<String>) -> Self {
        self.circuit = Some(name.into());
        self
    }

    /// Add a rate-limit bucket; every listed bucket must admit the call
    pub fn rate_limit(mut self, scope: RateLimitScope) -> Self {
        if !self.rate_limits.contains(&scope) {
            self.rate_limits.push(scope);
        }
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Persist a checkpoint under `label` once this step completes
    pub fn checkpoint(mut self, label: impl Into<String>) -> Self {
        self.checkpoint = Some(label.into());
        self
    }

    pub fn fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &StepError) -> StepOutcome + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn StepHandler> {
        &self.handler
    }

    pub fn dependencies(&self) -> &[String] {
        &self.after
    }

    pub fn any_dependencies(&self) -> &[String] {
        &self.after_any
    }

    /// `true` when no predicate is set
    pub fn should_run(&self, context: &Context) -> bool {
        self.when.as_ref().map_or(true, |p| p(context))
    }

    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn compensation(&self) -> Option<&Arc<dyn Compensator>> {
        self.compensator.as_ref()
    }

    pub fn has_compensation(&self) -> bool {
        self.compensator.is_some()
    }

    pub fn circuit_name(&self) -> Option<&str> {
        self.circuit.as_deref()
    }

    pub fn rate_limits(&self) -> &[RateLimitScope] {
        &self.rate_limits
    }

    pub fn group_name(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn checkpoint_label(&self) -> Option<&str> {
        self.checkpoint.as_deref()
    }

    pub fn fallback_fn(&self) -> Option<&FallbackFn> {
        self.fallback.as_ref()
    }

    pub(crate) fn dag_node(&self) -> DagNode {
        DagNode {
            name: self.name.clone(),
            after: self.after.clone(),
            after_any: self.after_any.clone(),
            group: self.group.clone(),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("after_any", &self.after_any)
            .field("conditional", &self.when.is_some())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("compensated", &self.compensator.is_some())
            .field("circuit", &self.circuit)
            .field("rate_limits", &self.rate_limits)
            .field("group", &self.group)
            .field("checkpoint", &self.checkpoint)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
