//! Process-wide workflow registry keyed by name.

use super::definition::Workflow;
use crate::error::{Result, SagaflowError};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Concurrent map of registered workflows
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: DashMap<String, Arc<Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new workflow; names are unique
    pub fn register(&self, workflow: Workflow) -> Result<Arc<Workflow>> {
        let name = workflow.name().to_string();
        let workflow = Arc::new(workflow);
        match self.workflows.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SagaflowError::WorkflowAlreadyRegistered(name))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&workflow));
                info!(workflow = %name, steps = workflow.steps().len(), "📋 Registered workflow");
                Ok(workflow)
            }
        }
    }

    /// Register or replace; in-flight executions keep their old definition
    pub fn upsert(&self, workflow: Workflow) -> Arc<Workflow> {
        let name = workflow.name().to_string();
        let workflow = Arc::new(workflow);
        if self.workflows.insert(name.clone(), Arc::clone(&workflow)).is_some() {
            debug!(workflow = %name, "Replaced workflow definition");
        }
        workflow
    }

    pub fn get(&self, name: &str) -> Result<Arc<Workflow>> {
        self.workflows
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SagaflowError::WorkflowNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<Workflow>> {
        self.workflows.remove(name).map(|(_, wf)| wf)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Step, StepOutcome};

    fn workflow(name: &str) -> Workflow {
        Workflow::builder(name)
            .step(Step::from_fn("only", |_ctx| async { StepOutcome::done() }))
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = WorkflowRegistry::new();
        registry.register(workflow("billing")).unwrap();
        registry.register(workflow("audit")).unwrap();

        assert_eq!(registry.get("billing").unwrap().name(), "billing");
        assert_eq!(registry.names(), vec!["audit", "billing"]);
        assert!(matches!(
            registry.get("missing"),
            Err(SagaflowError::WorkflowNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = WorkflowRegistry::new();
        registry.register(workflow("billing")).unwrap();
        assert_eq!(
            registry.register(workflow("billing")).unwrap_err(),
            SagaflowError::WorkflowAlreadyRegistered("billing".to_string())
        );

        registry.upsert(workflow("billing"));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("billing").is_some());
        assert!(registry.is_empty());
    }
}
