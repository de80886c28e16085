//! In-memory state store implementation for the Gateflow platform
//!
//! This crate provides in-memory implementations of the repository
//! interfaces defined in the gateflow-core crate. It is primarily useful for
//! development, testing, and simple deployments where persistence is not
//! required.

use std::sync::Arc;

pub mod repositories;
pub use repositories::{
    InMemoryAssignmentRepository, InMemoryHistoryRepository, InMemoryInstanceRepository,
    InMemoryTemplateRepository,
};

use gateflow_core::domain::repository::{
    AssignmentRepository, HistoryRepository, InstanceRepository, TemplateRepository,
};

/// Provider bundling the in-memory repositories behind one handle
pub struct InMemoryStateStore {
    templates: Arc<InMemoryTemplateRepository>,
    instances: Arc<InMemoryInstanceRepository>,
    history: Arc<InMemoryHistoryRepository>,
    assignments: Arc<InMemoryAssignmentRepository>,
}

impl InMemoryStateStore {
    /// Create a new in-memory state store
    pub fn new() -> Self {
        Self {
            templates: Arc::new(InMemoryTemplateRepository::new()),
            instances: Arc::new(InMemoryInstanceRepository::new()),
            history: Arc::new(InMemoryHistoryRepository::new()),
            assignments: Arc::new(InMemoryAssignmentRepository::new()),
        }
    }

    /// Repository handles for wiring a `WorkflowEngine`
    pub fn repositories(
        &self,
    ) -> (
        Arc<dyn TemplateRepository>,
        Arc<dyn InstanceRepository>,
        Arc<dyn HistoryRepository>,
        Arc<dyn AssignmentRepository>,
    ) {
        (
            self.templates.clone(),
            self.instances.clone(),
            self.history.clone(),
            self.assignments.clone(),
        )
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}
