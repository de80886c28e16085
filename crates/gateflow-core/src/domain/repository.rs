//! Repository traits for the Gateflow core
//!
//! This module defines the persistence interfaces the engine runs against.
//! External crates implement these traits to provide different storage
//! mechanisms; the store is responsible for the durability and atomicity of
//! a single save/append, while the engine serializes all mutations of one
//! instance behind its per-instance atomic region.

use async_trait::async_trait;

use super::history::HistoryEntry;
use super::instance::{Assignment, InstanceId, InstanceStatus, ProjectId, UserId, WorkflowInstance};
use super::template::{NodeId, TemplateId, WorkflowTemplate};
use crate::EngineError;

/// Repository for workflow templates
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Find a template by ID
    async fn find_by_id(&self, id: &TemplateId) -> Result<Option<WorkflowTemplate>, EngineError>;

    /// Save a template
    async fn save(&self, template: &WorkflowTemplate) -> Result<(), EngineError>;

    /// Delete a template
    async fn delete(&self, id: &TemplateId) -> Result<(), EngineError>;

    /// List all template IDs
    async fn list_templates(&self) -> Result<Vec<TemplateId>, EngineError>;
}

/// Repository for workflow instances
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Find an instance by ID
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, EngineError>;

    /// Save an instance
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), EngineError>;

    /// Find all instances for a project
    async fn find_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<WorkflowInstance>, EngineError>;

    /// List instances with optional filters
    async fn list_instances(
        &self,
        template_id: Option<&TemplateId>,
        status: Option<&InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, EngineError>;
}

/// Repository for the append-only transition history
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Append a batch of entries, preserving order
    async fn append(&self, entries: Vec<HistoryEntry>) -> Result<(), EngineError>;

    /// List all entries for an instance in append order
    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<HistoryEntry>, EngineError>;
}

/// Repository for the derived assignment index
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Replace the assignments of one active step
    async fn replace_for_step(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
        users: Vec<UserId>,
    ) -> Result<(), EngineError>;

    /// Remove the assignments of one step
    async fn clear_for_step(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
    ) -> Result<(), EngineError>;

    /// Remove all assignments of an instance
    async fn clear_for_instance(&self, instance_id: &InstanceId) -> Result<(), EngineError>;

    /// List all assignments of a user ("my work")
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Assignment>, EngineError>;

    /// List the assignments of one step
    async fn list_for_step(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
    ) -> Result<Vec<Assignment>, EngineError>;
}
