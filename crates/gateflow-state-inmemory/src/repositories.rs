use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;

use gateflow_core::{
    domain::history::HistoryEntry,
    domain::instance::{
        Assignment, InstanceId, InstanceStatus, ProjectId, UserId, WorkflowInstance,
    },
    domain::repository::{
        AssignmentRepository, HistoryRepository, InstanceRepository, TemplateRepository,
    },
    domain::template::{NodeId, TemplateId, WorkflowTemplate},
    EngineError,
};

/// In-memory implementation of the TemplateRepository
pub struct InMemoryTemplateRepository {
    templates: Arc<RwLock<HashMap<String, WorkflowTemplate>>>,
}

impl InMemoryTemplateRepository {
    /// Create a new in-memory template repository
    pub fn new() -> Self {
        Self {
            templates: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn find_by_id(&self, id: &TemplateId) -> Result<Option<WorkflowTemplate>, EngineError> {
        let templates = self.templates.read().await;
        Ok(templates.get(&id.0).cloned())
    }

    async fn save(&self, template: &WorkflowTemplate) -> Result<(), EngineError> {
        let mut templates = self.templates.write().await;
        templates.insert(template.id.0.clone(), template.clone());
        Ok(())
    }

    async fn delete(&self, id: &TemplateId) -> Result<(), EngineError> {
        let mut templates = self.templates.write().await;
        templates.remove(&id.0);
        Ok(())
    }

    async fn list_templates(&self) -> Result<Vec<TemplateId>, EngineError> {
        let templates = self.templates.read().await;
        Ok(templates.keys().map(|id| TemplateId(id.clone())).collect())
    }
}

/// In-memory implementation of the InstanceRepository
///
/// Uses concurrent maps to keep reads lock-free; a per-project index backs
/// the project queries.
pub struct InMemoryInstanceRepository {
    instances: Arc<DashMap<String, WorkflowInstance>>,
    project_index: Arc<DashMap<String, Vec<String>>>,
}

impl InMemoryInstanceRepository {
    /// Create a new in-memory instance repository
    pub fn new() -> Self {
        Self {
            instances: Arc::new(DashMap::with_capacity(64)),
            project_index: Arc::new(DashMap::with_capacity(16)),
        }
    }
}

impl Default for InMemoryInstanceRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, EngineError> {
        Ok(self.instances.get(&id.0).map(|instance| instance.clone()))
    }

    async fn save(&self, instance: &WorkflowInstance) -> Result<(), EngineError> {
        self.instances
            .insert(instance.id.0.clone(), instance.clone());

        let mut ids = self
            .project_index
            .entry(instance.project_id.0.clone())
            .or_default();
        if !ids.contains(&instance.id.0) {
            ids.push(instance.id.0.clone());
        }

        Ok(())
    }

    async fn find_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<WorkflowInstance>, EngineError> {
        let mut result = Vec::new();

        if let Some(ids) = self.project_index.get(&project_id.0) {
            for id in ids.iter() {
                if let Some(instance) = self.instances.get(id) {
                    result.push(instance.clone());
                }
            }
        }

        Ok(result)
    }

    async fn list_instances(
        &self,
        template_id: Option<&TemplateId>,
        status: Option<&InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, EngineError> {
        let result = self
            .instances
            .iter()
            .filter(|entry| {
                let instance = entry.value();

                let template_match = match template_id {
                    Some(id) => instance.template_id == *id,
                    None => true,
                };

                let status_match = match status {
                    Some(status) => instance.status == *status,
                    None => true,
                };

                template_match && status_match
            })
            .map(|entry| entry.value().clone())
            .collect();

        Ok(result)
    }
}

/// In-memory implementation of the HistoryRepository
pub struct InMemoryHistoryRepository {
    entries: Arc<DashMap<String, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryRepository {
    /// Create a new in-memory history repository
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryHistoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    async fn append(&self, entries: Vec<HistoryEntry>) -> Result<(), EngineError> {
        for entry in entries {
            self.entries
                .entry(entry.instance_id.0.clone())
                .or_default()
                .push(entry);
        }
        Ok(())
    }

    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<HistoryEntry>, EngineError> {
        Ok(self
            .entries
            .get(&instance_id.0)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }
}

/// In-memory implementation of the AssignmentRepository
pub struct InMemoryAssignmentRepository {
    by_step: Arc<DashMap<String, Vec<Assignment>>>,
}

impl InMemoryAssignmentRepository {
    /// Create a new in-memory assignment repository
    pub fn new() -> Self {
        Self {
            by_step: Arc::new(DashMap::new()),
        }
    }

    fn step_key(instance_id: &InstanceId, node_id: &NodeId) -> String {
        format!("{}:{}", instance_id.0, node_id.0)
    }
}

impl Default for InMemoryAssignmentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn replace_for_step(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
        users: Vec<UserId>,
    ) -> Result<(), EngineError> {
        let assignments = users
            .into_iter()
            .map(|user_id| Assignment {
                instance_id: instance_id.clone(),
                node_id: node_id.clone(),
                user_id,
            })
            .collect();

        self.by_step
            .insert(Self::step_key(instance_id, node_id), assignments);
        Ok(())
    }

    async fn clear_for_step(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        self.by_step.remove(&Self::step_key(instance_id, node_id));
        Ok(())
    }

    async fn clear_for_instance(&self, instance_id: &InstanceId) -> Result<(), EngineError> {
        let prefix = format!("{}:", instance_id.0);
        self.by_step.retain(|key, _| !key.starts_with(&prefix));
        debug!(instance_id = %instance_id.0, "Cleared instance assignments");
        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Assignment>, EngineError> {
        let result = self
            .by_step
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|assignment| &assignment.user_id == user_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(result)
    }

    async fn list_for_step(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
    ) -> Result<Vec<Assignment>, EngineError> {
        Ok(self
            .by_step
            .get(&Self::step_key(instance_id, node_id))
            .map(|assignments| assignments.clone())
            .unwrap_or_default())
    }
}
