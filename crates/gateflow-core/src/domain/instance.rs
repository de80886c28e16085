use crate::domain::approval::ApprovalState;
use crate::domain::events::{
    DomainEvent, InstanceCancelled, InstanceCompleted, InstanceStarted, StepActivated,
    StepCompleted,
};
use crate::domain::template::{ApprovalSettings, NodeId, TemplateId, TemplateSnapshot};
use crate::types::FactSet;
use crate::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Workflow instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Instance is running; at least one step is active
    Active,

    /// Instance reached an end node
    Completed,

    /// Instance was cancelled
    Cancelled,
}

impl InstanceStatus {
    /// Whether the status is terminal (soft-terminal; instances are retained)
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Cancelled)
    }

    /// Status name for messages and logs
    pub fn name(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "active",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Cancelled => "cancelled",
        }
    }
}

/// Value object: Instance ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

/// Value object: Project ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

/// Value object: User ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// A node currently awaiting action within a running instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveStep {
    /// The active node
    pub node_id: NodeId,

    /// When the node became active
    pub activated_at: DateTime<Utc>,
}

/// A resolved eligibility record for an active step
///
/// Purely a derived index for "my work" queries; never part of the state
/// machine itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// The instance the step belongs to
    pub instance_id: InstanceId,

    /// The assigned node
    pub node_id: NodeId,

    /// The eligible user
    pub user_id: UserId,
}

/// Aggregate: a running execution of a template against one project
///
/// All mutation goes through the engine's atomic region; the aggregate
/// methods enforce status preconditions and record domain events, and the
/// embedded snapshot never changes after creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique identifier
    pub id: InstanceId,

    /// Template the snapshot was captured from
    pub template_id: TemplateId,

    /// Project the instance runs against
    pub project_id: ProjectId,

    /// Current status
    pub status: InstanceStatus,

    /// Frozen copy of the template graph
    pub snapshot: TemplateSnapshot,

    /// Currently active steps; empty only when terminal
    pub active_steps: Vec<ActiveStep>,

    /// Accumulated runtime facts (form values, approval decisions)
    pub facts: FactSet,

    /// Vote aggregation state per approval node
    pub approvals: HashMap<NodeId, ApprovalState>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Domain events
    #[serde(skip)]
    pub events: Vec<Box<dyn DomainEvent>>,
}

// Manually implement Clone for WorkflowInstance
impl Clone for WorkflowInstance {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            template_id: self.template_id.clone(),
            project_id: self.project_id.clone(),
            status: self.status,
            snapshot: self.snapshot.clone(),
            active_steps: self.active_steps.clone(),
            facts: self.facts.clone(),
            approvals: self.approvals.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            events: Vec::new(), // We don't clone domain events
        }
    }
}

impl WorkflowInstance {
    /// Create a new active instance from a frozen snapshot
    pub fn new(snapshot: TemplateSnapshot, project_id: ProjectId) -> Self {
        let instance_id = InstanceId(Uuid::new_v4().to_string());
        let template_id = snapshot.template_id.clone();
        let now = Utc::now();

        let mut instance = Self {
            id: instance_id.clone(),
            template_id: template_id.clone(),
            project_id,
            status: InstanceStatus::Active,
            snapshot,
            active_steps: Vec::new(),
            facts: FactSet::new(),
            approvals: HashMap::new(),
            created_at: now,
            updated_at: now,
            events: Vec::with_capacity(8),
        };

        instance.record_event(Box::new(InstanceStarted {
            instance_id,
            template_id,
            timestamp: now,
        }));

        instance
    }

    /// Update the timestamp
    #[inline]
    pub fn update_timestamp(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check if a node is currently active
    #[inline]
    pub fn is_step_active(&self, node_id: &NodeId) -> bool {
        self.active_steps.iter().any(|step| &step.node_id == node_id)
    }

    /// Get the active step for a node
    pub fn active_step(&self, node_id: &NodeId) -> Option<&ActiveStep> {
        self.active_steps.iter().find(|step| &step.node_id == node_id)
    }

    /// Activate a step
    ///
    /// Re-activating an already active node is a no-op, so a fan-in does not
    /// produce duplicate active steps.
    pub fn activate_step(&mut self, node_id: NodeId, at: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != InstanceStatus::Active {
            return Err(EngineError::InstanceAlreadyTerminal(format!(
                "instance {} is {}",
                self.id.0,
                self.status.name()
            )));
        }

        if self.is_step_active(&node_id) {
            return Ok(());
        }

        self.active_steps.push(ActiveStep {
            node_id: node_id.clone(),
            activated_at: at,
        });

        self.record_event(Box::new(StepActivated {
            instance_id: self.id.clone(),
            node_id,
            timestamp: at,
        }));

        self.update_timestamp();
        Ok(())
    }

    /// Retire an active step after its completion
    pub fn retire_step(&mut self, node_id: &NodeId, actor_id: Option<&UserId>) {
        let before = self.active_steps.len();
        self.active_steps.retain(|step| &step.node_id != node_id);

        if self.active_steps.len() != before {
            self.record_event(Box::new(StepCompleted {
                instance_id: self.id.clone(),
                node_id: node_id.clone(),
                actor_id: actor_id.cloned(),
                timestamp: Utc::now(),
            }));
            self.update_timestamp();
        }
    }

    /// Complete the instance after reaching an end node
    pub fn complete(&mut self) -> Result<(), EngineError> {
        if self.status != InstanceStatus::Active {
            return Err(EngineError::InstanceAlreadyTerminal(format!(
                "instance {} is {}",
                self.id.0,
                self.status.name()
            )));
        }

        self.status = InstanceStatus::Completed;
        self.active_steps.clear();

        self.record_event(Box::new(InstanceCompleted {
            instance_id: self.id.clone(),
            timestamp: Utc::now(),
        }));

        self.update_timestamp();
        Ok(())
    }

    /// Cancel the instance, returning the steps that were cleared
    pub fn cancel(&mut self, actor_id: UserId) -> Result<Vec<ActiveStep>, EngineError> {
        if self.status != InstanceStatus::Active {
            return Err(EngineError::InstanceAlreadyTerminal(format!(
                "instance {} is {}",
                self.id.0,
                self.status.name()
            )));
        }

        self.status = InstanceStatus::Cancelled;
        let cleared = std::mem::take(&mut self.active_steps);

        self.record_event(Box::new(InstanceCancelled {
            instance_id: self.id.clone(),
            actor_id,
            timestamp: Utc::now(),
        }));

        self.update_timestamp();
        Ok(cleared)
    }

    /// Voting state for an approval node, created from its settings on first use
    pub fn approval_state_mut(
        &mut self,
        node_id: &NodeId,
        settings: &ApprovalSettings,
    ) -> &mut ApprovalState {
        self.approvals
            .entry(node_id.clone())
            .or_insert_with(|| ApprovalState::from_settings(settings))
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Get and clear all domain events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }
}
