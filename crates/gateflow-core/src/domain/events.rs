use crate::domain::approval::{ApprovalDecision, VoteDecision};
use crate::domain::instance::{InstanceId, UserId};
use crate::domain::template::{NodeId, TemplateId};
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for all events in the system
///
/// Events are delivered to the configured handler after the atomic region
/// commits; they are a notification seam, not the audit trail (that is the
/// history log).
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the workflow instance ID this event is associated with
    fn instance_id(&self) -> &InstanceId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Event: workflow instance started
#[derive(Debug)]
pub struct InstanceStarted {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The template the instance was started from
    pub template_id: TemplateId,

    /// The timestamp when the instance was created
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceStarted {
    fn event_type(&self) -> &'static str {
        "instance.started"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: a step became active and awaits action
#[derive(Debug)]
pub struct StepActivated {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The activated node
    pub node_id: NodeId,

    /// The timestamp when the step was activated
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for StepActivated {
    fn event_type(&self) -> &'static str {
        "step.activated"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: an active step completed and was retired
#[derive(Debug)]
pub struct StepCompleted {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The retired node
    pub node_id: NodeId,

    /// The acting user, when a person drove the completion
    pub actor_id: Option<UserId>,

    /// The timestamp when the step completed
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for StepCompleted {
    fn event_type(&self) -> &'static str {
        "step.completed"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: a vote was recorded on an approval node
#[derive(Debug)]
pub struct ApprovalVoteRecorded {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The approval node voted on
    pub node_id: NodeId,

    /// The voting user
    pub user_id: UserId,

    /// The cast decision
    pub decision: VoteDecision,

    /// The timestamp when the vote was recorded
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for ApprovalVoteRecorded {
    fn event_type(&self) -> &'static str {
        "approval.vote_recorded"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: an approval node resolved
#[derive(Debug)]
pub struct ApprovalResolved {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The resolved approval node
    pub node_id: NodeId,

    /// The resolution
    pub decision: ApprovalDecision,

    /// The timestamp when the node resolved
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for ApprovalResolved {
    fn event_type(&self) -> &'static str {
        "approval.resolved"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: workflow instance completed
#[derive(Debug)]
pub struct InstanceCompleted {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The timestamp when the instance completed
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceCompleted {
    fn event_type(&self) -> &'static str {
        "instance.completed"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: workflow instance cancelled
#[derive(Debug)]
pub struct InstanceCancelled {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The cancelling user
    pub actor_id: UserId,

    /// The timestamp when the instance was cancelled
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceCancelled {
    fn event_type(&self) -> &'static str {
        "instance.cancelled"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: an instance is parked on a node with no matching edge
///
/// Surfaced so operators can spot stuck workflows.
#[derive(Debug)]
pub struct InstanceParked {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The node the instance is parked on
    pub node_id: NodeId,

    /// Why the instance could not advance
    pub reason: String,

    /// The timestamp when the instance parked
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceParked {
    fn event_type(&self) -> &'static str {
        "instance.parked"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn create_test_instance_id() -> InstanceId {
        InstanceId(Uuid::new_v4().to_string())
    }

    #[test]
    fn test_instance_started_event() {
        let instance_id = create_test_instance_id();
        let timestamp = Utc::now();

        let event = InstanceStarted {
            instance_id: instance_id.clone(),
            template_id: TemplateId("tpl-1".to_string()),
            timestamp,
        };

        assert_eq!(event.event_type(), "instance.started");
        assert_eq!(event.instance_id(), &instance_id);
        assert_eq!(event.timestamp(), timestamp);
    }

    #[test]
    fn test_step_events() {
        let instance_id = create_test_instance_id();
        let timestamp = Utc::now();

        let activated = StepActivated {
            instance_id: instance_id.clone(),
            node_id: NodeId("review".to_string()),
            timestamp,
        };
        assert_eq!(activated.event_type(), "step.activated");

        let completed = StepCompleted {
            instance_id: instance_id.clone(),
            node_id: NodeId("review".to_string()),
            actor_id: Some(UserId("u1".to_string())),
            timestamp,
        };
        assert_eq!(completed.event_type(), "step.completed");
        assert_eq!(completed.instance_id(), &instance_id);
    }

    #[test]
    fn test_approval_resolved_event() {
        let instance_id = create_test_instance_id();

        let event = ApprovalResolved {
            instance_id: instance_id.clone(),
            node_id: NodeId("review".to_string()),
            decision: ApprovalDecision::Approved,
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "approval.resolved");
        assert_eq!(event.decision, ApprovalDecision::Approved);
    }

    #[test]
    fn test_instance_parked_event() {
        let instance_id = create_test_instance_id();

        let event = InstanceParked {
            instance_id: instance_id.clone(),
            node_id: NodeId("route".to_string()),
            reason: "no outgoing edge on port high".to_string(),
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "instance.parked");
        assert_eq!(event.instance_id(), &instance_id);
    }
}
