use crate::application::access::AccessResolver;
use crate::domain::approval::{VoteDecision, VoteOutcome};
use crate::domain::condition::evaluate_rules;
use crate::domain::events::{ApprovalResolved, ApprovalVoteRecorded, DomainEvent, InstanceParked};
use crate::domain::history::HistoryEntry;
use crate::domain::instance::{
    ActiveStep, Assignment, InstanceId, InstanceStatus, ProjectId, UserId, WorkflowInstance,
};
use crate::domain::repository::{
    AssignmentRepository, HistoryRepository, InstanceRepository, TemplateRepository,
};
use crate::domain::template::{
    NodeDefinition, NodeId, NodeKind, OutputPort, TemplateId, TemplateSnapshot,
};
use crate::EngineError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Handler for domain events
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), EngineError>;
}

/// Event handler that logs each event; default wiring for development
pub struct TracingEventHandler;

#[async_trait]
impl DomainEventHandler for TracingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), EngineError> {
        debug!(
            instance_id = %event.instance_id().0,
            event_type = %event.event_type(),
            "Domain event"
        );
        Ok(())
    }
}

/// Net effect of one committed transition, applied after the atomic region
#[derive(Debug, Default)]
struct TransitionEffects {
    /// Newly activated steps with their entity references
    activated: Vec<(NodeId, Option<String>)>,

    /// Steps retired by the transition
    deactivated: Vec<NodeId>,

    /// The instance reached a terminal status
    terminal: bool,

    /// The instance is parked on a node whose resolved port has no edge
    parked: Option<(NodeId, String)>,
}

/// The transition engine and instance manager
///
/// All instance mutation flows through the engine's commands. Each command
/// wraps its read-check-mutate-persist sequence in a per-instance atomic
/// region (an async mutex), so two concurrent completions of the same active
/// step serialize: one wins, the other observes `NodeNotActive` after the
/// winner commits. Assignment resolution and domain event delivery run after
/// the region commits, never while the lock is held.
pub struct WorkflowEngine {
    /// Repository for templates
    template_repo: Arc<dyn TemplateRepository>,

    /// Repository for instances
    instance_repo: Arc<dyn InstanceRepository>,

    /// Repository for the audit history
    history_repo: Arc<dyn HistoryRepository>,

    /// Repository for the derived assignment index
    assignment_repo: Arc<dyn AssignmentRepository>,

    /// Access-control collaborator
    access_resolver: Arc<dyn AccessResolver>,

    /// Event handler
    event_handler: Arc<dyn DomainEventHandler>,

    /// Per-instance serialization locks
    instance_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Clone for WorkflowEngine {
    fn clone(&self) -> Self {
        Self {
            template_repo: self.template_repo.clone(),
            instance_repo: self.instance_repo.clone(),
            history_repo: self.history_repo.clone(),
            assignment_repo: self.assignment_repo.clone(),
            access_resolver: self.access_resolver.clone(),
            event_handler: self.event_handler.clone(),
            instance_locks: self.instance_locks.clone(),
        }
    }
}

impl WorkflowEngine {
    /// Create a new workflow engine
    pub fn new(
        template_repo: Arc<dyn TemplateRepository>,
        instance_repo: Arc<dyn InstanceRepository>,
        history_repo: Arc<dyn HistoryRepository>,
        assignment_repo: Arc<dyn AssignmentRepository>,
        access_resolver: Arc<dyn AccessResolver>,
        event_handler: Arc<dyn DomainEventHandler>,
    ) -> Self {
        Self {
            template_repo,
            instance_repo,
            history_repo,
            assignment_repo,
            access_resolver,
            event_handler,
            instance_locks: Arc::new(DashMap::new()),
        }
    }

    /// Start a new instance from a template
    ///
    /// Snapshots and validates the template (an invalid template refuses
    /// instance creation), then immediately drives the virtual "start node
    /// completed" transition: start nodes carry no action, they exist purely
    /// as an entry marker.
    pub async fn start_instance(
        &self,
        template_id: &TemplateId,
        project_id: &ProjectId,
    ) -> Result<InstanceId, EngineError> {
        let template = self
            .template_repo
            .find_by_id(template_id)
            .await?
            .ok_or_else(|| EngineError::TemplateNotFound(template_id.0.clone()))?;

        let snapshot = TemplateSnapshot::capture(&template)?;
        let mut instance = WorkflowInstance::new(snapshot, project_id.clone());

        let start_id = instance
            .snapshot
            .start_node()
            .map(|node| node.id.clone())
            .ok_or_else(|| {
                EngineError::ExecutionError("validated snapshot has no start node".to_string())
            })?;

        info!(
            instance_id = %instance.id.0,
            template_id = %template_id.0,
            project_id = %project_id.0,
            "Starting workflow instance"
        );

        instance.activate_step(start_id.clone(), Utc::now())?;

        let mut history = Vec::new();
        let effects = advance_instance(
            &mut instance,
            &start_id,
            OutputPort::Default,
            None,
            None,
            &mut history,
        )?;

        self.instance_repo.save(&instance).await?;
        if !history.is_empty() {
            self.history_repo.append(history).await?;
        }

        // A parked start is a stuck-workflow condition, not a failed command:
        // the instance exists and is surfaced through the parked event.
        let instance_id = instance.id.clone();
        self.apply_post_commit(&mut instance, effects).await;

        Ok(instance_id)
    }

    /// Complete an active role step
    pub async fn complete_role_step(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
        actor_id: &UserId,
    ) -> Result<(), EngineError> {
        let node = self.node_definition(instance_id, node_id).await?;
        self.check_permission(actor_id, node.entity_ref.as_deref())
            .await?;

        let guard = self.lock_for(instance_id).lock_owned().await;
        let mut instance = self.load_active_instance(instance_id).await?;
        self.require_active_step(&instance, node_id)?;

        if !matches!(node.kind, NodeKind::Role) {
            return Err(EngineError::NodeKindMismatch(format!(
                "node {} is a {} step, not a role step",
                node_id.0,
                node.kind.type_name()
            )));
        }

        debug!(
            instance_id = %instance_id.0,
            node_id = %node_id.0,
            actor_id = %actor_id.0,
            "Completing role step"
        );

        let mut history = Vec::new();
        let effects = advance_instance(
            &mut instance,
            node_id,
            OutputPort::Default,
            Some(actor_id),
            None,
            &mut history,
        )?;

        self.commit(guard, instance, history, effects).await
    }

    /// Submit the field values of an active form step
    pub async fn submit_form(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
        actor_id: &UserId,
        values: HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        let node = self.node_definition(instance_id, node_id).await?;
        self.check_permission(actor_id, node.entity_ref.as_deref())
            .await?;

        let guard = self.lock_for(instance_id).lock_owned().await;
        let mut instance = self.load_active_instance(instance_id).await?;
        self.require_active_step(&instance, node_id)?;

        let settings = match &node.kind {
            NodeKind::Form(settings) => settings,
            other => {
                return Err(EngineError::NodeKindMismatch(format!(
                    "node {} is a {} step, not a form step",
                    node_id.0,
                    other.type_name()
                )))
            }
        };
        settings.validate_values(&values)?;

        debug!(
            instance_id = %instance_id.0,
            node_id = %node_id.0,
            actor_id = %actor_id.0,
            field_count = values.len(),
            "Submitting form"
        );

        instance.facts.merge(values);

        let mut history = Vec::new();
        let effects = advance_instance(
            &mut instance,
            node_id,
            OutputPort::Default,
            Some(actor_id),
            None,
            &mut history,
        )?;

        self.commit(guard, instance, history, effects).await
    }

    /// Record a vote on an active approval step
    ///
    /// Votes are inserted if absent per (instance, node, user) and the
    /// threshold is re-checked after the insert, so two votes crossing it
    /// together resolve the node exactly once. A resolved node that is still
    /// parked accepts further votes for audit without re-triggering.
    pub async fn record_approval_vote(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
        actor_id: &UserId,
        decision: VoteDecision,
        comment: Option<String>,
    ) -> Result<(), EngineError> {
        let node = self.node_definition(instance_id, node_id).await?;
        self.check_permission(actor_id, node.entity_ref.as_deref())
            .await?;

        let guard = self.lock_for(instance_id).lock_owned().await;
        let mut instance = self.load_active_instance(instance_id).await?;
        self.require_active_step(&instance, node_id)?;

        let settings = match &node.kind {
            NodeKind::Approval(settings) => settings.clone(),
            other => {
                return Err(EngineError::NodeKindMismatch(format!(
                    "node {} is a {} step, not an approval step",
                    node_id.0,
                    other.type_name()
                )))
            }
        };

        debug!(
            instance_id = %instance_id.0,
            node_id = %node_id.0,
            actor_id = %actor_id.0,
            "Recording approval vote"
        );

        let now = Utc::now();
        let outcome = instance
            .approval_state_mut(node_id, &settings)
            .record_vote(actor_id.clone(), decision, comment, now)?;

        instance.record_event(Box::new(ApprovalVoteRecorded {
            instance_id: instance.id.clone(),
            node_id: node_id.clone(),
            user_id: actor_id.clone(),
            decision,
            timestamp: now,
        }));

        match outcome {
            VoteOutcome::Recorded | VoteOutcome::AlreadyResolved(_) => {
                // The vote is audit state; persist it without a transition.
                instance.update_timestamp();
                self.commit(guard, instance, Vec::new(), TransitionEffects::default())
                    .await
            }
            VoteOutcome::Resolved(resolution) => {
                instance.record_event(Box::new(ApprovalResolved {
                    instance_id: instance.id.clone(),
                    node_id: node_id.clone(),
                    decision: resolution,
                    timestamp: now,
                }));
                instance.facts.insert(
                    format!("{}.decision", node_id.0),
                    Value::String(resolution.fact_value().to_string()),
                );

                let mut history = Vec::new();
                let effects = advance_instance(
                    &mut instance,
                    node_id,
                    resolution.port(),
                    Some(actor_id),
                    Some(resolution.fact_value().to_string()),
                    &mut history,
                )?;

                self.commit(guard, instance, history, effects).await
            }
        }
    }

    /// Cancel an active instance
    pub async fn cancel_instance(
        &self,
        instance_id: &InstanceId,
        actor_id: &UserId,
    ) -> Result<(), EngineError> {
        let guard = self.lock_for(instance_id).lock_owned().await;
        let mut instance = self.load_instance(instance_id).await?;

        let cleared = instance.cancel(actor_id.clone())?;

        info!(
            instance_id = %instance_id.0,
            actor_id = %actor_id.0,
            "Cancelling workflow instance"
        );

        let now = Utc::now();
        let history = cleared
            .iter()
            .map(|step| HistoryEntry {
                instance_id: instance.id.clone(),
                node_id: step.node_id.clone(),
                actor_id: Some(actor_id.clone()),
                decision: Some("cancelled".to_string()),
                recorded_at: now,
            })
            .collect();

        let effects = TransitionEffects {
            activated: Vec::new(),
            deactivated: cleared.into_iter().map(|step| step.node_id).collect(),
            terminal: true,
            parked: None,
        };

        self.commit(guard, instance, history, effects).await
    }

    /// The currently active steps of an instance
    pub async fn get_active_steps(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ActiveStep>, EngineError> {
        Ok(self.load_instance(instance_id).await?.active_steps)
    }

    /// The audit history of an instance, in append order
    pub async fn get_history(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<HistoryEntry>, EngineError> {
        self.load_instance(instance_id).await?;
        self.history_repo.list_for_instance(instance_id).await
    }

    /// All assignments of a user ("my work")
    pub async fn get_assignments_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Assignment>, EngineError> {
        self.assignment_repo.list_for_user(user_id).await
    }

    /// The status of an instance
    pub async fn get_instance_status(
        &self,
        instance_id: &InstanceId,
    ) -> Result<InstanceStatus, EngineError> {
        Ok(self.load_instance(instance_id).await?.status)
    }

    /// The serialization lock of an instance
    fn lock_for(&self, instance_id: &InstanceId) -> Arc<Mutex<()>> {
        self.instance_locks
            .entry(instance_id.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn load_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<WorkflowInstance, EngineError> {
        self.instance_repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.0.clone()))
    }

    async fn load_active_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<WorkflowInstance, EngineError> {
        let instance = self.load_instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Err(EngineError::InstanceAlreadyTerminal(format!(
                "instance {} is {}",
                instance.id.0,
                instance.status.name()
            )));
        }
        Ok(instance)
    }

    /// Look up a node in an instance's frozen snapshot
    async fn node_definition(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
    ) -> Result<NodeDefinition, EngineError> {
        let instance = self.load_instance(instance_id).await?;
        instance.snapshot.node(node_id).cloned().ok_or_else(|| {
            EngineError::NodeNotActive(format!(
                "node {} is not part of instance {}",
                node_id.0, instance_id.0
            ))
        })
    }

    fn require_active_step(
        &self,
        instance: &WorkflowInstance,
        node_id: &NodeId,
    ) -> Result<(), EngineError> {
        if instance.is_step_active(node_id) {
            Ok(())
        } else {
            Err(EngineError::NodeNotActive(format!(
                "node {} is not active for instance {}",
                node_id.0, instance.id.0
            )))
        }
    }

    async fn check_permission(
        &self,
        actor_id: &UserId,
        entity_ref: Option<&str>,
    ) -> Result<(), EngineError> {
        match entity_ref {
            None => Ok(()),
            Some(entity_ref) => {
                if self.access_resolver.may_act(actor_id, entity_ref).await? {
                    Ok(())
                } else {
                    Err(EngineError::PermissionDenied(format!(
                        "user {} may not act on entity {}",
                        actor_id.0, entity_ref
                    )))
                }
            }
        }
    }

    /// Persist the transition, release the atomic region, and surface effects
    ///
    /// A parked transition commits whatever state legitimately accrued (votes,
    /// facts, partial hops) and then reports `NoMatchingEdge` to the caller.
    async fn commit(
        &self,
        guard: OwnedMutexGuard<()>,
        mut instance: WorkflowInstance,
        history: Vec<HistoryEntry>,
        effects: TransitionEffects,
    ) -> Result<(), EngineError> {
        self.instance_repo.save(&instance).await?;
        if !history.is_empty() {
            self.history_repo.append(history).await?;
        }

        // Event delivery and assignment resolution stay outside the atomic region.
        drop(guard);

        let parked = effects.parked.clone();
        self.apply_post_commit(&mut instance, effects).await;

        match parked {
            Some((_, reason)) => Err(EngineError::NoMatchingEdge(reason)),
            None => Ok(()),
        }
    }

    /// Post-commit side effects; failures here are logged, never propagated
    async fn apply_post_commit(&self, instance: &mut WorkflowInstance, effects: TransitionEffects) {
        for event in instance.take_events() {
            if let Err(error) = self.event_handler.handle_event(event).await {
                warn!(
                    instance_id = %instance.id.0,
                    error = %error,
                    "Domain event handler failed"
                );
            }
        }

        for node_id in &effects.deactivated {
            if let Err(error) = self
                .assignment_repo
                .clear_for_step(&instance.id, node_id)
                .await
            {
                warn!(
                    instance_id = %instance.id.0,
                    node_id = %node_id.0,
                    error = %error,
                    "Failed to clear step assignments"
                );
            }
        }

        if effects.terminal {
            if let Err(error) = self.assignment_repo.clear_for_instance(&instance.id).await {
                warn!(
                    instance_id = %instance.id.0,
                    error = %error,
                    "Failed to clear instance assignments"
                );
            }
            return;
        }

        let mut pending = Vec::new();
        for (node_id, entity_ref) in &effects.activated {
            if let Some(entity_ref) = entity_ref {
                pending.push(async move {
                    (
                        node_id,
                        self.access_resolver.resolve_assignees(entity_ref).await,
                    )
                });
            }
        }

        for (node_id, resolved) in join_all(pending).await {
            match resolved {
                Ok(users) => {
                    if let Err(error) = self
                        .assignment_repo
                        .replace_for_step(&instance.id, node_id, users)
                        .await
                    {
                        warn!(
                            instance_id = %instance.id.0,
                            node_id = %node_id.0,
                            error = %error,
                            "Failed to store step assignments"
                        );
                    }
                }
                Err(error) => {
                    warn!(
                        instance_id = %instance.id.0,
                        node_id = %node_id.0,
                        error = %error,
                        "Assignment resolution failed"
                    );
                }
            }
        }
    }
}

/// Advance an instance after `from` produced `port`
///
/// Walks the graph synchronously through pass-through nodes (conditionals,
/// end markers) until it reaches a node requiring human action or the
/// instance completes, so instances never park on nodes nobody can act on.
/// One history entry is buffered per retired node; the acting user and
/// decision only apply to the first hop.
fn advance_instance(
    instance: &mut WorkflowInstance,
    from: &NodeId,
    port: OutputPort,
    actor_id: Option<&UserId>,
    decision: Option<String>,
    history: &mut Vec<HistoryEntry>,
) -> Result<TransitionEffects, EngineError> {
    let mut effects = TransitionEffects::default();
    let mut current = from.clone();
    let mut current_port = port;
    let mut current_actor = actor_id.cloned();
    let mut current_decision = decision;
    // Pass-through chains are bounded by the node count; only a malformed
    // all-conditional cycle can exceed it.
    let mut hops_left = instance.snapshot.node_count() + 1;

    loop {
        if hops_left == 0 {
            return Err(EngineError::ExecutionError(format!(
                "pass-through transition loop detected in instance {}",
                instance.id.0
            )));
        }
        hops_left -= 1;

        let edge = match instance.snapshot.resolve_edge(&current, &current_port) {
            Some(edge) => edge.clone(),
            None => {
                let reason = format!(
                    "node {} has no outgoing edge on port {}",
                    current.0,
                    current_port.label()
                );
                warn!(
                    instance_id = %instance.id.0,
                    node_id = %current.0,
                    port = %current_port.label(),
                    "No outgoing edge for resolved port; instance stays parked"
                );
                instance.record_event(Box::new(InstanceParked {
                    instance_id: instance.id.clone(),
                    node_id: current.clone(),
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                }));
                effects.parked = Some((current, reason));
                return Ok(effects);
            }
        };

        instance.retire_step(&current, current_actor.as_ref());
        effects.deactivated.push(current.clone());
        history.push(HistoryEntry {
            instance_id: instance.id.clone(),
            node_id: current.clone(),
            actor_id: current_actor.clone(),
            decision: current_decision.clone(),
            recorded_at: Utc::now(),
        });

        let target = instance
            .snapshot
            .node(&edge.target)
            .cloned()
            .ok_or_else(|| {
                EngineError::ExecutionError(format!(
                    "edge target {} is missing from the snapshot",
                    edge.target.0
                ))
            })?;

        let now = Utc::now();
        match &target.kind {
            NodeKind::End => {
                history.push(HistoryEntry {
                    instance_id: instance.id.clone(),
                    node_id: target.id.clone(),
                    actor_id: None,
                    decision: None,
                    recorded_at: now,
                });
                instance.complete()?;
                effects.terminal = true;
                return Ok(effects);
            }
            NodeKind::Conditional(settings) => {
                instance.activate_step(target.id.clone(), now)?;
                match evaluate_rules(settings, &instance.facts) {
                    Ok(next_port) => {
                        current = target.id.clone();
                        current_port = next_port;
                        current_actor = None;
                        current_decision = Some(current_port.label().to_string());
                    }
                    Err(EngineError::NoMatchingEdge(_)) => {
                        let reason = format!(
                            "no rule matched on conditional node {} and no default port is declared",
                            target.id.0
                        );
                        warn!(
                            instance_id = %instance.id.0,
                            node_id = %target.id.0,
                            "No conditional rule matched; instance stays parked"
                        );
                        instance.record_event(Box::new(InstanceParked {
                            instance_id: instance.id.clone(),
                            node_id: target.id.clone(),
                            reason: reason.clone(),
                            timestamp: now,
                        }));
                        effects.parked = Some((target.id.clone(), reason));
                        return Ok(effects);
                    }
                    Err(other) => return Err(other),
                }
            }
            NodeKind::Start => {
                return Err(EngineError::ExecutionError(format!(
                    "start node {} cannot be a transition target",
                    target.id.0
                )));
            }
            NodeKind::Approval(_) => {
                // A re-entered approval node starts a fresh voting round.
                instance.approvals.remove(&target.id);
                instance.activate_step(target.id.clone(), now)?;
                effects
                    .activated
                    .push((target.id.clone(), target.entity_ref.clone()));
                return Ok(effects);
            }
            NodeKind::Role | NodeKind::Form(_) => {
                instance.activate_step(target.id.clone(), now)?;
                effects
                    .activated
                    .push((target.id.clone(), target.entity_ref.clone()));
                return Ok(effects);
            }
        }
    }
}
