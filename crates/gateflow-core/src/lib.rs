//!
//! Gateflow Core - Workflow execution engine for the Gateflow Platform
//!
//! This crate defines the workflow engine: template graphs and their frozen
//! snapshots, running instances with their active steps, approval vote
//! aggregation, conditional routing, and the append-only transition history.
//! Persistence and access control are trait seams implemented by other crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - core business models, entities, and rules
pub mod domain;

/// Application services - engine commands, queries, and collaborator seams
pub mod application;

/// Core types and helpers
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::EngineError;
pub use types::FactSet;

// Application interfaces
pub use application::access::{AccessResolver, AllowAllAccessResolver};
pub use application::engine::{DomainEventHandler, TracingEventHandler, WorkflowEngine};

// Re-export main domain types for easy use
pub use domain::approval::{
    ApprovalDecision, ApprovalState, ApprovalVote, VoteDecision, VoteOutcome,
};
pub use domain::condition::{evaluate_rules, Comparison, ConditionRule};
pub use domain::events::DomainEvent;
pub use domain::history::HistoryEntry;
pub use domain::instance::{
    ActiveStep, Assignment, InstanceId, InstanceStatus, ProjectId, UserId, WorkflowInstance,
};
pub use domain::repository::{
    AssignmentRepository, HistoryRepository, InstanceRepository, TemplateRepository,
};
pub use domain::template::{
    ApprovalSettings, ConditionalSettings, EdgeDefinition, FieldSchema, FormSettings,
    NodeDefinition, NodeId, NodeKind, OutputPort, TemplateId, TemplateSnapshot, WorkflowTemplate,
};
