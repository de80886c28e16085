use crate::domain::instance::{InstanceId, UserId};
use crate::domain::template::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable audit record of one transition
///
/// The history log is append-only and is the engine's only source of truth
/// for "what happened": one entry per retired node, carrying the acting user
/// (absent for engine-driven hops such as start markers and conditionals)
/// and the decision that drove the transition, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The instance the transition belongs to
    pub instance_id: InstanceId,

    /// The node the transition happened at
    pub node_id: NodeId,

    /// The acting user, when a person drove the transition
    pub actor_id: Option<UserId>,

    /// The decision recorded with the transition (port label, vote outcome)
    pub decision: Option<String>,

    /// When the transition was recorded
    pub recorded_at: DateTime<Utc>,
}
