use crate::domain::instance::UserId;
use crate::domain::template::{ApprovalSettings, OutputPort};
use crate::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decision carried by a single vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    /// Counts toward the approval threshold
    Approve,
    /// Counts as a rejection
    Reject,
    /// Non-counting annotation; requires `allow_feedback`
    Feedback,
}

/// Final resolution of an approval node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Threshold of distinct approve votes was met
    Approved,
    /// A send-back rejection resolved the node
    Rejected,
}

impl ApprovalDecision {
    /// Output port the resolution routes through
    pub fn port(&self) -> OutputPort {
        match self {
            ApprovalDecision::Approved => OutputPort::Approve,
            ApprovalDecision::Rejected => OutputPort::Reject,
        }
    }

    /// Value stored in the instance fact set under `<node_id>.decision`
    pub fn fact_value(&self) -> &'static str {
        match self {
            ApprovalDecision::Approved => "approve",
            ApprovalDecision::Rejected => "reject",
        }
    }
}

/// One recorded vote on an approval node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalVote {
    /// The voting user
    pub user_id: UserId,

    /// The cast decision
    pub decision: VoteDecision,

    /// Optional comment attached to the vote
    pub comment: Option<String>,

    /// When the vote was cast
    pub voted_at: DateTime<Utc>,
}

/// Outcome of recording one vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote stored; the node is not resolved yet
    Recorded,
    /// This vote resolved the node
    Resolved(ApprovalDecision),
    /// The node was already resolved; the vote is kept for audit only
    AlreadyResolved(ApprovalDecision),
}

/// Vote aggregation state for one approval node of one instance
///
/// Votes are deduplicated by voter: the votes list never holds two counted
/// votes from the same user, so the approve count is a count of distinct
/// approvers by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalState {
    /// Distinct approve votes needed for a positive resolution
    pub required_approvals: u32,

    /// Whether one reject vote resolves the node immediately
    pub allow_send_back: bool,

    /// Whether non-counting feedback votes are accepted
    pub allow_feedback: bool,

    /// All recorded votes, in arrival order
    pub votes: Vec<ApprovalVote>,

    /// Resolution, set exactly once
    pub resolution: Option<ApprovalDecision>,
}

impl ApprovalState {
    /// Fresh voting state from a node's settings
    pub fn from_settings(settings: &ApprovalSettings) -> Self {
        Self {
            required_approvals: settings.required_approvals,
            allow_send_back: settings.allow_send_back,
            allow_feedback: settings.allow_feedback,
            votes: Vec::new(),
            resolution: None,
        }
    }

    /// Record one vote with insert-if-absent semantics
    ///
    /// The threshold is re-checked after the insert, so concurrent votes that
    /// cross it together (serialized by the engine's atomic region) resolve
    /// the node exactly once. Votes arriving after resolution are kept for
    /// audit and never re-trigger a transition.
    pub fn record_vote(
        &mut self,
        user_id: UserId,
        decision: VoteDecision,
        comment: Option<String>,
        voted_at: DateTime<Utc>,
    ) -> Result<VoteOutcome, EngineError> {
        if decision == VoteDecision::Feedback {
            if !self.allow_feedback {
                return Err(EngineError::FeedbackNotAllowed(format!(
                    "feedback from user {} is not enabled on this approval",
                    user_id.0
                )));
            }
            self.votes.push(ApprovalVote {
                user_id,
                decision,
                comment,
                voted_at,
            });
            return Ok(match self.resolution {
                Some(resolution) => VoteOutcome::AlreadyResolved(resolution),
                None => VoteOutcome::Recorded,
            });
        }

        let already_voted = self
            .votes
            .iter()
            .any(|vote| vote.user_id == user_id && vote.decision != VoteDecision::Feedback);
        if already_voted {
            return Err(EngineError::DuplicateApproval(format!(
                "user {} has already voted on this approval",
                user_id.0
            )));
        }

        self.votes.push(ApprovalVote {
            user_id,
            decision,
            comment,
            voted_at,
        });

        if let Some(resolution) = self.resolution {
            return Ok(VoteOutcome::AlreadyResolved(resolution));
        }

        if decision == VoteDecision::Reject && self.allow_send_back {
            self.resolution = Some(ApprovalDecision::Rejected);
            return Ok(VoteOutcome::Resolved(ApprovalDecision::Rejected));
        }

        if self.approve_count() >= self.required_approvals as usize {
            self.resolution = Some(ApprovalDecision::Approved);
            return Ok(VoteOutcome::Resolved(ApprovalDecision::Approved));
        }

        Ok(VoteOutcome::Recorded)
    }

    /// Number of distinct approve votes
    pub fn approve_count(&self) -> usize {
        self.votes
            .iter()
            .filter(|vote| vote.decision == VoteDecision::Approve)
            .count()
    }

    /// Whether the node has resolved
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(required: u32, allow_send_back: bool, allow_feedback: bool) -> ApprovalSettings {
        ApprovalSettings {
            required_approvals: required,
            allow_send_back,
            allow_feedback,
        }
    }

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn vote(
        state: &mut ApprovalState,
        id: &str,
        decision: VoteDecision,
    ) -> Result<VoteOutcome, EngineError> {
        state.record_vote(user(id), decision, None, Utc::now())
    }

    #[test]
    fn test_threshold_resolution() {
        let mut state = ApprovalState::from_settings(&settings(2, false, false));

        let outcome = vote(&mut state, "u1", VoteDecision::Approve).unwrap();
        assert_eq!(outcome, VoteOutcome::Recorded);
        assert!(!state.is_resolved());

        let outcome = vote(&mut state, "u2", VoteDecision::Approve).unwrap();
        assert_eq!(outcome, VoteOutcome::Resolved(ApprovalDecision::Approved));
        assert_eq!(state.resolution, Some(ApprovalDecision::Approved));
        assert_eq!(state.approve_count(), 2);
    }

    #[test]
    fn test_duplicate_vote_rejected() {
        let mut state = ApprovalState::from_settings(&settings(2, false, false));

        vote(&mut state, "u1", VoteDecision::Approve).unwrap();
        let result = vote(&mut state, "u1", VoteDecision::Approve);

        assert!(matches!(result, Err(EngineError::DuplicateApproval(_))));
        assert_eq!(state.approve_count(), 1);
        assert_eq!(state.votes.len(), 1);
    }

    #[test]
    fn test_duplicate_with_different_decision_rejected() {
        let mut state = ApprovalState::from_settings(&settings(2, false, false));

        vote(&mut state, "u1", VoteDecision::Approve).unwrap();
        let result = vote(&mut state, "u1", VoteDecision::Reject);

        assert!(matches!(result, Err(EngineError::DuplicateApproval(_))));
    }

    #[test]
    fn test_send_back_resolves_on_single_reject() {
        let mut state = ApprovalState::from_settings(&settings(3, true, false));

        vote(&mut state, "u1", VoteDecision::Approve).unwrap();
        let outcome = vote(&mut state, "u2", VoteDecision::Reject).unwrap();

        assert_eq!(outcome, VoteOutcome::Resolved(ApprovalDecision::Rejected));
        assert_eq!(state.resolution, Some(ApprovalDecision::Rejected));
    }

    #[test]
    fn test_reject_without_send_back_does_not_resolve() {
        let mut state = ApprovalState::from_settings(&settings(2, false, false));

        let outcome = vote(&mut state, "u1", VoteDecision::Reject).unwrap();
        assert_eq!(outcome, VoteOutcome::Recorded);
        assert!(!state.is_resolved());

        // Rejections never count toward the approval threshold.
        vote(&mut state, "u2", VoteDecision::Approve).unwrap();
        let outcome = vote(&mut state, "u3", VoteDecision::Approve).unwrap();
        assert_eq!(outcome, VoteOutcome::Resolved(ApprovalDecision::Approved));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut state = ApprovalState::from_settings(&settings(1, false, false));

        let outcome = vote(&mut state, "u1", VoteDecision::Approve).unwrap();
        assert_eq!(outcome, VoteOutcome::Resolved(ApprovalDecision::Approved));

        // A later vote is kept for audit but does not resolve again.
        let outcome = vote(&mut state, "u2", VoteDecision::Approve).unwrap();
        assert_eq!(
            outcome,
            VoteOutcome::AlreadyResolved(ApprovalDecision::Approved)
        );
        assert_eq!(state.votes.len(), 2);
    }

    #[test]
    fn test_feedback_requires_allow_feedback() {
        let mut state = ApprovalState::from_settings(&settings(2, false, false));

        let result = vote(&mut state, "u1", VoteDecision::Feedback);
        assert!(matches!(result, Err(EngineError::FeedbackNotAllowed(_))));
        assert!(state.votes.is_empty());
    }

    #[test]
    fn test_feedback_does_not_count_or_block() {
        let mut state = ApprovalState::from_settings(&settings(1, false, true));

        let outcome = state
            .record_vote(
                user("u1"),
                VoteDecision::Feedback,
                Some("looks close".to_string()),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Recorded);
        assert_eq!(state.approve_count(), 0);
        assert!(!state.is_resolved());

        // The same user can still cast a counted vote afterwards.
        let outcome = vote(&mut state, "u1", VoteDecision::Approve).unwrap();
        assert_eq!(outcome, VoteOutcome::Resolved(ApprovalDecision::Approved));
        assert_eq!(state.votes.len(), 2);
    }

    #[test]
    fn test_no_duplicate_counted_voters() {
        let mut state = ApprovalState::from_settings(&settings(3, false, true));

        vote(&mut state, "u1", VoteDecision::Approve).unwrap();
        vote(&mut state, "u2", VoteDecision::Approve).unwrap();
        let _ = vote(&mut state, "u1", VoteDecision::Approve);
        let _ = vote(&mut state, "u2", VoteDecision::Reject);

        let mut counted: Vec<&UserId> = state
            .votes
            .iter()
            .filter(|vote| vote.decision != VoteDecision::Feedback)
            .map(|vote| &vote.user_id)
            .collect();
        let total = counted.len();
        counted.dedup();
        assert_eq!(counted.len(), total);
    }

    #[test]
    fn test_decision_port_and_fact_value() {
        assert_eq!(ApprovalDecision::Approved.port(), OutputPort::Approve);
        assert_eq!(ApprovalDecision::Rejected.port(), OutputPort::Reject);
        assert_eq!(ApprovalDecision::Approved.fact_value(), "approve");
        assert_eq!(ApprovalDecision::Rejected.fact_value(), "reject");
    }
}
