use thiserror::Error;

/// Core error type for the Gateflow engine
///
/// Every variant is an expected, recoverable outcome reported to the caller;
/// none of them crashes the engine. Storage failures inside the atomic
/// transition region abort that single command only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Structural defect in a template graph; refuses instance creation
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Template not found
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Workflow instance not found
    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    /// Command targets a completed or cancelled instance
    #[error("Workflow instance is already terminal: {0}")]
    InstanceAlreadyTerminal(String),

    /// Command targets a node that is not currently active
    #[error("Node not active: {0}")]
    NodeNotActive(String),

    /// Second counted vote from the same user on the same approval node
    #[error("Duplicate approval vote: {0}")]
    DuplicateApproval(String),

    /// A resolved output port has no outgoing edge; the instance stays parked
    #[error("No matching edge: {0}")]
    NoMatchingEdge(String),

    /// The access resolver refused the acting user
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Feedback vote on an approval node that does not allow feedback
    #[error("Feedback not allowed: {0}")]
    FeedbackNotAllowed(String),

    /// Command aimed at a node of the wrong type
    #[error("Node kind mismatch: {0}")]
    NodeKindMismatch(String),

    /// Invalid command payload (e.g. a form submission missing fields)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal invariant breach during a transition
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                EngineError::InvalidTemplate("no start node".to_string()),
                "Invalid template: no start node",
            ),
            (
                EngineError::InstanceNotFound("wf-1".to_string()),
                "Workflow instance not found: wf-1",
            ),
            (
                EngineError::InstanceAlreadyTerminal("wf-1 is cancelled".to_string()),
                "Workflow instance is already terminal: wf-1 is cancelled",
            ),
            (
                EngineError::NodeNotActive("review".to_string()),
                "Node not active: review",
            ),
            (
                EngineError::DuplicateApproval("user u1".to_string()),
                "Duplicate approval vote: user u1",
            ),
            (
                EngineError::NoMatchingEdge("port approve".to_string()),
                "No matching edge: port approve",
            ),
            (
                EngineError::PermissionDenied("user u2".to_string()),
                "Permission denied: user u2",
            ),
            (
                EngineError::StateStoreError("db down".to_string()),
                "State store error: db down",
            ),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: EngineError = json_error.into();

        match error {
            EngineError::SerializationError(msg) => {
                assert!(msg.contains("expected value"));
            }
            _ => panic!("Expected SerializationError variant"),
        }
    }

    #[test]
    fn test_error_clone_and_eq() {
        let original = EngineError::NodeNotActive("step".to_string());
        let cloned = original.clone();

        assert_eq!(original, cloned);
    }
}
