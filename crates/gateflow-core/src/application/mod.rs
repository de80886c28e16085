/// Workflow engine service
pub mod engine;

/// Access-control collaborator seam
pub mod access;
