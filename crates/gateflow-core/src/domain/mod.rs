/// Template graphs and frozen snapshots
pub mod template;

/// Workflow instance domain models
pub mod instance;

/// Approval vote aggregation
pub mod approval;

/// Conditional routing rules
pub mod condition;

/// Append-only transition history
pub mod history;

/// Domain events
pub mod events;

/// Repository interfaces
pub mod repository;
