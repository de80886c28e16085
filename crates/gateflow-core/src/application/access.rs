//! Access-control collaborator seam
//!
//! The engine enforces *that* an eligible actor acted on a step; *who* is
//! eligible for a node's entity reference is delegated entirely to this
//! resolver, implemented by the surrounding application's permission system.

use crate::domain::instance::UserId;
use crate::EngineError;
use async_trait::async_trait;

/// Resolves node entity references to eligible users
#[async_trait]
pub trait AccessResolver: Send + Sync {
    /// The set of users eligible to act on a node with this entity reference
    async fn resolve_assignees(&self, entity_ref: &str) -> Result<Vec<UserId>, EngineError>;

    /// Whether the user may act on a node with this entity reference
    async fn may_act(&self, user_id: &UserId, entity_ref: &str) -> Result<bool, EngineError>;
}

/// Resolver that grants every user access and assigns nobody
///
/// Intended for tests and development wiring.
pub struct AllowAllAccessResolver;

#[async_trait]
impl AccessResolver for AllowAllAccessResolver {
    async fn resolve_assignees(&self, _entity_ref: &str) -> Result<Vec<UserId>, EngineError> {
        Ok(Vec::new())
    }

    async fn may_act(&self, _user_id: &UserId, _entity_ref: &str) -> Result<bool, EngineError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all_resolver() {
        let resolver = AllowAllAccessResolver;
        let user = UserId("u1".to_string());

        assert!(resolver.may_act(&user, "managers").await.unwrap());
        assert!(resolver.resolve_assignees("managers").await.unwrap().is_empty());
    }
}
