//! The authorizer trait and the local, ACL-backed implementation

use crate::acls::Acls;
use async_trait::async_trait;
use thiserror::Error;

/// Authorization failure unrelated to the verdict itself
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The authorization backend could not produce a verdict
    #[error("authorization backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, AuthzError>;

/// Evaluates operator reservation requests against policy
///
/// Implementations answer with the verdict only; mapping a deny to the
/// caller-facing `Forbidden` is the master's job.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// May `principal` reserve resources for every role in `roles`?
    async fn authorize_reserve(&self, principal: &str, roles: &[String]) -> Result<bool>;

    /// May `principal` unreserve resources originally reserved by every
    /// principal in `reserver_principals`?
    async fn authorize_unreserve(
        &self,
        principal: &str,
        reserver_principals: &[String],
    ) -> Result<bool>;
}

/// In-process authorizer over a fixed ACL list
///
/// A rule applies when both of its matchers accept; the scan continues
/// past rules that do not apply. A non-empty rule list with no applying
/// rule denies; an empty rule list of a kind implicitly allows that kind.
#[derive(Debug, Clone, Default)]
pub struct LocalAuthorizer {
    acls: Acls,
}

impl LocalAuthorizer {
    pub fn new(acls: Acls) -> Self {
        Self { acls }
    }

    /// An authorizer that allows everything (no rules configured)
    pub fn permissive() -> Self {
        Self::default()
    }

    fn reserve_permitted(&self, principal: &str, role: &str) -> bool {
        if self.acls.reserve_resources.is_empty() {
            return true;
        }
        self.acls
            .reserve_resources
            .iter()
            .any(|acl| acl.principals.matches(principal) && acl.roles.matches(role))
    }

    fn unreserve_permitted(&self, principal: &str, reserver: &str) -> bool {
        if self.acls.unreserve_resources.is_empty() {
            return true;
        }
        self.acls.unreserve_resources.iter().any(|acl| {
            acl.principals.matches(principal) && acl.reserver_principals.matches(reserver)
        })
    }
}

#[async_trait]
impl Authorizer for LocalAuthorizer {
    async fn authorize_reserve(&self, principal: &str, roles: &[String]) -> Result<bool> {
        // All-or-nothing: one unauthorized role denies the whole request.
        Ok(roles
            .iter()
            .all(|role| self.reserve_permitted(principal, role)))
    }

    async fn authorize_unreserve(
        &self,
        principal: &str,
        reserver_principals: &[String],
    ) -> Result<bool> {
        Ok(reserver_principals
            .iter()
            .all(|reserver| self.unreserve_permitted(principal, reserver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acls::EntityMatcher;

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn open_by_default_when_no_rules_exist() {
        let authz = LocalAuthorizer::permissive();
        assert!(authz
            .authorize_reserve("anyone", &roles(&["any-role"]))
            .await
            .unwrap());
        assert!(authz
            .authorize_unreserve("anyone", &roles(&["any-reserver"]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn principal_may_reserve_any_role() {
        let acls = Acls::new().permit_reserve(
            EntityMatcher::values(["alice"]),
            EntityMatcher::Any,
        );
        let authz = LocalAuthorizer::new(acls);
        assert!(authz
            .authorize_reserve("alice", &roles(&["eng", "ads"]))
            .await
            .unwrap());
        assert!(!authz
            .authorize_reserve("bob", &roles(&["eng"]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn nobody_may_reserve_anything() {
        let acls = Acls::new().permit_reserve(EntityMatcher::Any, EntityMatcher::None);
        let authz = LocalAuthorizer::new(acls);
        assert!(!authz
            .authorize_reserve("alice", &roles(&["eng"]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn multi_role_requests_are_all_or_nothing() {
        let acls = Acls::new().permit_reserve(
            EntityMatcher::values(["alice"]),
            EntityMatcher::values(["eng"]),
        );
        let authz = LocalAuthorizer::new(acls);
        assert!(authz
            .authorize_reserve("alice", &roles(&["eng"]))
            .await
            .unwrap());
        // "ads" is not permitted, so the whole two-role request is denied.
        assert!(!authz
            .authorize_reserve("alice", &roles(&["eng", "ads"]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unreserve_restricted_to_own_reservations() {
        let acls = Acls::new().permit_unreserve(
            EntityMatcher::values(["alice"]),
            EntityMatcher::values(["alice"]),
        );
        let authz = LocalAuthorizer::new(acls);
        assert!(authz
            .authorize_unreserve("alice", &roles(&["alice"]))
            .await
            .unwrap());
        assert!(!authz
            .authorize_unreserve("alice", &roles(&["bob"]))
            .await
            .unwrap());
        assert!(!authz
            .authorize_unreserve("bob", &roles(&["alice"]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn nobody_may_unreserve_anything() {
        let acls = Acls::new().permit_unreserve(EntityMatcher::Any, EntityMatcher::None);
        let authz = LocalAuthorizer::new(acls);
        assert!(!authz
            .authorize_unreserve("alice", &roles(&["alice"]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn later_rules_still_apply() {
        let acls = Acls::new()
            .permit_reserve(
                EntityMatcher::values(["ops"]),
                EntityMatcher::values(["infra"]),
            )
            .permit_reserve(EntityMatcher::values(["alice"]), EntityMatcher::Any);
        let authz = LocalAuthorizer::new(acls);
        assert!(authz
            .authorize_reserve("alice", &roles(&["eng"]))
            .await
            .unwrap());
    }
}
