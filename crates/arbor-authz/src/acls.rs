//! ACL rule types, loadable from configuration

use serde::{Deserialize, Serialize};

/// Matches a set of entities: principals, roles, or reserver principals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityMatcher {
    /// Accepts every entity
    Any,

    /// Accepts no entity
    None,

    /// Accepts exactly the listed entities
    Values(Vec<String>),
}

impl EntityMatcher {
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Values(values.into_iter().map(Into::into).collect())
    }

    /// Whether this matcher accepts the given entity
    pub fn matches(&self, entity: &str) -> bool {
        match self {
            EntityMatcher::Any => true,
            EntityMatcher::None => false,
            EntityMatcher::Values(values) => values.iter().any(|v| v == entity),
        }
    }
}

/// Permits `principals` to reserve resources for `roles`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveAcl {
    pub principals: EntityMatcher,
    pub roles: EntityMatcher,
}

/// Permits `principals` to unreserve resources originally reserved by
/// `reserver_principals`
///
/// The second matcher is what lets policy distinguish "an operator may
/// unreserve only resources it itself reserved" from "an operator may
/// unreserve anyone's".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreserveAcl {
    pub principals: EntityMatcher,
    pub reserver_principals: EntityMatcher,
}

/// The full rule list, evaluated in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acls {
    #[serde(default)]
    pub reserve_resources: Vec<ReserveAcl>,

    #[serde(default)]
    pub unreserve_resources: Vec<UnreserveAcl>,
}

impl Acls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permit_reserve(mut self, principals: EntityMatcher, roles: EntityMatcher) -> Self {
        self.reserve_resources.push(ReserveAcl { principals, roles });
        self
    }

    pub fn permit_unreserve(
        mut self,
        principals: EntityMatcher,
        reserver_principals: EntityMatcher,
    ) -> Self {
        self.unreserve_resources.push(UnreserveAcl {
            principals,
            reserver_principals,
        });
        self
    }
}
