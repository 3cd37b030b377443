//! Arbor Authz - ACL evaluation for operator reservation requests
//!
//! The master asks this crate one question before touching any ledger:
//! may `principal` reserve resources under these roles, or unreserve
//! resources originally reserved by these principals? Rules are evaluated
//! in list order, a rule applies when both of its matchers accept, and a
//! request is all-or-nothing: every role (or every original reserver) must
//! be permitted or the whole request is denied.
//!
//! When no rules of a kind are configured at all, that kind is implicitly
//! allowed. This open-by-default behavior is deliberate and pinned by
//! tests; deployments that want deny-by-default configure a trailing
//! any-principal/none-resource rule.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod acls;
pub mod authorizer;

pub use acls::{Acls, EntityMatcher, ReserveAcl, UnreserveAcl};
pub use authorizer::{Authorizer, AuthzError, LocalAuthorizer, Result};
