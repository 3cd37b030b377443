//! Arbor Types - Core types for the cluster resource manager control plane
//!
//! Arbor's master tracks typed resources on agent machines, offers slices of
//! them to competing frameworks, and lets operators carve out dynamic,
//! role/principal-scoped reservations from the shared pool.
//!
//! ## Architectural Boundaries
//!
//! - **arbor-types** owns: the resource algebra, identifiers, offers, events
//! - **arbor-allocator** owns: each agent's total/available/offered/used ledger
//! - **arbor-master** owns: the reservation protocol and offer lifecycle
//!
//! ## Key Concepts
//!
//! - **Resource**: a typed quantity (scalar, ranges, items) tagged with a
//!   role and optional reservation metadata
//! - **ResourceSet**: an ordered, deduplicated multiset of resources with
//!   merge/subtract/contains/flatten operations
//! - **Offer**: an ephemeral grant of resources on one agent to one framework
//! - **Events**: unified observability stream for master-side transitions

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod offer;
pub mod resources;

// Re-export main types
pub use events::{ClusterEvent, ClusterEventEnvelope, EventSeverity};
pub use ids::{AgentId, FrameworkId, OfferId};
pub use offer::{Filters, Offer};
pub use resources::{
    Interval, Reservation, Resource, ResourceError, ResourceKind, ResourceSet, DEFAULT_ROLE,
};
