//! Offers: ephemeral resource grants from one agent to one framework
//!
//! An offer is never mutated in place. Any change to the underlying
//! resources invalidates it through a rescission; the transformed resources
//! surface again in a fresh offer on a later allocation pass.

use crate::ids::{AgentId, FrameworkId, OfferId};
use crate::resources::ResourceSet;
use serde::{Deserialize, Serialize};

/// An outstanding grant of resources on one agent to one framework
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Unique identifier of this offer
    pub id: OfferId,

    /// The framework the offer was extended to
    pub framework_id: FrameworkId,

    /// The agent whose resources are offered
    pub agent_id: AgentId,

    /// The offered resources
    pub resources: ResourceSet,
}

impl Offer {
    pub fn new(framework_id: FrameworkId, agent_id: AgentId, resources: ResourceSet) -> Self {
        Self {
            id: OfferId::generate(),
            framework_id,
            agent_id,
            resources,
        }
    }
}

/// Framework-supplied filters attached to a decline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// How long the declined agent should not be re-offered to this
    /// framework, in seconds
    pub refuse_seconds: f64,
}

impl Filters {
    pub fn refuse_for(seconds: f64) -> Self {
        Self {
            refuse_seconds: seconds,
        }
    }

    pub fn refuse_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.refuse_seconds.max(0.0))
    }
}

impl Default for Filters {
    fn default() -> Self {
        // The stock refusal window applied when a decline carries no filter.
        Self {
            refuse_seconds: 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offers_get_distinct_ids() {
        let resources = ResourceSet::parse("cpus:1").unwrap();
        let a = Offer::new(
            FrameworkId::new("f1"),
            AgentId::new("a1"),
            resources.clone(),
        );
        let b = Offer::new(FrameworkId::new("f1"), AgentId::new("a1"), resources);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn negative_refusal_clamps_to_zero() {
        let filters = Filters::refuse_for(-1.0);
        assert_eq!(filters.refuse_duration(), std::time::Duration::ZERO);
    }
}
