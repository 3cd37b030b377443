//! Unified observability stream for master-side transitions

use crate::ids::{AgentId, FrameworkId, OfferId};
use crate::resources::ResourceSet;
use serde::{Deserialize, Serialize};

/// Severity of a cluster event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// A master-side state transition worth observing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// An agent registered and its resources entered the pool
    AgentAdded {
        agent_id: AgentId,
        total: ResourceSet,
    },

    /// An agent disconnected permanently
    AgentRemoved { agent_id: AgentId },

    /// An offer was extended to a framework
    OfferExtended {
        offer_id: OfferId,
        framework_id: FrameworkId,
        agent_id: AgentId,
    },

    /// The master withdrew an outstanding offer
    OfferRescinded {
        offer_id: OfferId,
        framework_id: FrameworkId,
        agent_id: AgentId,
    },

    /// An operator reservation committed
    ResourcesReserved {
        agent_id: AgentId,
        principal: String,
        resources: ResourceSet,
    },

    /// An operator unreservation committed
    ResourcesUnreserved {
        agent_id: AgentId,
        principal: String,
        resources: ResourceSet,
    },
}

/// Envelope carrying an event with its identity and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEventEnvelope {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub severity: EventSeverity,
    pub event: ClusterEvent,
}

impl ClusterEventEnvelope {
    pub fn new(event: ClusterEvent, severity: EventSeverity) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity,
            event,
        }
    }
}
