//! The reserve/unreserve coordinator
//!
//! Both operations follow the same shape: validate the request, consult
//! the authorizer, then under the agent's operation lock decide whether
//! the transform can be satisfied at all. A request the agent cannot
//! cover fails with `Conflict` before any outstanding offer is touched.
//! Only when the available pool alone falls short are the agent's offers
//! rescinded to free the difference, after which the transform commits
//! atomically and an allocation pass re-offers the transformed pool.

use crate::error::{MasterError, Result};
use crate::master::Master;
use arbor_allocator::ResourceOperation;
use arbor_types::{AgentId, ClusterEvent, EventSeverity, ResourceSet};
use tracing::{info, instrument};

impl Master {
    /// Dynamically reserve resources on an agent for `principal`
    ///
    /// Every entry of `resources` must carry a non-default role and a
    /// reservation naming `principal`.
    #[instrument(skip(self, resources), fields(agent_id = %agent_id, principal = %principal))]
    pub async fn reserve(
        &self,
        agent_id: &AgentId,
        resources: ResourceSet,
        principal: &str,
    ) -> Result<()> {
        self.validate_reservation_request(agent_id, &resources)?;
        for entry in resources.iter() {
            match &entry.reservation {
                Some(reservation) if reservation.principal == principal => {}
                _ => {
                    return Err(MasterError::bad_request(format!(
                        "reservation on '{entry}' does not name principal '{principal}'"
                    )));
                }
            }
        }

        let allowed = self
            .authorizer()
            .authorize_reserve(principal, &resources.roles())
            .await
            .map_err(|error| MasterError::internal(error.to_string()))?;
        if !allowed {
            return Err(MasterError::forbidden(format!(
                "principal '{principal}' is not permitted to reserve for roles {:?}",
                resources.roles()
            )));
        }

        // The reservation consumes the unreserved equivalent.
        let consumed = resources.flatten_unreserved();
        self.apply_transform(
            agent_id,
            &consumed,
            ResourceOperation::Reserve {
                resources: resources.clone(),
            },
        )
        .await?;

        info!(resources = %resources, "Resources reserved");
        self.emit(
            ClusterEvent::ResourcesReserved {
                agent_id: agent_id.clone(),
                principal: principal.to_string(),
                resources,
            },
            EventSeverity::Info,
        );
        self.allocate_agent(agent_id).await;
        Ok(())
    }

    /// Release dynamically reserved resources back to the default role
    #[instrument(skip(self, resources), fields(agent_id = %agent_id, principal = %principal))]
    pub async fn unreserve(
        &self,
        agent_id: &AgentId,
        resources: ResourceSet,
        principal: &str,
    ) -> Result<()> {
        self.validate_reservation_request(agent_id, &resources)?;

        let allowed = self
            .authorizer()
            .authorize_unreserve(principal, &resources.reserver_principals())
            .await
            .map_err(|error| MasterError::internal(error.to_string()))?;
        if !allowed {
            return Err(MasterError::forbidden(format!(
                "principal '{principal}' is not permitted to unreserve resources reserved by {:?}",
                resources.reserver_principals()
            )));
        }

        // The unreservation consumes the reserved form itself.
        let consumed = resources.clone();
        self.apply_transform(
            agent_id,
            &consumed,
            ResourceOperation::Unreserve {
                resources: resources.clone(),
            },
        )
        .await?;

        info!(resources = %resources, "Resources unreserved");
        self.emit(
            ClusterEvent::ResourcesUnreserved {
                agent_id: agent_id.clone(),
                principal: principal.to_string(),
                resources,
            },
            EventSeverity::Info,
        );
        self.allocate_agent(agent_id).await;
        Ok(())
    }

    fn validate_reservation_request(
        &self,
        agent_id: &AgentId,
        resources: &ResourceSet,
    ) -> Result<()> {
        if !self.allocator().contains_agent(agent_id) {
            return Err(MasterError::bad_request(format!("unknown agent: {agent_id}")));
        }
        if resources.is_empty() {
            return Err(MasterError::bad_request("no resources specified"));
        }
        for entry in resources.iter() {
            if !entry.is_dynamically_reserved() {
                return Err(MasterError::bad_request(format!(
                    "'{entry}' is not dynamically reserved"
                )));
            }
        }
        Ok(())
    }

    /// Commit a reservation transform under the agent's operation lock
    ///
    /// `consumed` is what the transform withdraws from the available pool.
    /// When available alone cannot cover it but available plus offered
    /// can, every outstanding offer on the agent is rescinded first; the
    /// conflict verdict comes before any rescission.
    async fn apply_transform(
        &self,
        agent_id: &AgentId,
        consumed: &ResourceSet,
        operation: ResourceOperation,
    ) -> Result<()> {
        let op = self.agent_op(agent_id);
        let _guard = op.lock().await;

        let partition = self.allocator().agent_partition(agent_id).await?;
        if !partition.available.contains(consumed) {
            if !partition.available.merge(&partition.offered).contains(consumed) {
                return Err(MasterError::conflict(format!(
                    "agent {agent_id} cannot cover [{consumed}]"
                )));
            }
            for offer in self.offer_manager().take_agent_offers(agent_id) {
                self.notify_rescinded(&offer);
                self.allocator()
                    .recover_resources(&offer.agent_id, &offer.framework_id, &offer.resources, None)
                    .await?;
            }
        }
        self.allocator()
            .update_available(agent_id, vec![operation])
            .await?;
        Ok(())
    }
}
