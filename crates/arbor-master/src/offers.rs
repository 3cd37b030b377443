//! Registry of outstanding offers

use arbor_types::{AgentId, FrameworkId, Offer, OfferId};
use dashmap::DashMap;

/// Tracks every offer the master has extended and not yet settled
///
/// `take` variants remove atomically with respect to each other, so an
/// offer is accepted, declined, or rescinded exactly once.
#[derive(Default)]
pub struct OfferManager {
    offers: DashMap<OfferId, Offer>,
    by_agent: DashMap<AgentId, Vec<OfferId>>,
}

impl OfferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, offer: Offer) {
        self.by_agent
            .entry(offer.agent_id.clone())
            .or_default()
            .push(offer.id);
        self.offers.insert(offer.id, offer);
    }

    pub fn get(&self, offer_id: &OfferId) -> Option<Offer> {
        self.offers.get(offer_id).map(|entry| entry.value().clone())
    }

    /// Remove and return one offer, if it is still outstanding
    pub fn take(&self, offer_id: &OfferId) -> Option<Offer> {
        let (_, offer) = self.offers.remove(offer_id)?;
        if let Some(mut ids) = self.by_agent.get_mut(&offer.agent_id) {
            ids.retain(|id| id != offer_id);
        }
        Some(offer)
    }

    /// Remove and return every outstanding offer on one agent
    pub fn take_agent_offers(&self, agent_id: &AgentId) -> Vec<Offer> {
        let ids = match self.by_agent.remove(agent_id) {
            Some((_, ids)) => ids,
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.offers.remove(id).map(|(_, offer)| offer))
            .collect()
    }

    /// Remove and return every outstanding offer held by one framework
    pub fn take_framework_offers(&self, framework_id: &FrameworkId) -> Vec<Offer> {
        let ids: Vec<OfferId> = self
            .offers
            .iter()
            .filter(|entry| &entry.value().framework_id == framework_id)
            .map(|entry| *entry.key())
            .collect();
        ids.iter().filter_map(|id| self.take(id)).collect()
    }

    /// Snapshot of the offers outstanding on one agent
    pub fn outstanding_for_agent(&self, agent_id: &AgentId) -> Vec<Offer> {
        let ids = match self.by_agent.get(agent_id) {
            Some(entry) => entry.value().clone(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}
