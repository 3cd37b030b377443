//! The allocator: single writer of every agent's partition

use crate::ledger::{AgentLedger, AgentPartition, ResourceOperation};
use arbor_types::{AgentId, Filters, FrameworkId, Offer, ResourceError, ResourceSet};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

/// Allocator error type
#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    /// The agent is not registered
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// The agent is already registered
    #[error("agent already registered: {0}")]
    AgentAlreadyRegistered(AgentId),

    /// A ledger mutation failed
    #[error(transparent)]
    Resources(#[from] ResourceError),
}

pub type Result<T> = std::result::Result<T, AllocatorError>;

/// Receives newly computed offers
///
/// Invoked after the ledger has already moved the resources to *offered*;
/// implementations record the offer and forward it to the framework.
#[async_trait]
pub trait OfferSink: Send + Sync {
    async fn offers(&self, framework_id: &FrameworkId, offers: Vec<Offer>);
}

/// The authoritative allocator
///
/// One async mutex per agent serializes that agent's mutations in arrival
/// order; agents never contend with each other. Framework registration and
/// decline filters are side tables consulted by allocation passes.
pub struct Allocator {
    agents: DashMap<AgentId, Arc<Mutex<AgentLedger>>>,
    frameworks: RwLock<Vec<FrameworkId>>,
    next_framework: AtomicUsize,
    filters: DashMap<(AgentId, FrameworkId), Instant>,
    sink: Arc<dyn OfferSink>,
}

impl Allocator {
    pub fn new(sink: Arc<dyn OfferSink>) -> Self {
        Self {
            agents: DashMap::new(),
            frameworks: RwLock::new(Vec::new()),
            next_framework: AtomicUsize::new(0),
            filters: DashMap::new(),
            sink,
        }
    }

    /// Register an agent with its fixed total resources
    #[instrument(skip(self, total), fields(agent_id = %agent_id))]
    pub fn add_agent(&self, agent_id: AgentId, total: ResourceSet) -> Result<()> {
        if self.agents.contains_key(&agent_id) {
            return Err(AllocatorError::AgentAlreadyRegistered(agent_id));
        }
        debug!(total = %total, "Agent added to allocator");
        self.agents
            .insert(agent_id, Arc::new(Mutex::new(AgentLedger::new(total))));
        Ok(())
    }

    /// Remove a permanently disconnected agent and its filters
    pub fn remove_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.agents
            .remove(agent_id)
            .ok_or_else(|| AllocatorError::UnknownAgent(agent_id.clone()))?;
        self.filters.retain(|(agent, _), _| agent != agent_id);
        Ok(())
    }

    pub fn contains_agent(&self, agent_id: &AgentId) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Register a framework for allocation passes
    pub async fn add_framework(&self, framework_id: FrameworkId) {
        let mut frameworks = self.frameworks.write().await;
        if !frameworks.contains(&framework_id) {
            frameworks.push(framework_id);
        }
    }

    /// Remove a framework from allocation passes and drop its filters
    pub async fn remove_framework(&self, framework_id: &FrameworkId) {
        self.frameworks.write().await.retain(|f| f != framework_id);
        self.filters.retain(|(_, framework), _| framework != framework_id);
    }

    /// A point-in-time copy of the agent's partition
    pub async fn agent_partition(&self, agent_id: &AgentId) -> Result<AgentPartition> {
        let ledger = self.ledger(agent_id)?;
        let guard = ledger.lock().await;
        Ok(guard.partition())
    }

    /// Return declined or rescinded offer resources to the available pool
    ///
    /// An attached filter suppresses re-offering this agent to this
    /// framework until the refusal window passes.
    #[instrument(skip(self, resources, filters), fields(agent_id = %agent_id, framework_id = %framework_id))]
    pub async fn recover_resources(
        &self,
        agent_id: &AgentId,
        framework_id: &FrameworkId,
        resources: &ResourceSet,
        filters: Option<Filters>,
    ) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        let ledger = self.ledger(agent_id)?;
        {
            let mut guard = ledger.lock().await;
            guard.recover(resources)?;
        }
        debug!(resources = %resources, "Resources recovered");
        if let Some(filters) = filters {
            self.filters.insert(
                (agent_id.clone(), framework_id.clone()),
                Instant::now() + filters.refuse_duration(),
            );
        }
        Ok(())
    }

    /// Move accepted-offer resources from offered to used
    pub async fn mark_used(&self, agent_id: &AgentId, resources: &ResourceSet) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        let ledger = self.ledger(agent_id)?;
        let mut guard = ledger.lock().await;
        guard.mark_used(resources)?;
        Ok(())
    }

    /// Return finished-task resources from used to available
    pub async fn release_used(&self, agent_id: &AgentId, resources: &ResourceSet) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        let ledger = self.ledger(agent_id)?;
        let mut guard = ledger.lock().await;
        guard.release_used(resources)?;
        Ok(())
    }

    /// Apply reservation transforms to the agent's available pool
    ///
    /// Transactional: failure leaves the partition untouched.
    #[instrument(skip(self, operations), fields(agent_id = %agent_id))]
    pub async fn update_available(
        &self,
        agent_id: &AgentId,
        operations: Vec<ResourceOperation>,
    ) -> Result<()> {
        let ledger = self.ledger(agent_id)?;
        let mut guard = ledger.lock().await;
        guard.update_available(&operations)?;
        Ok(())
    }

    /// Run one allocation pass over a single agent
    ///
    /// Offers the agent's entire available set to the next framework in
    /// the rotation that is not filtering this agent. The ledger moves the
    /// resources to *offered* before the sink sees the offer.
    pub async fn allocate_agent(&self, agent_id: &AgentId) -> Result<()> {
        let ledger = self.ledger(agent_id)?;
        let (framework_id, offer) = {
            let mut guard = ledger.lock().await;
            if guard.available().is_empty() {
                return Ok(());
            }
            let frameworks = self.frameworks.read().await;
            if frameworks.is_empty() {
                return Ok(());
            }
            let start = self.next_framework.fetch_add(1, Ordering::Relaxed);
            let chosen = (0..frameworks.len())
                .map(|i| &frameworks[(start + i) % frameworks.len()])
                .find(|framework| !self.filtered(agent_id, framework));
            let framework_id = match chosen {
                Some(framework) => framework.clone(),
                None => return Ok(()),
            };
            let resources = guard.available().clone();
            guard.offer(&resources)?;
            (
                framework_id.clone(),
                Offer::new(framework_id, agent_id.clone(), resources),
            )
        };
        debug!(agent_id = %agent_id, framework_id = %framework_id, offer_id = %offer.id, "Offer extended");
        self.sink.offers(&framework_id, vec![offer]).await;
        Ok(())
    }

    /// Run one allocation pass over every agent
    pub async fn allocate(&self) {
        for agent_id in self.agent_ids() {
            // An agent removed mid-pass is not an error.
            if let Err(error) = self.allocate_agent(&agent_id).await {
                debug!(agent_id = %agent_id, error = %error, "Skipping agent in allocation pass");
            }
        }
    }

    /// Drop a framework's decline filters so it is offered again
    pub fn revive_offers(&self, framework_id: &FrameworkId) {
        self.filters.retain(|(_, framework), _| framework != framework_id);
    }

    fn ledger(&self, agent_id: &AgentId) -> Result<Arc<Mutex<AgentLedger>>> {
        self.agents
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AllocatorError::UnknownAgent(agent_id.clone()))
    }

    fn filtered(&self, agent_id: &AgentId, framework_id: &FrameworkId) -> bool {
        let key = (agent_id.clone(), framework_id.clone());
        let deadline = self.filters.get(&key).map(|entry| *entry);
        match deadline {
            Some(deadline) if deadline > Instant::now() => true,
            Some(_) => {
                // Expired filters are pruned lazily.
                self.filters.remove(&key);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records every pushed offer for assertions
    #[derive(Default)]
    struct RecordingSink {
        offers: StdMutex<Vec<Offer>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<Offer> {
            std::mem::take(&mut self.offers.lock().unwrap())
        }
    }

    #[async_trait]
    impl OfferSink for RecordingSink {
        async fn offers(&self, _framework_id: &FrameworkId, offers: Vec<Offer>) {
            self.offers.lock().unwrap().extend(offers);
        }
    }

    fn parse(spec: &str) -> ResourceSet {
        ResourceSet::parse(spec).unwrap()
    }

    fn setup() -> (Arc<RecordingSink>, Allocator) {
        let sink = Arc::new(RecordingSink::default());
        let allocator = Allocator::new(sink.clone());
        (sink, allocator)
    }

    #[tokio::test]
    async fn allocation_offers_full_available_set() {
        let (sink, allocator) = setup();
        let agent = AgentId::new("agent-1");
        let framework = FrameworkId::new("framework-1");

        allocator.add_agent(agent.clone(), parse("cpus:2;mem:1024")).unwrap();
        allocator.add_framework(framework.clone()).await;
        allocator.allocate().await;

        let offers = sink.take();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].framework_id, framework);
        assert_eq!(offers[0].resources, parse("cpus:2;mem:1024"));

        let partition = allocator.agent_partition(&agent).await.unwrap();
        assert!(partition.available.is_empty());
        assert_eq!(partition.offered, parse("cpus:2;mem:1024"));
        assert!(partition.conserved());
    }

    #[tokio::test]
    async fn nothing_offered_without_frameworks() {
        let (sink, allocator) = setup();
        let agent = AgentId::new("agent-1");
        allocator.add_agent(agent.clone(), parse("cpus:1")).unwrap();
        allocator.allocate().await;
        assert!(sink.take().is_empty());

        let partition = allocator.agent_partition(&agent).await.unwrap();
        assert_eq!(partition.available, parse("cpus:1"));
    }

    #[tokio::test]
    async fn recover_makes_resources_allocatable_again() {
        let (sink, allocator) = setup();
        let agent = AgentId::new("agent-1");
        let framework = FrameworkId::new("framework-1");

        allocator.add_agent(agent.clone(), parse("cpus:1")).unwrap();
        allocator.add_framework(framework.clone()).await;
        allocator.allocate().await;
        let offer = sink.take().remove(0);

        allocator
            .recover_resources(&agent, &framework, &offer.resources, None)
            .await
            .unwrap();
        let partition = allocator.agent_partition(&agent).await.unwrap();
        assert_eq!(partition.available, parse("cpus:1"));
        assert!(partition.offered.is_empty());

        allocator.allocate().await;
        assert_eq!(sink.take().len(), 1);
    }

    #[tokio::test]
    async fn decline_filter_suppresses_offers_until_revive() {
        let (sink, allocator) = setup();
        let agent = AgentId::new("agent-1");
        let framework = FrameworkId::new("framework-1");

        allocator.add_agent(agent.clone(), parse("cpus:1")).unwrap();
        allocator.add_framework(framework.clone()).await;
        allocator.allocate().await;
        let offer = sink.take().remove(0);

        // Decline "forever".
        allocator
            .recover_resources(&agent, &framework, &offer.resources, Some(Filters::refuse_for(1000.0)))
            .await
            .unwrap();

        allocator.allocate().await;
        assert!(sink.take().is_empty());

        allocator.revive_offers(&framework);
        allocator.allocate().await;
        assert_eq!(sink.take().len(), 1);
    }

    #[tokio::test]
    async fn frameworks_rotate_across_passes() {
        let (sink, allocator) = setup();
        let agent = AgentId::new("agent-1");
        allocator.add_agent(agent.clone(), parse("cpus:1")).unwrap();
        allocator.add_framework(FrameworkId::new("framework-1")).await;
        allocator.add_framework(FrameworkId::new("framework-2")).await;

        let mut seen = Vec::new();
        for _ in 0..2 {
            allocator.allocate().await;
            let offer = sink.take().remove(0);
            seen.push(offer.framework_id.clone());
            allocator
                .recover_resources(&agent, &offer.framework_id, &offer.resources, None)
                .await
                .unwrap();
        }
        assert_ne!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn duplicate_agent_registration_fails() {
        let (_sink, allocator) = setup();
        let agent = AgentId::new("agent-1");
        allocator.add_agent(agent.clone(), parse("cpus:1")).unwrap();
        assert!(matches!(
            allocator.add_agent(agent, parse("cpus:1")),
            Err(AllocatorError::AgentAlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn unknown_agent_is_an_error() {
        let (_sink, allocator) = setup();
        let agent = AgentId::new("ghost");
        assert!(matches!(
            allocator.agent_partition(&agent).await,
            Err(AllocatorError::UnknownAgent(_))
        ));
    }
}
