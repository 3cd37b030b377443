//! The master facade
//!
//! Owns the allocator, the authorizer, the outstanding-offer registry,
//! and the framework channels, and exposes the operator and framework
//! surfaces as async methods. Mutations touching one agent's partition
//! run under that agent's operation lock, so a reservation coordinator
//! and an allocation pass never interleave on the same agent; different
//! agents proceed in parallel.

use crate::config::MasterConfig;
use crate::error::{MasterError, Result};
use crate::framework::{FrameworkChannel, FrameworkHandle};
use crate::offers::OfferManager;
use arbor_allocator::{AgentPartition, Allocator, OfferSink};
use arbor_authz::{Authorizer, LocalAuthorizer};
use arbor_types::{
    AgentId, ClusterEvent, ClusterEventEnvelope, EventSeverity, Filters, FrameworkId, Offer,
    OfferId, ResourceSet,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Receives offers from the allocator: records them and forwards them to
/// the owning framework's channel.
struct MasterSink {
    offers: Arc<OfferManager>,
    frameworks: Arc<DashMap<FrameworkId, FrameworkHandle>>,
    events: broadcast::Sender<ClusterEventEnvelope>,
}

#[async_trait]
impl OfferSink for MasterSink {
    async fn offers(&self, framework_id: &FrameworkId, offers: Vec<Offer>) {
        let handle = match self.frameworks.get(framework_id) {
            Some(handle) => handle,
            None => {
                // The framework left between allocation and delivery; its
                // offers die here and a later pass re-offers the resources.
                warn!(framework_id = %framework_id, "Dropping offers for departed framework");
                return;
            }
        };
        for offer in &offers {
            self.offers.register(offer.clone());
            let _ = self.events.send(ClusterEventEnvelope::new(
                ClusterEvent::OfferExtended {
                    offer_id: offer.id,
                    framework_id: offer.framework_id.clone(),
                    agent_id: offer.agent_id.clone(),
                },
                EventSeverity::Info,
            ));
        }
        handle.send_offers(offers);
    }
}

/// The cluster master
pub struct Master {
    config: MasterConfig,
    allocator: Arc<Allocator>,
    authorizer: Arc<dyn Authorizer>,
    offers: Arc<OfferManager>,
    frameworks: Arc<DashMap<FrameworkId, FrameworkHandle>>,
    agent_ops: DashMap<AgentId, Arc<Mutex<()>>>,
    events: broadcast::Sender<ClusterEventEnvelope>,
}

impl Master {
    /// A master whose authorizer is built from the configured ACLs
    pub fn new(config: MasterConfig) -> Self {
        let authorizer = Arc::new(LocalAuthorizer::new(config.acls.clone()));
        Self::with_authorizer(config, authorizer)
    }

    /// A master with an externally supplied authorizer
    pub fn with_authorizer(config: MasterConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let offers = Arc::new(OfferManager::new());
        let frameworks: Arc<DashMap<FrameworkId, FrameworkHandle>> = Arc::new(DashMap::new());
        let sink = Arc::new(MasterSink {
            offers: Arc::clone(&offers),
            frameworks: Arc::clone(&frameworks),
            events: events.clone(),
        });
        Self {
            config,
            allocator: Arc::new(Allocator::new(sink)),
            authorizer,
            offers,
            frameworks,
            agent_ops: DashMap::new(),
            events,
        }
    }

    /// Subscribe to the cluster event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClusterEventEnvelope> {
        self.events.subscribe()
    }

    /// Register an agent and immediately try to offer its resources
    #[instrument(skip(self, total), fields(agent_id = %agent_id))]
    pub async fn add_agent(&self, agent_id: AgentId, total: ResourceSet) -> Result<()> {
        self.allocator.add_agent(agent_id.clone(), total.clone())?;
        info!(total = %total, "Agent registered");
        self.emit(
            ClusterEvent::AgentAdded {
                agent_id: agent_id.clone(),
                total,
            },
            EventSeverity::Info,
        );
        self.allocate_agent(&agent_id).await;
        Ok(())
    }

    /// Remove a permanently disconnected agent
    ///
    /// Outstanding offers on the agent are rescinded; its partition is
    /// dropped wholesale, used resources included.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn remove_agent(&self, agent_id: &AgentId) -> Result<()> {
        let op = self.agent_op(agent_id);
        let _guard = op.lock().await;
        for offer in self.offers.take_agent_offers(agent_id) {
            self.notify_rescinded(&offer);
        }
        self.allocator.remove_agent(agent_id)?;
        drop(_guard);
        self.agent_ops.remove(agent_id);
        info!("Agent removed");
        self.emit(
            ClusterEvent::AgentRemoved {
                agent_id: agent_id.clone(),
            },
            EventSeverity::Warning,
        );
        Ok(())
    }

    /// Register a framework and run an allocation pass for it
    pub async fn add_framework(
        &self,
        framework_id: FrameworkId,
        channel: Arc<dyn FrameworkChannel>,
    ) {
        self.frameworks.insert(
            framework_id.clone(),
            FrameworkHandle::new(framework_id.clone(), channel),
        );
        self.allocator.add_framework(framework_id.clone()).await;
        info!(framework_id = %framework_id, "Framework registered");
        self.allocate_once().await;
    }

    /// Remove a framework, recovering its outstanding offers
    ///
    /// No rescissions are sent; there is nobody left to notify.
    pub async fn remove_framework(&self, framework_id: &FrameworkId) -> Result<()> {
        for offer in self.offers.take_framework_offers(framework_id) {
            let op = self.agent_op(&offer.agent_id);
            let _guard = op.lock().await;
            self.allocator
                .recover_resources(&offer.agent_id, framework_id, &offer.resources, None)
                .await?;
        }
        self.frameworks.remove(framework_id);
        self.allocator.remove_framework(framework_id).await;
        info!(framework_id = %framework_id, "Framework removed");
        Ok(())
    }

    /// Accept an offer, granting `task_resources` to the framework's tasks
    ///
    /// The unused remainder of the offer returns to the available pool and
    /// surfaces again in a later offer.
    #[instrument(skip(self, task_resources), fields(offer_id = %offer_id))]
    pub async fn accept_offer(&self, offer_id: &OfferId, task_resources: ResourceSet) -> Result<()> {
        let offer = self
            .offers
            .get(offer_id)
            .ok_or_else(|| MasterError::bad_request(format!("unknown offer: {offer_id}")))?;
        if !offer.resources.contains(&task_resources) {
            return Err(MasterError::bad_request(format!(
                "task resources [{task_resources}] exceed offer {offer_id}"
            )));
        }

        let op = self.agent_op(&offer.agent_id);
        let _guard = op.lock().await;
        // Re-take under the lock: a concurrent rescission may have won.
        let offer = self
            .offers
            .take(offer_id)
            .ok_or_else(|| MasterError::bad_request(format!("unknown offer: {offer_id}")))?;

        self.allocator.mark_used(&offer.agent_id, &task_resources).await?;
        let unused = offer.resources.checked_sub(&task_resources)?;
        if !unused.is_empty() {
            self.allocator
                .recover_resources(&offer.agent_id, &offer.framework_id, &unused, None)
                .await?;
        }
        info!(
            agent_id = %offer.agent_id,
            framework_id = %offer.framework_id,
            used = %task_resources,
            "Offer accepted"
        );
        Ok(())
    }

    /// Decline an offer, filtering this agent for the refusal window
    ///
    /// A decline without filters gets the stock window. Declining an
    /// offer that is no longer outstanding is a no-op.
    #[instrument(skip(self, filters), fields(offer_id = %offer_id))]
    pub async fn decline_offer(&self, offer_id: &OfferId, filters: Option<Filters>) -> Result<()> {
        let offer = match self.offers.get(offer_id) {
            Some(offer) => offer,
            None => return Ok(()),
        };
        let op = self.agent_op(&offer.agent_id);
        let _guard = op.lock().await;
        let offer = match self.offers.take(offer_id) {
            Some(offer) => offer,
            None => return Ok(()),
        };
        let filters = filters.unwrap_or_default();
        self.allocator
            .recover_resources(
                &offer.agent_id,
                &offer.framework_id,
                &offer.resources,
                Some(filters),
            )
            .await?;
        debug!(agent_id = %offer.agent_id, framework_id = %offer.framework_id, "Offer declined");
        Ok(())
    }

    /// Withdraw an outstanding offer, notifying the framework
    ///
    /// Rescinding an offer that is no longer outstanding is a no-op.
    #[instrument(skip(self), fields(offer_id = %offer_id))]
    pub async fn rescind_offer(&self, offer_id: &OfferId) -> Result<()> {
        let offer = match self.offers.get(offer_id) {
            Some(offer) => offer,
            None => return Ok(()),
        };
        let op = self.agent_op(&offer.agent_id);
        let _guard = op.lock().await;
        let offer = match self.offers.take(offer_id) {
            Some(offer) => offer,
            None => return Ok(()),
        };
        self.notify_rescinded(&offer);
        self.allocator
            .recover_resources(&offer.agent_id, &offer.framework_id, &offer.resources, None)
            .await?;
        Ok(())
    }

    /// Return finished-task resources to the agent's available pool
    pub async fn release_used(&self, agent_id: &AgentId, resources: &ResourceSet) -> Result<()> {
        let op = self.agent_op(agent_id);
        let _guard = op.lock().await;
        self.allocator.release_used(agent_id, resources).await?;
        Ok(())
    }

    /// Clear a framework's decline filters and run an allocation pass
    pub async fn revive_offers(&self, framework_id: &FrameworkId) {
        self.allocator.revive_offers(framework_id);
        self.allocate_once().await;
    }

    /// Run one allocation pass over every agent
    pub async fn allocate_once(&self) {
        for agent_id in self.allocator.agent_ids() {
            self.allocate_agent(&agent_id).await;
        }
    }

    /// Spawn the periodic allocation loop
    pub fn spawn_allocation_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let master = Arc::clone(self);
        let period = master.config.allocation_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                master.allocate_once().await;
            }
        })
    }

    /// A point-in-time copy of one agent's partition
    pub async fn agent_partition(&self, agent_id: &AgentId) -> Result<AgentPartition> {
        Ok(self.allocator.agent_partition(agent_id).await?)
    }

    /// Snapshot of the offers outstanding on one agent
    pub fn outstanding_offers(&self, agent_id: &AgentId) -> Vec<Offer> {
        self.offers.outstanding_for_agent(agent_id)
    }

    pub(crate) async fn allocate_agent(&self, agent_id: &AgentId) {
        let op = self.agent_op(agent_id);
        let _guard = op.lock().await;
        // An agent removed mid-pass is not an error.
        if let Err(error) = self.allocator.allocate_agent(agent_id).await {
            debug!(agent_id = %agent_id, error = %error, "Skipping agent in allocation pass");
        }
    }

    pub(crate) fn agent_op(&self, agent_id: &AgentId) -> Arc<Mutex<()>> {
        self.agent_ops
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub(crate) fn authorizer(&self) -> &Arc<dyn Authorizer> {
        &self.authorizer
    }

    pub(crate) fn offer_manager(&self) -> &OfferManager {
        &self.offers
    }

    pub(crate) fn emit(&self, event: ClusterEvent, severity: EventSeverity) {
        // No subscribers is fine.
        let _ = self.events.send(ClusterEventEnvelope::new(event, severity));
    }

    /// Enqueue a rescission on the framework's ordered channel and emit
    /// the matching event. Fire-and-forget.
    pub(crate) fn notify_rescinded(&self, offer: &Offer) {
        if let Some(handle) = self.frameworks.get(&offer.framework_id) {
            handle.send_rescinded(offer.id);
        }
        info!(
            offer_id = %offer.id,
            framework_id = %offer.framework_id,
            agent_id = %offer.agent_id,
            "Offer rescinded"
        );
        self.emit(
            ClusterEvent::OfferRescinded {
                offer_id: offer.id,
                framework_id: offer.framework_id.clone(),
                agent_id: offer.agent_id.clone(),
            },
            EventSeverity::Warning,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    pub(crate) enum FrameworkEvent {
        Offers(Vec<Offer>),
        Rescinded(OfferId),
    }

    pub(crate) struct RecordingFramework {
        tx: mpsc::UnboundedSender<FrameworkEvent>,
    }

    impl RecordingFramework {
        pub(crate) fn channel() -> (
            Arc<dyn FrameworkChannel>,
            mpsc::UnboundedReceiver<FrameworkEvent>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    #[async_trait]
    impl FrameworkChannel for RecordingFramework {
        async fn offers(&self, offers: Vec<Offer>) {
            let _ = self.tx.send(FrameworkEvent::Offers(offers));
        }

        async fn offer_rescinded(&self, offer_id: OfferId) {
            let _ = self.tx.send(FrameworkEvent::Rescinded(offer_id));
        }
    }

    async fn recv_offers(
        rx: &mut mpsc::UnboundedReceiver<FrameworkEvent>,
    ) -> Vec<Offer> {
        match tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for framework event")
            .expect("framework channel closed")
        {
            FrameworkEvent::Offers(offers) => offers,
            FrameworkEvent::Rescinded(_) => panic!("expected offers, got rescission"),
        }
    }

    fn parse(spec: &str) -> ResourceSet {
        ResourceSet::parse(spec).unwrap()
    }

    #[tokio::test]
    async fn agent_resources_are_offered_on_registration() {
        let master = Master::new(MasterConfig::default());
        let (channel, mut rx) = RecordingFramework::channel();
        master.add_framework(FrameworkId::new("f1"), channel).await;
        master
            .add_agent(AgentId::new("a1"), parse("cpus:2;mem:1024"))
            .await
            .unwrap();

        let offers = recv_offers(&mut rx).await;
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].resources, parse("cpus:2;mem:1024"));

        let partition = master.agent_partition(&AgentId::new("a1")).await.unwrap();
        assert!(partition.available.is_empty());
        assert!(partition.conserved());
    }

    #[tokio::test]
    async fn accept_keeps_task_slice_and_recovers_remainder() {
        let master = Master::new(MasterConfig::default());
        let agent = AgentId::new("a1");
        let (channel, mut rx) = RecordingFramework::channel();
        master.add_framework(FrameworkId::new("f1"), channel).await;
        master.add_agent(agent.clone(), parse("cpus:2;mem:1024")).await.unwrap();

        let offer = recv_offers(&mut rx).await.remove(0);
        master.accept_offer(&offer.id, parse("cpus:1;mem:256")).await.unwrap();

        let partition = master.agent_partition(&agent).await.unwrap();
        assert_eq!(partition.used, parse("cpus:1;mem:256"));
        assert_eq!(partition.available, parse("cpus:1;mem:768"));
        assert!(partition.offered.is_empty());
        assert!(partition.conserved());

        // The accepted offer is settled.
        assert!(master.accept_offer(&offer.id, parse("cpus:1")).await.is_err());
    }

    #[tokio::test]
    async fn accept_beyond_offer_is_rejected() {
        let master = Master::new(MasterConfig::default());
        let agent = AgentId::new("a1");
        let (channel, mut rx) = RecordingFramework::channel();
        master.add_framework(FrameworkId::new("f1"), channel).await;
        master.add_agent(agent.clone(), parse("cpus:1")).await.unwrap();

        let offer = recv_offers(&mut rx).await.remove(0);
        let result = master.accept_offer(&offer.id, parse("cpus:2")).await;
        assert!(matches!(result, Err(MasterError::BadRequest(_))));

        // The offer survives a rejected accept.
        assert_eq!(master.outstanding_offers(&agent).len(), 1);
    }

    #[tokio::test]
    async fn decline_is_idempotent_and_filters_stick() {
        let master = Master::new(MasterConfig::default());
        let agent = AgentId::new("a1");
        let (channel, mut rx) = RecordingFramework::channel();
        master.add_framework(FrameworkId::new("f1"), channel).await;
        master.add_agent(agent.clone(), parse("cpus:1")).await.unwrap();

        let offer = recv_offers(&mut rx).await.remove(0);
        master
            .decline_offer(&offer.id, Some(Filters::refuse_for(1000.0)))
            .await
            .unwrap();
        master.decline_offer(&offer.id, None).await.unwrap();

        master.allocate_once().await;
        let partition = master.agent_partition(&agent).await.unwrap();
        assert_eq!(partition.available, parse("cpus:1"));
        assert!(master.outstanding_offers(&agent).is_empty());

        master.revive_offers(&FrameworkId::new("f1")).await;
        let offers = recv_offers(&mut rx).await;
        assert_eq!(offers[0].resources, parse("cpus:1"));
    }

    #[tokio::test]
    async fn finished_tasks_release_used_resources() {
        let master = Master::new(MasterConfig::default());
        let agent = AgentId::new("a1");
        let (channel, mut rx) = RecordingFramework::channel();
        master.add_framework(FrameworkId::new("f1"), channel).await;
        master.add_agent(agent.clone(), parse("cpus:2")).await.unwrap();

        let offer = recv_offers(&mut rx).await.remove(0);
        master.accept_offer(&offer.id, parse("cpus:2")).await.unwrap();
        master.release_used(&agent, &parse("cpus:1")).await.unwrap();

        let partition = master.agent_partition(&agent).await.unwrap();
        assert_eq!(partition.used, parse("cpus:1"));
        assert_eq!(partition.available, parse("cpus:1"));
        assert!(partition.conserved());
    }

    #[tokio::test]
    async fn operator_rescind_recovers_and_notifies() {
        let master = Master::new(MasterConfig::default());
        let agent = AgentId::new("a1");
        let (channel, mut rx) = RecordingFramework::channel();
        master.add_framework(FrameworkId::new("f1"), channel).await;
        master.add_agent(agent.clone(), parse("cpus:1")).await.unwrap();

        let offer = recv_offers(&mut rx).await.remove(0);
        master.rescind_offer(&offer.id).await.unwrap();
        // Rescinding again is a no-op.
        master.rescind_offer(&offer.id).await.unwrap();

        match tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            FrameworkEvent::Rescinded(offer_id) => assert_eq!(offer_id, offer.id),
            FrameworkEvent::Offers(_) => panic!("expected rescission"),
        }
        let partition = master.agent_partition(&agent).await.unwrap();
        assert_eq!(partition.available, parse("cpus:1"));
        assert!(partition.conserved());
    }

    #[tokio::test]
    async fn removing_an_agent_rescinds_its_offers() {
        let master = Master::new(MasterConfig::default());
        let agent = AgentId::new("a1");
        let (channel, mut rx) = RecordingFramework::channel();
        master.add_framework(FrameworkId::new("f1"), channel).await;
        master.add_agent(agent.clone(), parse("cpus:1")).await.unwrap();

        let offer = recv_offers(&mut rx).await.remove(0);
        master.remove_agent(&agent).await.unwrap();

        match tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            FrameworkEvent::Rescinded(offer_id) => assert_eq!(offer_id, offer.id),
            FrameworkEvent::Offers(_) => panic!("expected rescission"),
        }
        assert!(master.agent_partition(&agent).await.is_err());
    }
}
