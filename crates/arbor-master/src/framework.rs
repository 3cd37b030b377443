//! Framework notification channels
//!
//! The master never awaits a framework when it extends or rescinds an
//! offer. Each registered framework gets a handle backed by an unbounded
//! queue and a pump task, so notifications are fire-and-forget from the
//! master's side while staying strictly ordered per framework: a
//! rescission enqueued before an allocation pass is always observed
//! before that pass's offers.

use arbor_types::{FrameworkId, Offer, OfferId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// The master-to-framework notification surface
#[async_trait]
pub trait FrameworkChannel: Send + Sync {
    /// New offers extended to this framework
    async fn offers(&self, offers: Vec<Offer>);

    /// An outstanding offer was withdrawn; the framework must not act on it
    async fn offer_rescinded(&self, offer_id: OfferId);
}

enum FrameworkMessage {
    Offers(Vec<Offer>),
    Rescinded(OfferId),
}

/// Per-framework ordered delivery queue
///
/// Dropping the handle closes the queue; the pump drains what was already
/// enqueued and exits.
pub(crate) struct FrameworkHandle {
    tx: mpsc::UnboundedSender<FrameworkMessage>,
}

impl FrameworkHandle {
    pub(crate) fn new(framework_id: FrameworkId, channel: Arc<dyn FrameworkChannel>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    FrameworkMessage::Offers(offers) => channel.offers(offers).await,
                    FrameworkMessage::Rescinded(offer_id) => {
                        channel.offer_rescinded(offer_id).await
                    }
                }
            }
            debug!(framework_id = %framework_id, "Framework channel closed");
        });
        Self { tx }
    }

    /// A send to a departed framework is silently dropped.
    pub(crate) fn send_offers(&self, offers: Vec<Offer>) {
        let _ = self.tx.send(FrameworkMessage::Offers(offers));
    }

    pub(crate) fn send_rescinded(&self, offer_id: OfferId) {
        let _ = self.tx.send(FrameworkMessage::Rescinded(offer_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::{AgentId, ResourceSet};
    use std::time::Duration;

    struct Recording {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl FrameworkChannel for Recording {
        async fn offers(&self, offers: Vec<Offer>) {
            let _ = self.tx.send(format!("offers:{}", offers.len()));
        }

        async fn offer_rescinded(&self, _offer_id: OfferId) {
            let _ = self.tx.send("rescinded".to_string());
        }
    }

    #[tokio::test]
    async fn notifications_arrive_in_enqueue_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FrameworkHandle::new(FrameworkId::new("f1"), Arc::new(Recording { tx }));

        let offer = Offer::new(
            FrameworkId::new("f1"),
            AgentId::new("a1"),
            ResourceSet::parse("cpus:1").unwrap(),
        );
        handle.send_rescinded(offer.id);
        handle.send_offers(vec![offer]);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, "rescinded");
        assert_eq!(second, "offers:1");
    }
}
