use crate::error::Result;
use crate::peer::{Peer, PeerMessage};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receives messages that arrived from a peer
pub type MessageConsumer = Box<dyn Fn(PeerMessage) -> Result<()> + Send + Sync>;
/// Supplies the next message to send to a peer
pub type MessageSupplier = Box<dyn Fn() -> Result<Option<PeerMessage>> + Send + Sync>;

type SharedConsumer = Arc<dyn Fn(PeerMessage) -> Result<()> + Send + Sync>;
type SharedSupplier = Arc<dyn Fn() -> Result<Option<PeerMessage>> + Send + Sync>;

/// Routes messages between peer connections and the components handling them
pub trait MessageDispatcher: Send + Sync {
    fn add_message_consumer(&self, peer: &Peer, consumer: MessageConsumer);
    fn add_message_supplier(&self, peer: &Peer, supplier: MessageSupplier);
}

/// Both directions of a peer connection, as seen by the dispatcher
pub struct PeerLink {
    pub outbound: mpsc::Sender<PeerMessage>,
    pub inbound: mpsc::Receiver<PeerMessage>,
}

/// Dispatcher that pumps each peer over a pair of tokio channels
pub struct ChannelDispatcher {
    consumers: DashMap<Peer, Vec<SharedConsumer>>,
    suppliers: DashMap<Peer, Vec<SharedSupplier>>,
    poll_interval: Duration,
}

impl ChannelDispatcher {
    /// Most messages pulled from one supplier per tick
    const MAX_MESSAGES_PER_TICK: usize = 32;

    pub fn new(poll_interval: Duration) -> Self {
        Self {
            consumers: DashMap::new(),
            suppliers: DashMap::new(),
            poll_interval,
        }
    }

    /// Hand an inbound message to every consumer registered for the peer
    pub fn deliver(&self, peer: &Peer, message: PeerMessage) -> Result<()> {
        let consumers = self
            .consumers
            .get(peer)
            .map(|c| c.value().clone())
            .unwrap_or_default();
        for consumer in consumers {
            consumer(message.clone())?;
        }
        Ok(())
    }

    /// Drain the peer's suppliers for this tick
    pub fn poll(&self, peer: &Peer) -> Result<Vec<PeerMessage>> {
        let suppliers = self
            .suppliers
            .get(peer)
            .map(|s| s.value().clone())
            .unwrap_or_default();

        let mut messages = Vec::new();
        for supplier in suppliers {
            for _ in 0..Self::MAX_MESSAGES_PER_TICK {
                match supplier()? {
                    Some(message) => messages.push(message),
                    None => break,
                }
            }
        }
        Ok(messages)
    }

    pub fn remove_peer(&self, peer: &Peer) {
        self.consumers.remove(peer);
        self.suppliers.remove(peer);
    }

    /// Spawn the task pumping messages for one peer.
    ///
    /// The task ends when the remote side closes the link or an entry point
    /// fails; the peer's handlers are unregistered either way.
    pub fn connect(self: &Arc<Self>, peer: Peer, link: PeerLink) -> JoinHandle<Peer> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.pump(&peer, link).await {
                warn!("Dropping peer {}: {}", peer, e);
            }
            dispatcher.remove_peer(&peer);
            debug!("Stopped dispatching for peer {}", peer);
            peer
        })
    }

    async fn pump(&self, peer: &Peer, link: PeerLink) -> Result<()> {
        let PeerLink {
            outbound,
            mut inbound,
        } = link;
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.deliver(peer, message)?,
                    None => return Ok(()),
                },
                _ = ticker.tick() => {
                    for message in self.poll(peer)? {
                        if outbound.send(message).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

impl MessageDispatcher for ChannelDispatcher {
    fn add_message_consumer(&self, peer: &Peer, consumer: MessageConsumer) {
        self.consumers
            .entry(peer.clone())
            .or_default()
            .push(Arc::from(consumer));
    }

    fn add_message_supplier(&self, peer: &Peer, supplier: MessageSupplier) {
        self.suppliers
            .entry(peer.clone())
            .or_default()
            .push(Arc::from(supplier));
    }
}
