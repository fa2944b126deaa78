use crate::peer::{Peer, PeerMessage, PeerWorker, SharedConnectionState};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// The peers currently connected to a torrent, keyed by peer
#[derive(Default)]
pub struct PeerRegistry {
    workers: DashMap<Peer, Arc<AnnouncingWorker>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, leaving the registry untouched, if the peer is already present
    pub fn insert_if_absent(&self, peer: Peer, worker: AnnouncingWorker) -> bool {
        match self.workers.entry(peer) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(worker));
                true
            }
        }
    }

    pub fn remove(&self, peer: &Peer) -> bool {
        self.workers.remove(peer).is_some()
    }

    pub fn get(&self, peer: &Peer) -> Option<Arc<AnnouncingWorker>> {
        self.workers.get(peer).map(|w| Arc::clone(w.value()))
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.workers.iter().map(|w| w.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Queue an announcement on every registered peer except `origin`
    fn announce(&self, origin: &Peer, message: &PeerMessage) {
        for worker in self.workers.iter() {
            if worker.key() != origin {
                worker.value().announcements.lock().push_back(message.clone());
            }
        }
    }
}

/// Wraps a peer's worker so that the pieces it announces reach every other peer
pub struct AnnouncingWorker {
    peer: Peer,
    delegate: Box<dyn PeerWorker>,
    registry: Weak<PeerRegistry>,
    /// Announcements from other peers, waiting to go out to this one
    announcements: Mutex<VecDeque<PeerMessage>>,
}

impl AnnouncingWorker {
    pub fn new(peer: Peer, delegate: Box<dyn PeerWorker>, registry: &Arc<PeerRegistry>) -> Self {
        Self {
            peer,
            delegate,
            registry: Arc::downgrade(registry),
            announcements: Mutex::new(VecDeque::new()),
        }
    }

    pub fn connection_state(&self) -> SharedConnectionState {
        self.delegate.connection_state()
    }

    pub fn accept(&self, message: PeerMessage) {
        self.delegate.accept(message);
    }

    /// Queued announcements go first, then the delegate's own traffic
    pub fn next_message(&self) -> Option<PeerMessage> {
        if let Some(message) = self.announcements.lock().pop_front() {
            return Some(message);
        }

        let message = self.delegate.next_message()?;
        if message.announced_piece().is_some() {
            if let Some(registry) = self.registry.upgrade() {
                registry.announce(&self.peer, &message);
            }
        }
        Some(message)
    }

    pub fn pending_announcements(&self) -> usize {
        self.announcements.lock().len()
    }
}
