use crate::peer::Peer;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Which peer is responsible for downloading which piece
#[derive(Debug, Default)]
pub struct Assignments {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Only peers with at least one piece have an entry
    by_peer: HashMap<Peer, BTreeSet<usize>>,
    by_piece: HashMap<usize, Peer>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a piece to a peer.
    ///
    /// Returns false if the piece already has an owner, including this peer.
    pub fn assign_piece(&self, peer: &Peer, piece_index: usize) -> bool {
        let mut inner = self.inner.write();
        if inner.by_piece.contains_key(&piece_index) {
            return false;
        }
        inner.by_piece.insert(piece_index, peer.clone());
        inner
            .by_peer
            .entry(peer.clone())
            .or_default()
            .insert(piece_index);
        true
    }

    pub fn has_assignments(&self, peer: &Peer) -> bool {
        self.inner.read().by_peer.contains_key(peer)
    }

    pub fn assignment_count(&self, peer: &Peer) -> usize {
        self.inner.read().by_peer.get(peer).map_or(0, BTreeSet::len)
    }

    /// Number of distinct peers holding at least one assignment
    pub fn assignee_count(&self) -> usize {
        self.inner.read().by_peer.len()
    }

    pub fn assigned_pieces(&self, peer: &Peer) -> Vec<usize> {
        self.inner
            .read()
            .by_peer
            .get(peer)
            .map(|pieces| pieces.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn assignee(&self, piece_index: usize) -> Option<Peer> {
        self.inner.read().by_piece.get(&piece_index).cloned()
    }

    /// Release a single piece once the peer has delivered it
    pub fn complete_piece(&self, peer: &Peer, piece_index: usize) -> bool {
        let mut inner = self.inner.write();
        if inner.by_piece.get(&piece_index) != Some(peer) {
            return false;
        }
        inner.by_piece.remove(&piece_index);
        if let Some(pieces) = inner.by_peer.get_mut(peer) {
            pieces.remove(&piece_index);
            if pieces.is_empty() {
                inner.by_peer.remove(peer);
            }
        }
        true
    }

    /// Release every piece assigned to a peer, returning them
    pub fn remove_assignments(&self, peer: &Peer) -> Vec<usize> {
        let mut inner = self.inner.write();
        let pieces = inner.by_peer.remove(peer).unwrap_or_default();
        for piece_index in &pieces {
            inner.by_piece.remove(piece_index);
        }
        pieces.into_iter().collect()
    }
}
