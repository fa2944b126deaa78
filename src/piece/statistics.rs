use super::Bitfield;
use crate::peer::Peer;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Tracks which peer has which pieces, and how many peers have each piece
#[derive(Debug)]
pub struct PieceStatistics {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    bitfields: HashMap<Peer, Bitfield>,
    /// How many peers have each piece (for rarest-first)
    availability: Vec<u32>,
}

impl PieceStatistics {
    pub fn new(piece_count: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                bitfields: HashMap::new(),
                availability: vec![0; piece_count],
            }),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.inner.read().availability.len()
    }

    /// Record a peer's full bitfield, replacing whatever was known before
    pub fn add_bitfield(&self, peer: &Peer, bitfield: Bitfield) {
        let mut inner = self.inner.write();
        if let Some(previous) = inner.bitfields.remove(peer) {
            inner.release(&previous);
        }
        for piece_index in bitfield.iter_pieces() {
            if let Some(count) = inner.availability.get_mut(piece_index) {
                *count += 1;
            }
        }
        inner.bitfields.insert(peer.clone(), bitfield);
    }

    /// Record a single Have from a peer
    pub fn add_piece(&self, peer: &Peer, piece_index: usize) {
        let mut inner = self.inner.write();
        let piece_count = inner.availability.len();
        let added = inner
            .bitfields
            .entry(peer.clone())
            .or_insert_with(|| Bitfield::new(piece_count))
            .set_piece(piece_index);
        if added {
            inner.availability[piece_index] += 1;
        }
    }

    pub fn peer_bitfield(&self, peer: &Peer) -> Option<Bitfield> {
        self.inner.read().bitfields.get(peer).cloned()
    }

    /// False when the peer's bitfield is unknown
    pub fn has_piece(&self, peer: &Peer, piece_index: usize) -> bool {
        self.inner
            .read()
            .bitfields
            .get(peer)
            .is_some_and(|bitfield| bitfield.has_piece(piece_index))
    }

    pub fn remove_bitfield(&self, peer: &Peer) -> Option<Bitfield> {
        let mut inner = self.inner.write();
        let removed = inner.bitfields.remove(peer)?;
        inner.release(&removed);
        Some(removed)
    }

    pub fn availability(&self, piece_index: usize) -> u32 {
        self.inner
            .read()
            .availability
            .get(piece_index)
            .copied()
            .unwrap_or(0)
    }

    /// Availability of every piece, indexed by piece
    pub fn availability_snapshot(&self) -> Vec<u32> {
        self.inner.read().availability.clone()
    }
}

impl Inner {
    fn release(&mut self, bitfield: &Bitfield) {
        for piece_index in bitfield.iter_pieces() {
            if let Some(count) = self.availability.get_mut(piece_index) {
                *count = count.saturating_sub(1);
            }
        }
    }
}
