mod assignments;
mod selector;
mod statistics;

pub use assignments::Assignments;
pub use selector::{PieceSelector, RarestFirstSelector, SequentialSelector};
pub use statistics::PieceStatistics;

use bytes::Bytes;
use parking_lot::RwLock;

/// Standard block size (16 KB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// A set of pieces, one bit per piece, numbered from the high bit of the first byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Creates a bitfield from a raw bitmask, padding or truncating to `piece_count`
    pub fn from_bytes(bytes: Bytes, piece_count: usize) -> Self {
        let mut bits = bytes.to_vec();
        bits.resize(piece_count.div_ceil(8), 0);

        let mut bitfield = Self { bits, piece_count };
        bitfield.clear_spare_bits();
        bitfield
    }

    pub fn full(piece_count: usize) -> Self {
        let mut bitfield = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        bitfield.clear_spare_bits();
        bitfield
    }

    pub fn has_piece(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        (self.bits[byte_index] >> bit_index) & 1 == 1
    }

    /// Sets the bit for a piece, returning true if it was not set before
    pub fn set_piece(&mut self, index: usize) -> bool {
        if index >= self.piece_count || self.has_piece(index) {
            return false;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] |= 1 << bit_index;
        true
    }

    /// Number of pieces present
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Pieces present here but absent from `other`
    pub fn and_not(&self, other: &Bitfield) -> Bitfield {
        let bits = self
            .bits
            .iter()
            .enumerate()
            .map(|(i, b)| b & !other.bits.get(i).copied().unwrap_or(0))
            .collect();
        Bitfield {
            bits,
            piece_count: self.piece_count,
        }
    }

    pub fn iter_pieces(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.piece_count).filter(|&i| self.has_piece(i))
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare > 0 && spare < 8 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
    }
}

/// The pieces this node has downloaded and verified.
///
/// Written by whoever verifies pieces, read by the scheduler.
#[derive(Debug)]
pub struct LocalBitfield {
    inner: RwLock<Bitfield>,
}

impl LocalBitfield {
    pub fn new(piece_count: usize) -> Self {
        Self::from_bitfield(Bitfield::new(piece_count))
    }

    pub fn from_bitfield(bitfield: Bitfield) -> Self {
        Self {
            inner: RwLock::new(bitfield),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.inner.read().piece_count()
    }

    pub fn pieces_remaining(&self) -> usize {
        let bitfield = self.inner.read();
        bitfield.piece_count() - bitfield.count()
    }

    pub fn is_verified(&self, piece_index: usize) -> bool {
        self.inner.read().has_piece(piece_index)
    }

    /// Returns true if the piece was not verified before
    pub fn mark_verified(&self, piece_index: usize) -> bool {
        self.inner.write().set_piece(piece_index)
    }

    pub fn snapshot(&self) -> Bitfield {
        self.inner.read().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.pieces_remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitfield_msb_first() {
        let bitfield = Bitfield::from_bytes(Bytes::from_static(&[0x80, 0x01]), 16);

        assert!(bitfield.has_piece(0));
        assert!(!bitfield.has_piece(1));
        assert!(bitfield.has_piece(15));
        assert!(!bitfield.has_piece(16));
        assert_eq!(bitfield.iter_pieces().collect::<Vec<_>>(), vec![0, 15]);
    }

    #[test]
    fn test_from_bytes_clears_spare_bits() {
        let bitfield = Bitfield::from_bytes(Bytes::from_static(&[0xFF]), 5);

        assert_eq!(bitfield.count(), 5);
        assert_eq!(bitfield.as_bytes(), &[0xF8]);
        assert_eq!(Bitfield::full(10).count(), 10);
    }

    #[test]
    fn test_and_not() {
        let mut theirs = Bitfield::new(10);
        let mut ours = Bitfield::new(10);
        theirs.set_piece(2);
        theirs.set_piece(7);
        ours.set_piece(2);

        let interesting = theirs.and_not(&ours);
        assert_eq!(interesting.iter_pieces().collect::<Vec<_>>(), vec![7]);

        ours.set_piece(7);
        assert!(theirs.and_not(&ours).is_empty());
    }

    #[test]
    fn test_local_bitfield_remaining() {
        let local = LocalBitfield::new(4);
        assert_eq!(local.pieces_remaining(), 4);

        assert!(local.mark_verified(1));
        assert!(!local.mark_verified(1));
        assert!(!local.mark_verified(4));

        assert!(local.is_verified(1));
        assert_eq!(local.pieces_remaining(), 3);
        assert!(!local.is_complete());
    }
}
