use bytes::Bytes;

/// Information about a block within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Piece index
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// Logical messages exchanged between peers.
///
/// Encoding to and from the wire is the transport's job; the scheduler only
/// looks at `Interested`, `NotInterested` and `Have`, and passes the rest
/// through to the peer's worker untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Keep-alive message (no payload)
    KeepAlive,
    /// Choke the peer
    Choke,
    /// Unchoke the peer
    Unchoke,
    /// Indicate interest
    Interested,
    /// Indicate lack of interest
    NotInterested,
    /// Indicate possession of a piece
    Have { piece_index: u32 },
    /// Bitfield of available pieces
    Bitfield { bitfield: Bytes },
    /// Request a block
    Request { block: BlockInfo },
    /// Send a block
    Piece {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
    /// Cancel a block request
    Cancel { block: BlockInfo },
}

impl PeerMessage {
    /// Piece index carried by a piece-available announcement
    pub fn announced_piece(&self) -> Option<usize> {
        match self {
            PeerMessage::Have { piece_index } => Some(*piece_index as usize),
            _ => None,
        }
    }
}
