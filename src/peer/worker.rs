use super::{BlockInfo, ConnectionState, Peer, PeerMessage, SharedConnectionState};
use crate::piece::{Assignments, Bitfield, LocalBitfield, PieceStatistics, BLOCK_SIZE};
use crate::torrent::TorrentId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Processes the messages of a single peer connection
pub trait PeerWorker: Send + Sync {
    fn connection_state(&self) -> SharedConnectionState;

    /// Handle a message received from the peer
    fn accept(&self, message: PeerMessage);

    /// Next message to send to the peer, if any
    fn next_message(&self) -> Option<PeerMessage>;
}

pub trait PeerWorkerFactory: Send + Sync {
    fn create_peer_worker(&self, torrent_id: &TorrentId, peer: &Peer) -> Box<dyn PeerWorker>;
}

/// Default worker: keeps connection state, feeds piece statistics and
/// requests whatever the scheduler assigned to its peer.
///
/// A piece is requested as a single block, and a received block is treated as
/// a verified piece.
pub struct ProtocolWorker {
    peer: Peer,
    state: SharedConnectionState,
    statistics: Arc<PieceStatistics>,
    assignments: Arc<Assignments>,
    local: Arc<LocalBitfield>,
    outgoing: Mutex<VecDeque<PeerMessage>>,
    bitfield_sent: AtomicBool,
}

impl ProtocolWorker {
    pub fn new(
        peer: Peer,
        statistics: Arc<PieceStatistics>,
        assignments: Arc<Assignments>,
        local: Arc<LocalBitfield>,
    ) -> Self {
        Self {
            peer,
            state: ConnectionState::shared(),
            statistics,
            assignments,
            local,
            outgoing: Mutex::new(VecDeque::new()),
            bitfield_sent: AtomicBool::new(false),
        }
    }

    fn on_block(&self, piece_index: usize) {
        {
            let mut state = self.state.lock();
            state.last_received_block = Some(Instant::now());
            if state.current_assignment == Some(piece_index) {
                state.current_assignment = None;
            }
        }

        self.assignments.complete_piece(&self.peer, piece_index);
        if self.local.mark_verified(piece_index) {
            debug!("Piece {} received from {}", piece_index, self.peer);
            self.outgoing.lock().push_back(PeerMessage::Have {
                piece_index: piece_index as u32,
            });
        }
    }

    fn next_request(&self) -> Option<PeerMessage> {
        let mut state = self.state.lock();
        if state.peer_choking || state.current_assignment.is_some() {
            return None;
        }

        for piece_index in self.assignments.assigned_pieces(&self.peer) {
            if self.local.is_verified(piece_index) {
                self.assignments.complete_piece(&self.peer, piece_index);
                continue;
            }
            // the stall clock starts with the first block of this piece
            state.current_assignment = Some(piece_index);
            state.last_received_block = None;
            return Some(PeerMessage::Request {
                block: BlockInfo::new(piece_index as u32, 0, BLOCK_SIZE),
            });
        }
        None
    }
}

impl PeerWorker for ProtocolWorker {
    fn connection_state(&self) -> SharedConnectionState {
        Arc::clone(&self.state)
    }

    fn accept(&self, message: PeerMessage) {
        match message {
            PeerMessage::Choke => self.state.lock().peer_choking = true,
            PeerMessage::Unchoke => self.state.lock().peer_choking = false,
            PeerMessage::Interested => self.state.lock().peer_interested = true,
            PeerMessage::NotInterested => self.state.lock().peer_interested = false,
            PeerMessage::Have { piece_index } => {
                self.statistics.add_piece(&self.peer, piece_index as usize);
            }
            PeerMessage::Bitfield { bitfield } => {
                let piece_count = self.local.piece_count();
                self.statistics
                    .add_bitfield(&self.peer, Bitfield::from_bytes(bitfield, piece_count));
            }
            PeerMessage::Piece { piece_index, .. } => self.on_block(piece_index as usize),
            other => trace!("Ignoring message from {}: {:?}", self.peer, other),
        }
    }

    fn next_message(&self) -> Option<PeerMessage> {
        if !self.bitfield_sent.swap(true, Ordering::AcqRel) {
            let local = self.local.snapshot();
            if !local.is_empty() {
                return Some(PeerMessage::Bitfield {
                    bitfield: Bytes::copy_from_slice(local.as_bytes()),
                });
            }
        }

        if let Some(message) = self.outgoing.lock().pop_front() {
            return Some(message);
        }

        self.next_request()
    }
}

/// Creates a [`ProtocolWorker`] per peer, all sharing one torrent's state
pub struct ProtocolWorkerFactory {
    statistics: Arc<PieceStatistics>,
    assignments: Arc<Assignments>,
    local: Arc<LocalBitfield>,
}

impl ProtocolWorkerFactory {
    pub fn new(
        statistics: Arc<PieceStatistics>,
        assignments: Arc<Assignments>,
        local: Arc<LocalBitfield>,
    ) -> Self {
        Self {
            statistics,
            assignments,
            local,
        }
    }
}

impl PeerWorkerFactory for ProtocolWorkerFactory {
    fn create_peer_worker(&self, torrent_id: &TorrentId, peer: &Peer) -> Box<dyn PeerWorker> {
        trace!("Creating worker for {} on torrent {}", peer, torrent_id);
        Box::new(ProtocolWorker::new(
            peer.clone(),
            Arc::clone(&self.statistics),
            Arc::clone(&self.assignments),
            Arc::clone(&self.local),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    struct Fixture {
        statistics: Arc<PieceStatistics>,
        assignments: Arc<Assignments>,
        local: Arc<LocalBitfield>,
        peer: Peer,
        worker: ProtocolWorker,
    }

    fn fixture() -> Fixture {
        let statistics = Arc::new(PieceStatistics::new(8));
        let assignments = Arc::new(Assignments::new());
        let local = Arc::new(LocalBitfield::new(8));
        let peer = Peer::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6881);
        let worker = ProtocolWorker::new(
            peer.clone(),
            Arc::clone(&statistics),
            Arc::clone(&assignments),
            Arc::clone(&local),
        );
        Fixture {
            statistics,
            assignments,
            local,
            peer,
            worker,
        }
    }

    #[test]
    fn test_choke_and_bitfield_update_state() {
        let f = fixture();
        assert!(f.worker.connection_state().lock().peer_choking);

        f.worker.accept(PeerMessage::Unchoke);
        f.worker.accept(PeerMessage::Bitfield {
            bitfield: Bytes::from_static(&[0b0100_0000]),
        });
        f.worker.accept(PeerMessage::Have { piece_index: 6 });

        assert!(!f.worker.connection_state().lock().peer_choking);
        assert!(f.statistics.has_piece(&f.peer, 1));
        assert!(f.statistics.has_piece(&f.peer, 6));
        assert!(!f.statistics.has_piece(&f.peer, 0));
    }

    #[test]
    fn test_requests_assigned_piece_only_when_unchoked() {
        let f = fixture();
        f.assignments.assign_piece(&f.peer, 3);

        assert_eq!(f.worker.next_message(), None);

        f.worker.accept(PeerMessage::Unchoke);
        assert_eq!(
            f.worker.next_message(),
            Some(PeerMessage::Request {
                block: BlockInfo::new(3, 0, BLOCK_SIZE)
            })
        );
        assert_eq!(f.worker.connection_state().lock().current_assignment, Some(3));

        // one piece in flight at a time
        f.assignments.assign_piece(&f.peer, 4);
        assert_eq!(f.worker.next_message(), None);
    }

    #[test]
    fn test_received_piece_completes_and_announces() {
        let f = fixture();
        f.assignments.assign_piece(&f.peer, 3);
        f.worker.accept(PeerMessage::Unchoke);
        f.worker.next_message();

        f.worker.accept(PeerMessage::Piece {
            piece_index: 3,
            offset: 0,
            data: Bytes::from_static(b"block"),
        });

        let state = f.worker.connection_state().lock().clone();
        assert_eq!(state.current_assignment, None);
        assert!(state.last_received_block.is_some());
        assert!(f.local.is_verified(3));
        assert!(!f.assignments.has_assignments(&f.peer));
        assert_eq!(
            f.worker.next_message(),
            Some(PeerMessage::Have { piece_index: 3 })
        );
        assert_eq!(f.worker.next_message(), None);
    }

    #[test]
    fn test_new_request_forgets_previous_block_time() {
        let f = fixture();
        f.assignments.assign_piece(&f.peer, 3);
        f.worker.accept(PeerMessage::Unchoke);
        f.worker.next_message();
        f.worker.accept(PeerMessage::Piece {
            piece_index: 3,
            offset: 0,
            data: Bytes::from_static(b"block"),
        });
        assert_eq!(f.worker.next_message(), Some(PeerMessage::Have { piece_index: 3 }));

        f.assignments.assign_piece(&f.peer, 5);
        assert_eq!(
            f.worker.next_message(),
            Some(PeerMessage::Request {
                block: BlockInfo::new(5, 0, BLOCK_SIZE)
            })
        );

        let state = f.worker.connection_state().lock().clone();
        assert_eq!(state.current_assignment, Some(5));
        assert_eq!(state.last_received_block, None);
    }

    #[test]
    fn test_sends_local_bitfield_first() {
        let f = fixture();
        f.local.mark_verified(0);

        assert_eq!(
            f.worker.next_message(),
            Some(PeerMessage::Bitfield {
                bitfield: Bytes::from_static(&[0x80])
            })
        );
        assert_eq!(f.worker.next_message(), None);
    }
}
