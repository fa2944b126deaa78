mod message;
mod worker;

pub use message::{BlockInfo, PeerMessage};
pub use worker::{PeerWorker, PeerWorkerFactory, ProtocolWorker, ProtocolWorkerFactory};

use parking_lot::Mutex;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

/// Represents a peer in the swarm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: Option<[u8; 20]>,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: None,
        }
    }

    pub fn with_peer_id(ip: IpAddr, port: u16, peer_id: [u8; 20]) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: Some(peer_id),
        }
    }
}

impl From<SocketAddr> for Peer {
    fn from(addr: SocketAddr) -> Self {
        Self { addr, peer_id: None }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Connection state shared between a peer's worker and the scheduler
pub type SharedConnectionState = Arc<Mutex<ConnectionState>>;

// Peer connection states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// Whether we are choking the peer
    pub am_choking: bool,
    /// Whether we are interested in the peer
    pub am_interested: bool,
    /// Whether the peer is choking us
    pub peer_choking: bool,
    /// Whether the peer is interested in us
    pub peer_interested: bool,
    /// Piece currently being requested from the peer
    pub current_assignment: Option<usize>,
    /// When the last block for the current assignment arrived
    pub last_received_block: Option<Instant>,
}

impl ConnectionState {
    pub fn shared() -> SharedConnectionState {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Called by the scheduler when it takes the peer's assignments away
    pub fn on_unassign(&mut self) {
        self.current_assignment = None;
        self.last_received_block = None;
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            current_assignment: None,
            last_received_block: None,
        }
    }
}
