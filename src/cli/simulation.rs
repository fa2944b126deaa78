use crate::config::SchedulerConfig;
use crate::dispatch::{ChannelDispatcher, MessageDispatcher, PeerLink};
use crate::error::Result;
use crate::peer::{Peer, PeerMessage, ProtocolWorkerFactory};
use crate::piece::{
    Assignments, Bitfield, LocalBitfield, PieceSelector, PieceStatistics, RarestFirstSelector,
    SequentialSelector,
};
use crate::scheduler::SwarmScheduler;
use crate::torrent::TorrentId;
use bytes::Bytes;
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const CHANNEL_CAPACITY: usize = 64;

/// Order in which pieces are handed out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PieceOrder {
    #[default]
    RarestFirst,
    Sequential,
}

impl PieceOrder {
    fn selector(self) -> Box<dyn PieceSelector> {
        match self {
            PieceOrder::RarestFirst => Box::new(RarestFirstSelector),
            PieceOrder::Sequential => Box::new(SequentialSelector),
        }
    }
}

/// Settings for a simulated swarm
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub peers: usize,
    pub pieces: usize,
    /// Chance that a remote peer has any given piece
    pub coverage: f64,
    pub order: PieceOrder,
    pub seed: Option<u64>,
    pub deadline: Duration,
    pub config: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub torrent_id: TorrentId,
    pub pieces_total: usize,
    /// Pieces at least one remote peer had
    pub pieces_available: usize,
    pub pieces_downloaded: usize,
    pub elapsed: Duration,
}

impl SimulationReport {
    pub fn is_complete(&self) -> bool {
        self.pieces_downloaded == self.pieces_available
    }
}

/// Download from a swarm of in-process remote peers until every available
/// piece has arrived or the deadline passes
pub async fn run(options: SimulationOptions) -> Result<SimulationReport> {
    options.config.validate()?;

    let local = Arc::new(LocalBitfield::new(options.pieces));
    let statistics = Arc::new(PieceStatistics::new(options.pieces));
    let assignments = Arc::new(Assignments::new());
    let dispatcher = Arc::new(ChannelDispatcher::new(POLL_INTERVAL));

    let scheduler = SwarmScheduler::new(
        TorrentId::random(),
        Arc::clone(&local),
        Arc::clone(&assignments),
        Arc::clone(&statistics),
        options.order.selector(),
        Arc::clone(&dispatcher) as Arc<dyn MessageDispatcher>,
        Box::new(ProtocolWorkerFactory::new(
            Arc::clone(&statistics),
            Arc::clone(&assignments),
            Arc::clone(&local),
        )),
        options.config.clone(),
    );

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut available = Bitfield::new(options.pieces);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut links: Vec<JoinHandle<()>> = Vec::new();

    for i in 0..options.peers {
        let ip = Ipv4Addr::new(10, 0, (i / 250) as u8, (i % 250 + 1) as u8);
        let peer = Peer::with_peer_id(IpAddr::V4(ip), 6881, rng.gen());
        let mut bitfield = Bitfield::new(options.pieces);
        for piece_index in 0..options.pieces {
            if rng.gen_bool(options.coverage) {
                bitfield.set_piece(piece_index);
                available.set_piece(piece_index);
            }
        }

        let (to_remote, from_local) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_local, from_remote) = mpsc::channel(CHANNEL_CAPACITY);

        scheduler.add_peer(peer.clone());
        let pump = dispatcher.connect(
            peer.clone(),
            PeerLink {
                outbound: to_remote,
                inbound: from_remote,
            },
        );
        links.push(remove_when_closed(&scheduler, pump));
        tasks.push(tokio::spawn(remote_peer(peer, bitfield, from_local, to_local)));
    }

    info!(
        "Simulating torrent {}: {} peers, {}/{} pieces available",
        scheduler.torrent_id(),
        options.peers,
        available.count(),
        options.pieces
    );

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        let downloaded = local.snapshot().count();
        debug!(
            "Progress: {}/{} pieces, {} active peers",
            downloaded,
            available.count(),
            assignments.assignee_count()
        );
        if downloaded >= available.count() || started.elapsed() >= options.deadline {
            break;
        }
    }

    // closing the remote ends stops every pump, which removes its peer
    for handle in tasks {
        handle.abort();
    }
    for handle in links {
        if let Err(e) = handle.await {
            warn!("Link task failed: {}", e);
        }
    }

    Ok(SimulationReport {
        torrent_id: *scheduler.torrent_id(),
        pieces_total: options.pieces,
        pieces_available: available.count(),
        pieces_downloaded: local.snapshot().count(),
        elapsed: started.elapsed(),
    })
}

/// Remove the peer from the scheduler once its dispatcher pump stops
fn remove_when_closed(scheduler: &Arc<SwarmScheduler>, pump: JoinHandle<Peer>) -> JoinHandle<()> {
    let scheduler = Arc::downgrade(scheduler);
    tokio::spawn(async move {
        match pump.await {
            Ok(peer) => {
                if let Some(scheduler) = scheduler.upgrade() {
                    debug!("Link to {} closed", peer);
                    scheduler.remove_peer(&peer);
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Dispatcher task failed: {}", e),
        }
    })
}

/// A remote seed: announces its bitfield, unchokes whoever is interested and
/// answers requests for pieces it has
async fn remote_peer(
    peer: Peer,
    bitfield: Bitfield,
    mut from_local: mpsc::Receiver<PeerMessage>,
    to_local: mpsc::Sender<PeerMessage>,
) {
    let announce = PeerMessage::Bitfield {
        bitfield: Bytes::copy_from_slice(bitfield.as_bytes()),
    };
    if to_local.send(announce).await.is_err() {
        return;
    }

    while let Some(message) = from_local.recv().await {
        let reply = match message {
            PeerMessage::Interested => Some(PeerMessage::Unchoke),
            PeerMessage::NotInterested => Some(PeerMessage::Choke),
            PeerMessage::Request { block } if bitfield.has_piece(block.piece_index as usize) => {
                Some(PeerMessage::Piece {
                    piece_index: block.piece_index,
                    offset: block.offset,
                    data: Bytes::from(vec![0u8; block.length as usize]),
                })
            }
            _ => None,
        };
        if let Some(reply) = reply {
            if to_local.send(reply).await.is_err() {
                break;
            }
        }
    }
    debug!("Remote peer {} closed", peer);
}
