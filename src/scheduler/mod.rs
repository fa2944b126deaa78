//! Per-torrent swarm scheduling.
//!
//! [`SwarmScheduler`] owns the connected peers of one torrent, decides which
//! piece is requested from which peer, and keeps our interest signalling in
//! line with what each peer can offer. There is no scheduler task: every
//! `produce` call checks whether a scheduling pass is due and runs it inline.

mod registry;
mod status;


pub use registry::{AnnouncingWorker, PeerRegistry};
pub use status::AssignmentStatus;

use crate::config::SchedulerConfig;
use crate::dispatch::MessageDispatcher;
use crate::error::{Result, SwarmError};
use crate::peer::{Peer, PeerMessage, PeerWorkerFactory, SharedConnectionState};
use crate::piece::{Assignments, Bitfield, LocalBitfield, PieceSelector, PieceStatistics};
use crate::torrent::TorrentId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A pass may run this often while there is work to hand out
pub const UPDATE_ASSIGNMENTS_OPTIONAL_INTERVAL: Duration = Duration::from_secs(1);
/// A pass runs at least this often regardless
pub const UPDATE_ASSIGNMENTS_MANDATORY_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_ASSIGNED_PIECES_PER_PEER: usize = 50;

/// Decide whether a scheduling pass is due.
///
/// `elapsed` is `None` before the first pass.
pub fn should_update_assignments(
    elapsed: Option<Duration>,
    pieces_remaining: usize,
    assignee_count: usize,
    max_active_peers: usize,
) -> bool {
    let Some(elapsed) = elapsed else {
        return true;
    };
    (pieces_remaining > 0
        && elapsed > UPDATE_ASSIGNMENTS_OPTIONAL_INTERVAL
        && assignee_count < max_active_peers)
        || elapsed > UPDATE_ASSIGNMENTS_MANDATORY_INTERVAL
}

/// Working sets carried from one scheduling pass to the next
#[derive(Default)]
struct PassState {
    /// Peers worth evaluating, with the status seen in the last pass
    interesting: HashMap<Peer, AssignmentStatus>,
    /// Peers whose assignments were reclaimed for stalling in the last pass
    timed_out: HashSet<Peer>,
}

pub struct SwarmScheduler {
    torrent_id: TorrentId,
    local: Arc<LocalBitfield>,
    assignments: Arc<Assignments>,
    statistics: Arc<PieceStatistics>,
    selector: Box<dyn PieceSelector>,
    dispatcher: Arc<dyn MessageDispatcher>,
    worker_factory: Box<dyn PeerWorkerFactory>,
    config: SchedulerConfig,

    registry: Arc<PeerRegistry>,
    disconnected: Mutex<VecDeque<Peer>>,
    interest_updates: DashMap<Peer, PeerMessage>,
    last_updated: Mutex<Option<Instant>>,
    pass: Mutex<PassState>,
}

impl SwarmScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        torrent_id: TorrentId,
        local: Arc<LocalBitfield>,
        assignments: Arc<Assignments>,
        statistics: Arc<PieceStatistics>,
        selector: Box<dyn PieceSelector>,
        dispatcher: Arc<dyn MessageDispatcher>,
        worker_factory: Box<dyn PeerWorkerFactory>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            torrent_id,
            local,
            assignments,
            statistics,
            selector,
            dispatcher,
            worker_factory,
            config,
            registry: Arc::new(PeerRegistry::new()),
            disconnected: Mutex::new(VecDeque::new()),
            interest_updates: DashMap::new(),
            last_updated: Mutex::new(None),
            pass: Mutex::new(PassState::default()),
        })
    }

    pub fn torrent_id(&self) -> &TorrentId {
        &self.torrent_id
    }

    /// Called when a peer joins the torrent; a no-op for a known peer
    pub fn add_peer(self: &Arc<Self>, peer: Peer) {
        let delegate = self
            .worker_factory
            .create_peer_worker(&self.torrent_id, &peer);
        let worker = AnnouncingWorker::new(peer.clone(), delegate, &self.registry);
        if !self.registry.insert_if_absent(peer.clone(), worker) {
            return;
        }

        let scheduler = Arc::downgrade(self);
        let consumer_peer = peer.clone();
        self.dispatcher.add_message_consumer(
            &peer,
            Box::new(move |message: PeerMessage| -> Result<()> {
                let scheduler = scheduler.upgrade().ok_or(SwarmError::WorkerClosed)?;
                scheduler.consume(&consumer_peer, message)
            }),
        );

        let scheduler = Arc::downgrade(self);
        let supplier_peer = peer.clone();
        self.dispatcher.add_message_supplier(
            &peer,
            Box::new(move || -> Result<Option<PeerMessage>> {
                let scheduler = scheduler.upgrade().ok_or(SwarmError::WorkerClosed)?;
                scheduler.produce(&supplier_peer)
            }),
        );

        debug!("Added connection for peer: {}", peer);
    }

    /// Called when a peer leaves the torrent; a no-op for an unknown peer.
    ///
    /// Its statistics and assignments are released by the next pass.
    pub fn remove_peer(&self, peer: &Peer) {
        if self.registry.remove(peer) {
            self.disconnected.lock().push_back(peer.clone());
            debug!("Removed connection for peer: {}", peer);
        }
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.registry.peers()
    }

    /// `None` if the peer is not connected to this torrent
    pub fn connection_state(&self, peer: &Peer) -> Option<SharedConnectionState> {
        self.registry.get(peer).map(|worker| worker.connection_state())
    }

    /// Hand a message received from a peer to its worker
    pub fn consume(&self, peer: &Peer, message: PeerMessage) -> Result<()> {
        self.worker(peer)?.accept(message);
        Ok(())
    }

    /// Next message to send to a peer.
    ///
    /// A pending interest change goes first, then announcements from other
    /// peers, then the peer's own worker.
    pub fn produce(&self, peer: &Peer) -> Result<Option<PeerMessage>> {
        let worker = self.worker(peer)?;
        if self.might_update_assignments() {
            self.run_pass(false)?;
        }

        if let Some((_, message)) = self.interest_updates.remove(peer) {
            return Ok(Some(message));
        }
        Ok(worker.next_message())
    }

    /// Run a scheduling pass now, unless another one is in progress.
    ///
    /// Returns whether a pass ran.
    pub fn update_assignments(&self) -> Result<bool> {
        self.run_pass(true)
    }

    /// Peers currently tracked for re-evaluation, with their last status
    pub fn interesting_peers(&self) -> HashMap<Peer, AssignmentStatus> {
        self.pass.lock().interesting.clone()
    }

    pub fn timed_out_peers(&self) -> HashSet<Peer> {
        self.pass.lock().timed_out.clone()
    }

    pub fn pending_interest_update(&self, peer: &Peer) -> Option<PeerMessage> {
        self.interest_updates.get(peer).map(|m| m.value().clone())
    }

    fn worker(&self, peer: &Peer) -> Result<Arc<AnnouncingWorker>> {
        self.registry
            .get(peer)
            .ok_or_else(|| SwarmError::UnknownPeer(peer.clone()))
    }

    fn elapsed_since_update(&self) -> Option<Duration> {
        self.last_updated.lock().map(|at| at.elapsed())
    }

    fn might_update_assignments(&self) -> bool {
        should_update_assignments(
            self.elapsed_since_update(),
            self.local.pieces_remaining(),
            self.assignments.assignee_count(),
            self.config.max_concurrently_active_peer_connections_per_torrent,
        )
    }

    fn run_pass(&self, force: bool) -> Result<bool> {
        let Some(mut pass) = self.pass.try_lock() else {
            return Ok(false);
        };
        // another caller may have finished a pass while we were deciding
        if !force && !self.might_update_assignments() {
            return Ok(false);
        }

        let result = self.update(&mut pass);
        *self.last_updated.lock() = Some(Instant::now());
        result.map(|_| true)
    }

    fn update(&self, pass: &mut PassState) -> Result<()> {
        self.interest_updates.clear();

        let disconnected: Vec<Peer> = self.disconnected.lock().drain(..).collect();
        for peer in disconnected {
            self.statistics.remove_bitfield(&peer);
            let released = self.assignments.remove_assignments(&peer);
            pass.interesting.remove(&peer);
            pass.timed_out.remove(&peer);
            trace!("Cleaned up disconnected peer {}, released pieces {:?}", peer, released);
        }
        pass.timed_out.clear();

        let now = Instant::now();
        let mut ready: Vec<Peer> = Vec::new();
        let mut choking: Vec<Peer> = Vec::new();

        let tracked: Vec<Peer> = pass.interesting.keys().cloned().collect();
        for peer in tracked {
            let Some(worker) = self.registry.get(&peer) else {
                // removed since the queue was drained; cleaned up next pass
                pass.interesting.remove(&peer);
                continue;
            };
            let state = worker.connection_state();
            let status = self.status_of(&peer, &state, now);

            match status {
                AssignmentStatus::Timeout => {
                    pass.interesting.remove(&peer);
                    self.unassign(&peer, &state);
                    trace!("Peer assignment removed due to TIMEOUT: peer {}", peer);
                    pass.timed_out.insert(peer);
                }
                AssignmentStatus::Ready => {
                    pass.interesting.insert(peer.clone(), status);
                    trace!("Peer is READY for next assignment: peer {}", peer);
                    ready.push(peer);
                }
                AssignmentStatus::Choking => {
                    pass.interesting.insert(peer.clone(), status);
                    if self.assignments.has_assignments(&peer) {
                        self.unassign(&peer, &state);
                        trace!("Peer assignment removed due to CHOKING: peer {}", peer);
                    }
                    choking.push(peer);
                }
                AssignmentStatus::Active => {
                    pass.interesting.insert(peer.clone(), status);
                    trace!("Peer assignment is ACTIVE: peer {}", peer);
                }
            }
        }

        for peer in self.registry.peers() {
            if pass.interesting.contains_key(&peer) || pass.timed_out.contains(&peer) {
                continue;
            }
            let Some(worker) = self.registry.get(&peer) else {
                continue;
            };
            if worker.connection_state().lock().peer_choking {
                choking.push(peer);
            } else {
                ready.push(peer);
            }
        }

        let local = self.local.snapshot();
        self.assign_pieces(pass, &mut ready, &local)?;

        for peer in &ready {
            if self.assignments.has_assignments(peer) {
                continue;
            }
            if self.has_interesting_pieces(peer, &local) {
                pass.interesting
                    .entry(peer.clone())
                    .or_insert(AssignmentStatus::Ready);
            } else {
                self.mark_not_interested(peer);
                pass.interesting.remove(peer);
            }
        }

        for peer in &choking {
            if self.has_interesting_pieces(peer, &local) {
                pass.interesting
                    .entry(peer.clone())
                    .or_insert(AssignmentStatus::Choking);
            } else {
                self.mark_not_interested(peer);
                pass.interesting.remove(peer);
            }
        }

        for peer in pass.interesting.keys() {
            self.mark_interested(peer);
        }

        debug!(
            "Updated assignments for torrent {}: {} interesting, {} assignees, {} timed out",
            self.torrent_id,
            pass.interesting.len(),
            self.assignments.assignee_count(),
            pass.timed_out.len()
        );
        Ok(())
    }

    /// Hand out pieces, rarest first, to the ready peers that have them.
    ///
    /// A piece goes to at most one peer; peers that reach the per-peer cap
    /// leave `ready`.
    fn assign_pieces(
        &self,
        pass: &mut PassState,
        ready: &mut Vec<Peer>,
        local: &Bitfield,
    ) -> Result<()> {
        let max_active = self.config.max_concurrently_active_peer_connections_per_torrent;
        ready.sort_by_key(|peer| peer.addr);

        for piece_index in self.selector.next_pieces(&self.statistics) {
            if ready.is_empty() || self.assignments.assignee_count() >= max_active {
                break;
            }
            if local.has_piece(piece_index) {
                continue;
            }

            let mut saturated = None;
            for (i, peer) in ready.iter().enumerate() {
                if !self.statistics.has_piece(peer, piece_index)
                    || !self.assignments.assign_piece(peer, piece_index)
                {
                    continue;
                }

                let count = self.assignments.assignment_count(peer);
                if count > MAX_ASSIGNED_PIECES_PER_PEER {
                    return Err(SwarmError::InternalInvariantViolation(format!(
                        "peer {} holds {} assignments",
                        peer, count
                    )));
                }
                pass.interesting.insert(peer.clone(), AssignmentStatus::Active);
                if count == MAX_ASSIGNED_PIECES_PER_PEER {
                    saturated = Some(i);
                }
                break;
            }

            if let Some(i) = saturated {
                ready.remove(i);
            }
        }
        Ok(())
    }

    fn status_of(&self, peer: &Peer, state: &SharedConnectionState, now: Instant) -> AssignmentStatus {
        let has_assignments = self.assignments.has_assignments(peer);
        AssignmentStatus::determine(
            &state.lock(),
            has_assignments,
            self.config.max_piece_receiving_time,
            now,
        )
    }

    fn unassign(&self, peer: &Peer, state: &SharedConnectionState) {
        self.assignments.remove_assignments(peer);
        state.lock().on_unassign();
    }

    /// Does the peer have anything we lack; unknown peers have nothing
    fn has_interesting_pieces(&self, peer: &Peer, local: &Bitfield) -> bool {
        self.statistics
            .peer_bitfield(peer)
            .is_some_and(|bitfield| !bitfield.and_not(local).is_empty())
    }

    fn mark_interested(&self, peer: &Peer) {
        self.set_interest(peer, true, PeerMessage::Interested);
    }

    fn mark_not_interested(&self, peer: &Peer) {
        self.set_interest(peer, false, PeerMessage::NotInterested);
    }

    fn set_interest(&self, peer: &Peer, interested: bool, message: PeerMessage) {
        let Some(worker) = self.registry.get(peer) else {
            return;
        };
        let state = worker.connection_state();
        let mut state = state.lock();
        if state.am_interested != interested {
            state.am_interested = interested;
            self.interest_updates.insert(peer.clone(), message);
        }
    }
}
