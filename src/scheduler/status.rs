use crate::peer::ConnectionState;
use std::time::{Duration, Instant};

/// Where a peer stands with respect to piece assignments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStatus {
    /// The peer is choking us; nothing may be requested from it
    Choking,
    /// Unchoked and holding no assignment
    Ready,
    /// Holding assignments and delivering within the time budget
    Active,
    /// Holding an assignment that has stalled
    Timeout,
}

impl AssignmentStatus {
    /// Derive a peer's status from its connection state.
    ///
    /// The stall check only applies once a block has arrived for the current
    /// assignment; a peer that has not delivered anything yet stays `Active`.
    pub fn determine(
        state: &ConnectionState,
        has_assignments: bool,
        max_piece_receiving_time: Duration,
        now: Instant,
    ) -> Self {
        if state.peer_choking {
            return AssignmentStatus::Choking;
        }
        if !has_assignments {
            return AssignmentStatus::Ready;
        }

        if let (Some(_), Some(last_block)) = (state.current_assignment, state.last_received_block) {
            if now.saturating_duration_since(last_block) > max_piece_receiving_time {
                return AssignmentStatus::Timeout;
            }
        }
        AssignmentStatus::Active
    }
}
