use super::PieceStatistics;

/// Ranks pieces for download, highest priority first.
///
/// The returned ranking is consumed once per scheduling pass. Pieces the
/// local node already has may still appear; the scheduler skips them.
pub trait PieceSelector: Send + Sync {
    fn next_pieces(&self, statistics: &PieceStatistics) -> Vec<usize>;
}

/// Selects pieces using rarest-first strategy
#[derive(Debug, Default, Clone, Copy)]
pub struct RarestFirstSelector;

impl PieceSelector for RarestFirstSelector {
    fn next_pieces(&self, statistics: &PieceStatistics) -> Vec<usize> {
        let availability = statistics.availability_snapshot();

        // Pieces nobody has cannot be requested from anyone
        let mut pieces: Vec<usize> = (0..availability.len())
            .filter(|&i| availability[i] > 0)
            .collect();
        pieces.sort_by_key(|&i| (availability[i], i));
        pieces
    }
}

/// Selects available pieces in index order
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialSelector;

impl PieceSelector for SequentialSelector {
    fn next_pieces(&self, statistics: &PieceStatistics) -> Vec<usize> {
        statistics
            .availability_snapshot()
            .into_iter()
            .enumerate()
            .filter(|&(_, count)| count > 0)
            .map(|(i, _)| i)
            .collect()
    }
}
