// Static evaluation of Ultimate Tic-Tac-Toe positions
//
// Scores are always from the POV of `perspective`. Cells and regions share one
// 3-tier weight table (center > edge > corner); a won region counts
// `region_multiplier` times the weight of a single cell in the same tier.

use crate::board::Board;
use crate::config::ScoresConfig;
use crate::types::{Move, Outcome, Side, CELLS_PER_REGION, REGION_COUNT};

/// Evaluation weights resolved from configuration
#[derive(Debug, Clone)]
pub struct Heuristic {
    tier_weights: [i32; 9],
    region_multiplier: i32,
    win_score: i32,
    draw_penalty: i32,
}

impl Heuristic {
    pub fn new(scores: &ScoresConfig) -> Self {
        let c = scores.weight_corner;
        let e = scores.weight_edge;
        let m = scores.weight_center;
        Heuristic {
            tier_weights: [c, e, c, e, m, e, c, e, c],
            region_multiplier: scores.region_multiplier,
            win_score: scores.win_score,
            draw_penalty: scores.draw_penalty,
        }
    }

    /// Upper bound on any score this heuristic can produce, used as the search window
    pub fn infinity(&self) -> i32 {
        self.win_score + 1
    }

    pub fn win_score(&self) -> i32 {
        self.win_score
    }

    /// Score of a finished board. `ply` is the distance from the search root:
    /// faster wins and slower losses score better. A draw costs the root side
    /// `draw_penalty`, so it is scored negative at even plies and positive at odd ones.
    pub fn terminal(&self, outcome: Outcome, perspective: Side, ply: u32) -> i32 {
        let ply = ply as i32;
        match outcome {
            Outcome::WonBy(side) if side == perspective => self.win_score - ply,
            Outcome::WonBy(_) => -(self.win_score - ply),
            Outcome::Draw if ply % 2 == 0 => -self.draw_penalty,
            Outcome::Draw => self.draw_penalty,
        }
    }

    /// Weighted material count for a non-terminal board
    pub fn evaluate(&self, board: &Board, perspective: Side) -> i32 {
        let mut score = 0;
        for region in 0..REGION_COUNT {
            let region_weight = self.tier_weights[region];
            match board.region_outcome(region) {
                Some(Outcome::WonBy(side)) => {
                    score += sign(side, perspective) * region_weight * self.region_multiplier;
                }
                Some(Outcome::Draw) => {}
                None => {
                    for cell in 0..CELLS_PER_REGION {
                        if let Some(side) = Move::new(region, cell).and_then(|mv| board.cell(mv)) {
                            score += sign(side, perspective) * self.tier_weights[cell];
                        }
                    }
                }
            }
        }
        score
    }

    /// Terminal score if the board is finished, static evaluation otherwise
    pub fn score(&self, board: &Board, perspective: Side, ply: u32) -> i32 {
        match board.outcome() {
            Some(outcome) => self.terminal(outcome, perspective, ply),
            None => self.evaluate(board, perspective),
        }
    }
}

fn sign(side: Side, perspective: Side) -> i32 {
    if side == perspective {
        1
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn heuristic() -> Heuristic {
        Heuristic::new(&Config::default_hardcoded().scores)
    }

    #[test]
    fn test_empty_board_is_even() {
        assert_eq!(heuristic().evaluate(&Board::new(), Side::X), 0);
    }

    #[test]
    fn test_center_beats_edge_beats_corner() {
        let h = heuristic();
        let center = Board::from_moves(&[Move::new(0, 4).unwrap()]).unwrap();
        let edge = Board::from_moves(&[Move::new(0, 1).unwrap()]).unwrap();
        let corner = Board::from_moves(&[Move::new(0, 0).unwrap()]).unwrap();
        let (c, e, k) = (h.evaluate(&center, Side::X), h.evaluate(&edge, Side::X), h.evaluate(&corner, Side::X));
        assert!(c > e && e > k && k > 0);
        assert_eq!(h.evaluate(&center, Side::O), -c);
    }

    #[test]
    fn test_terminal_ordering() {
        let h = heuristic();
        let win = h.terminal(Outcome::WonBy(Side::X), Side::X, 3);
        let draw = h.terminal(Outcome::Draw, Side::X, 3);
        let loss = h.terminal(Outcome::WonBy(Side::O), Side::X, 3);
        assert!(loss < draw && draw < win);
        assert!(h.terminal(Outcome::WonBy(Side::X), Side::X, 1) > win);
        assert!(win < h.infinity());
    }

    #[test]
    fn test_draw_costs_the_root_side() {
        let h = heuristic();
        // Root to move at ply 2, opponent to move at ply 1: both views agree the root pays
        assert_eq!(h.terminal(Outcome::Draw, Side::X, 2), -50);
        assert_eq!(h.terminal(Outcome::Draw, Side::O, 1), 50);
    }

    #[test]
    fn test_won_region_outweighs_cells() {
        let h = heuristic();
        let mv = |r, c| Move::new(r, c).unwrap();
        let board = Board::from_moves(&[mv(4, 0), mv(0, 4), mv(4, 1), mv(1, 4), mv(4, 2)]).unwrap();
        // Region 4 (center, weight 3) won by X: 30, minus O's two center cells (3 each).
        assert_eq!(h.evaluate(&board, Side::X), 30 - 6);
    }
}
