// Time-boxed adversarial search for the AI actor
//
// Two strategy objects live here:
// - `NegamaxSearch`: alpha-beta negamax, iteratively deepened up to a fixed depth,
//   with the fixed center opening on an empty board
// - `CasualSearch`: shallow minimax without pruning plus random move injection,
//   used for the easy difficulty
//
// Both poll their `Deadline` at every node and unwind as soon as it expires.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use crate::board::Board;
use crate::config::Config;
use crate::deadline::Deadline;
use crate::heuristic::Heuristic;
use crate::match_state::SearchParams;
use crate::types::{Move, CELL_COUNT};

/// Summary of one search call
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    /// Best move found, `None` only if the very first node already timed out
    pub best_move: Option<Move>,
    /// Negamax score of `best_move` from the POV of the side to move
    pub score: i32,
    /// Deepest fully completed iteration, 0 if none completed
    pub completed_depth: u32,
    pub nodes: u64,
    pub elapsed: Duration,
}

/// Outcome of one root iteration
enum RootResult {
    Complete(Move, i32),
    /// The deadline fired; carries the best fully searched root child, if any
    Aborted(Option<(Move, i32)>),
}

/// Picks a uniformly random legal move, the fallback when a search returns nothing
pub fn random_legal_move(board: &Board, rng: &mut impl Rng) -> Option<Move> {
    board.legal_moves().choose(rng).copied()
}

/// Alpha-beta negamax with iterative deepening
#[derive(Debug)]
pub struct NegamaxSearch {
    depth: u32,
    heuristic: Heuristic,
    randomize_ties: bool,
    rng: StdRng,
    nodes: u64,
}

impl NegamaxSearch {
    pub fn new(depth: u32, heuristic: Heuristic, randomize_ties: bool, rng: StdRng) -> Self {
        NegamaxSearch {
            depth: depth.max(1),
            heuristic,
            randomize_ties,
            rng,
            nodes: 0,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Searches `board` for the side to move until `depth` is completed or the deadline fires
    pub fn search(&mut self, board: &Board, deadline: &Deadline) -> SearchReport {
        let start_time = Instant::now();
        self.nodes = 0;

        let report = |best: Option<(Move, i32)>, completed_depth: u32, nodes: u64| SearchReport {
            best_move: best.map(|(mv, _)| mv),
            score: best.map_or(0, |(_, score)| score),
            completed_depth,
            nodes,
            elapsed: start_time.elapsed(),
        };

        if board.is_done() {
            return report(None, 0, 0);
        }

        // Fixed opening
        if board.is_empty() && board.is_legal(Move::CENTER) {
            return report(Some((Move::CENTER, 0)), 0, 0);
        }

        let mut moves = board.legal_moves();
        let decided = self.heuristic.win_score() - CELL_COUNT as i32;
        let mut best: Option<(Move, i32)> = None;
        let mut completed_depth = 0;

        for depth in 1..=self.depth {
            match self.search_root(board, &moves, depth, deadline) {
                RootResult::Complete(mv, score) => {
                    best = Some((mv, score));
                    completed_depth = depth;
                    debug!("Depth {} complete: {} (score {}, nodes {})", depth, mv, score, self.nodes);

                    // Search the previous best move first in the next iteration
                    if let Some(pos) = moves.iter().position(|&m| m == mv) {
                        moves[..=pos].rotate_right(1);
                    }

                    if score.abs() >= decided {
                        break;
                    }
                }
                RootResult::Aborted(partial) => {
                    debug!("Depth {} aborted by deadline", depth);
                    if best.is_none() {
                        best = partial;
                    }
                    break;
                }
            }
        }

        report(best, completed_depth, self.nodes)
    }

    fn search_root(&mut self, board: &Board, moves: &[Move], depth: u32, deadline: &Deadline) -> RootResult {
        let inf = self.heuristic.infinity();
        let beta = inf;
        let mut alpha = -inf;
        let mut best: Option<(Move, i32)> = None;
        let mut ties = 0u32;

        for &mv in moves {
            let child = match board.apply(mv) {
                Ok(child) => child,
                Err(_) => continue,
            };

            // Lowering the window by one keeps scores equal to the current best exact,
            // so they can take part in tie-breaking.
            let window_alpha = if self.randomize_ties { alpha - 1 } else { alpha };
            let score = match self.negamax(&child, depth - 1, 1, -beta, -window_alpha, deadline) {
                Some(value) => -value,
                None => return RootResult::Aborted(best),
            };

            match best {
                Some((_, best_score)) if score < best_score => {}
                Some((_, best_score)) if score == best_score => {
                    if self.randomize_ties {
                        ties += 1;
                        if self.rng.random_range(0..ties) == 0 {
                            best = Some((mv, score));
                        }
                    }
                }
                _ => {
                    best = Some((mv, score));
                    ties = 1;
                }
            }
            alpha = alpha.max(score);
        }

        match best {
            Some((mv, score)) => RootResult::Complete(mv, score),
            None => RootResult::Aborted(None),
        }
    }

    /// Returns the value of `board` for its side to move, `None` if the deadline fired
    fn negamax(
        &mut self,
        board: &Board,
        depth_left: u32,
        ply: u32,
        mut alpha: i32,
        beta: i32,
        deadline: &Deadline,
    ) -> Option<i32> {
        self.nodes += 1;
        if deadline.expired() {
            return None;
        }

        let perspective = board.next_player();
        if depth_left == 0 || board.is_done() {
            return Some(self.heuristic.score(board, perspective, ply));
        }

        let mut best = -self.heuristic.infinity();
        for mv in board.legal_moves() {
            let child = match board.apply(mv) {
                Ok(child) => child,
                Err(_) => continue,
            };
            let score = -self.negamax(&child, depth_left - 1, ply + 1, -beta, -alpha, deadline)?;

            best = best.max(score);
            alpha = alpha.max(score);
            if alpha >= beta {
                break;
            }
        }
        Some(best)
    }
}

/// Easy opponent: plain fixed-depth minimax with a chance of a random move
#[derive(Debug)]
pub struct CasualSearch {
    depth: u32,
    random_move_probability: f64,
    heuristic: Heuristic,
    rng: StdRng,
}

impl CasualSearch {
    pub fn new(depth: u32, random_move_probability: f64, heuristic: Heuristic, rng: StdRng) -> Self {
        let random_move_probability = if random_move_probability.is_finite() {
            random_move_probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        CasualSearch {
            depth: depth.max(1),
            random_move_probability,
            heuristic,
            rng,
        }
    }

    pub fn select_move(&mut self, board: &Board, deadline: &Deadline) -> Option<Move> {
        let moves = board.legal_moves();
        if moves.is_empty() {
            return None;
        }

        if self.rng.random_bool(self.random_move_probability) {
            debug!("Casual search injecting a random move");
            return moves.choose(&mut self.rng).copied();
        }

        let mut best: Option<(Move, i32)> = None;
        let mut ties = 0u32;
        for mv in moves {
            let child = match board.apply(mv) {
                Ok(child) => child,
                Err(_) => continue,
            };
            let score = match self.minimax(&child, self.depth - 1, 1, deadline) {
                Some(value) => -value,
                None => break,
            };
            match best {
                Some((_, best_score)) if score < best_score => {}
                Some((_, best_score)) if score == best_score => {
                    ties += 1;
                    if self.rng.random_range(0..ties) == 0 {
                        best = Some((mv, score));
                    }
                }
                _ => {
                    best = Some((mv, score));
                    ties = 1;
                }
            }
        }
        best.map(|(mv, _)| mv)
    }

    fn minimax(&mut self, board: &Board, depth_left: u32, ply: u32, deadline: &Deadline) -> Option<i32> {
        if deadline.expired() {
            return None;
        }
        let perspective = board.next_player();
        if depth_left == 0 || board.is_done() {
            return Some(self.heuristic.score(board, perspective, ply));
        }

        let mut best = -self.heuristic.infinity();
        for mv in board.legal_moves() {
            if let Ok(child) = board.apply(mv) {
                best = best.max(-self.minimax(&child, depth_left - 1, ply + 1, deadline)?);
            }
        }
        Some(best)
    }
}

/// The strategy object behind a Search actor
#[derive(Debug)]
pub enum SearchStrategy {
    Negamax(NegamaxSearch),
    Casual(CasualSearch),
}

impl SearchStrategy {
    /// Builds the strategy for `params` with an OS-seeded generator
    pub fn from_params(params: &SearchParams, config: &Config) -> Self {
        Self::with_rng(params, config, StdRng::from_rng(&mut rand::rng()))
    }

    pub fn with_rng(params: &SearchParams, config: &Config, rng: StdRng) -> Self {
        let heuristic = Heuristic::new(&config.scores);
        match *params {
            SearchParams::Negamax { depth } => {
                SearchStrategy::Negamax(NegamaxSearch::new(depth, heuristic, config.search.randomize_ties, rng))
            }
            SearchParams::Casual {
                depth,
                random_move_probability,
            } => SearchStrategy::Casual(CasualSearch::new(depth, random_move_probability, heuristic, rng)),
        }
    }

    /// Chooses a move for the side to move, `None` if the deadline fired before any was chosen
    pub fn select_move(&mut self, board: &Board, deadline: &Deadline) -> Option<Move> {
        match self {
            SearchStrategy::Negamax(search) => {
                let report = search.search(board, deadline);
                info!(
                    "Search chose {:?} (score: {}, depth: {}/{}, nodes: {}, time: {}ms)",
                    report.best_move.map(|mv| mv.to_string()),
                    report.score,
                    report.completed_depth,
                    search.depth(),
                    report.nodes,
                    report.elapsed.as_millis()
                );
                report.best_move
            }
            SearchStrategy::Casual(search) => search.select_move(board, deadline),
        }
    }

    /// Random legal move using this strategy's generator
    pub fn fallback_move(&mut self, board: &Board) -> Option<Move> {
        let rng = match self {
            SearchStrategy::Negamax(search) => &mut search.rng,
            SearchStrategy::Casual(search) => &mut search.rng,
        };
        random_legal_move(board, rng)
    }
}
