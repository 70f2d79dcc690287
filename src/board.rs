// Ultimate Tic-Tac-Toe board
//
// This is the rules adapter the rest of the crate treats as a black box: it lists
// legal moves, plays moves on an owned copy and reports region and board outcomes.
// Only the primary fields are serialized; region outcomes and the board outcome are
// recomputed on decode so a board received from a peer is always self-consistent.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BoardError;
use crate::types::{Move, Outcome, Side, CELLS_PER_REGION, REGION_COUNT};

/// The eight winning lines of a 3x3 grid
const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Full board state: 9 regions of 9 cells plus the move that led here
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BoardRecord", into = "BoardRecord")]
pub struct Board {
    cells: [[Option<Side>; CELLS_PER_REGION]; REGION_COUNT],
    regions: [Option<Outcome>; REGION_COUNT],
    next_player: Side,
    last_move: Option<Move>,
    outcome: Option<Outcome>,
}

/// Wire form of a board
#[derive(Serialize, Deserialize)]
struct BoardRecord {
    cells: [[Option<Side>; CELLS_PER_REGION]; REGION_COUNT],
    next_player: Side,
    last_move: Option<Move>,
}

impl From<BoardRecord> for Board {
    fn from(record: BoardRecord) -> Self {
        let mut board = Board {
            cells: record.cells,
            regions: [None; REGION_COUNT],
            next_player: record.next_player,
            last_move: record.last_move,
            outcome: None,
        };
        for region in 0..REGION_COUNT {
            board.regions[region] = board.compute_region_outcome(region);
        }
        board.outcome = board.compute_outcome();
        board
    }
}

impl From<Board> for BoardRecord {
    fn from(board: Board) -> Self {
        BoardRecord {
            cells: board.cells,
            next_player: board.next_player,
            last_move: board.last_move,
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Board {
            cells: [[None; CELLS_PER_REGION]; REGION_COUNT],
            regions: [None; REGION_COUNT],
            next_player: Side::X,
            last_move: None,
            outcome: None,
        }
    }
}

/// Returns the side owning a complete line in a 3x3 grid, if any
fn line_winner(get: impl Fn(usize) -> Option<Side>) -> Option<Side> {
    LINES.iter().find_map(|line| {
        let first = get(line[0])?;
        if get(line[1]) == Some(first) && get(line[2]) == Some(first) {
            Some(first)
        } else {
            None
        }
    })
}

impl Board {
    /// Creates an empty board with X to move
    pub fn new() -> Self {
        Board::default()
    }

    /// Replays a sequence of moves from the empty board
    pub fn from_moves(moves: &[Move]) -> Result<Self, BoardError> {
        let mut board = Board::new();
        for &mv in moves {
            board.play(mv)?;
        }
        Ok(board)
    }

    /// The side to move. On a finished board this is the side that did not move last.
    pub fn next_player(&self) -> Side {
        self.next_player
    }

    pub fn last_move(&self) -> Option<Move> {
        self.last_move
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    /// Winner of the whole board, `None` for a draw or an unfinished game
    pub fn winner(&self) -> Option<Side> {
        self.outcome.and_then(Outcome::winner)
    }

    /// Outcome of one region, `None` while the region is still open
    pub fn region_outcome(&self, region: usize) -> Option<Outcome> {
        self.regions.get(region).copied().flatten()
    }

    pub fn cell(&self, mv: Move) -> Option<Side> {
        self.cells[mv.region()][mv.cell()]
    }

    /// True when no cell has been played yet
    pub fn is_empty(&self) -> bool {
        self.cells.iter().flatten().all(Option::is_none)
    }

    /// The region the side to move is forced into, or `None` when any open region is allowed
    pub fn active_region(&self) -> Option<usize> {
        let target = self.last_move?.cell();
        if self.regions[target].is_none() {
            Some(target)
        } else {
            None
        }
    }

    pub fn is_legal(&self, mv: Move) -> bool {
        if self.is_done() {
            return false;
        }
        let region = mv.region();
        if self.regions[region].is_some() || self.cells[region][mv.cell()].is_some() {
            return false;
        }
        self.active_region().map_or(true, |active| active == region)
    }

    /// All legal moves in index order, empty once the board is done
    pub fn legal_moves(&self) -> Vec<Move> {
        if self.is_done() {
            return Vec::new();
        }
        match self.active_region() {
            Some(region) => (0..CELLS_PER_REGION)
                .filter_map(|cell| Move::new(region, cell))
                .filter(|&mv| self.cells[region][mv.cell()].is_none())
                .collect(),
            None => Move::all().filter(|&mv| self.is_legal(mv)).collect(),
        }
    }

    /// Plays `mv` for the side to move, modifying this board
    pub fn play(&mut self, mv: Move) -> Result<(), BoardError> {
        if !self.is_legal(mv) {
            return Err(BoardError::IllegalMove(mv));
        }

        let region = mv.region();
        self.cells[region][mv.cell()] = Some(self.next_player);
        self.regions[region] = self.compute_region_outcome(region);
        if self.regions[region].is_some() {
            self.outcome = self.compute_outcome();
        }

        self.last_move = Some(mv);
        self.next_player = self.next_player.other();
        Ok(())
    }

    /// Copy-on-write variant of [`Board::play`]: returns the child board, leaves `self` untouched
    pub fn apply(&self, mv: Move) -> Result<Board, BoardError> {
        let mut next = self.clone();
        next.play(mv)?;
        Ok(next)
    }

    fn compute_region_outcome(&self, region: usize) -> Option<Outcome> {
        let cells = &self.cells[region];
        if let Some(side) = line_winner(|i| cells[i]) {
            Some(Outcome::WonBy(side))
        } else if cells.iter().all(Option::is_some) {
            Some(Outcome::Draw)
        } else {
            None
        }
    }

    fn compute_outcome(&self) -> Option<Outcome> {
        let owner = |i: usize| self.regions[i].and_then(Outcome::winner);
        if let Some(side) = line_winner(owner) {
            Some(Outcome::WonBy(side))
        } else if self.regions.iter().all(Option::is_some) {
            Some(Outcome::Draw)
        } else {
            None
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..9 {
            if row > 0 && row % 3 == 0 {
                writeln!(f, "------+-------+------")?;
            }
            for col in 0..9 {
                if col > 0 && col % 3 == 0 {
                    write!(f, "| ")?;
                }
                let region = (row / 3) * 3 + col / 3;
                let cell = (row % 3) * 3 + col % 3;
                let symbol = match self.cells[region][cell] {
                    Some(Side::X) => 'X',
                    Some(Side::O) => 'O',
                    None => '.',
                };
                write!(f, "{}", symbol)?;
                if col < 8 {
                    write!(f, " ")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(region: usize, cell: usize) -> Move {
        Move::new(region, cell).unwrap()
    }

    #[test]
    fn test_empty_board_allows_every_cell() {
        let board = Board::new();
        assert_eq!(board.legal_moves().len(), 81);
        assert_eq!(board.next_player(), Side::X);
        assert!(board.is_empty());
        assert_eq!(board.active_region(), None);
    }

    #[test]
    fn test_move_sends_opponent_to_region() {
        let board = Board::from_moves(&[mv(0, 5)]).unwrap();
        assert_eq!(board.active_region(), Some(5));
        assert_eq!(board.next_player(), Side::O);
        assert!(board.legal_moves().iter().all(|m| m.region() == 5));
        assert!(!board.is_legal(mv(0, 0)));
        assert_eq!(board.last_move(), Some(mv(0, 5)));
    }

    #[test]
    fn test_apply_leaves_original_untouched() {
        let board = Board::new();
        let child = board.apply(Move::CENTER).unwrap();
        assert!(board.is_empty());
        assert_eq!(child.cell(Move::CENTER), Some(Side::X));
        assert_eq!(board.apply(Move::CENTER).unwrap(), child);
    }

    #[test]
    fn test_illegal_move_is_rejected() {
        let mut board = Board::from_moves(&[mv(4, 4)]).unwrap();
        assert_eq!(board.play(mv(4, 4)), Err(BoardError::IllegalMove(mv(4, 4))));
        assert_eq!(board.play(mv(0, 0)), Err(BoardError::IllegalMove(mv(0, 0))));
    }

    #[test]
    fn test_closed_region_frees_the_next_player() {
        let mut board = Board::new();
        // X: 4:0, 4:1, 4:2 wins region 4 while O answers in the regions it is sent to.
        for m in [mv(4, 0), mv(0, 4), mv(4, 1), mv(1, 4), mv(4, 2)] {
            board.play(m).unwrap();
        }
        assert_eq!(board.region_outcome(4), Some(Outcome::WonBy(Side::X)));
        // O is sent to region 2, which is open.
        assert_eq!(board.active_region(), Some(2));
        board.play(mv(2, 4)).unwrap();
        // X is sent to region 4, which is closed: any open region is allowed.
        assert_eq!(board.active_region(), None);
        assert!(board.legal_moves().iter().all(|m| m.region() != 4));
    }

    #[test]
    fn test_serde_recomputes_derived_state() {
        let board = Board::from_moves(&[mv(4, 0), mv(0, 4), mv(4, 1), mv(1, 4), mv(4, 2)]).unwrap();
        let json = serde_json::to_string(&board).unwrap();
        assert!(!json.contains("regions"));
        let decoded: Board = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, board);
        assert_eq!(decoded.region_outcome(4), Some(Outcome::WonBy(Side::X)));
    }

    #[test]
    fn test_display_has_nine_rows() {
        let text = Board::from_moves(&[Move::CENTER]).unwrap().to_string();
        assert_eq!(text.lines().filter(|l| !l.starts_with('-')).count(), 9);
        assert!(text.contains('X'));
    }
}
