// Core value types shared by the board, the search and the wire protocol

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Number of regions on the board, and cells per region
pub const REGION_COUNT: usize = 9;
pub const CELLS_PER_REGION: usize = 9;
pub const CELL_COUNT: usize = REGION_COUNT * CELLS_PER_REGION;

/// One of the two competing marks. X always moves first.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Side {
    X,
    O,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::X => Side::O,
            Side::O => Side::X,
        }
    }

    /// Index into per-side arrays (X = 0, O = 1)
    pub fn index(self) -> usize {
        match self {
            Side::X => 0,
            Side::O => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::X => "X",
            Side::O => "O",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished region or a finished board
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Outcome {
    WonBy(Side),
    Draw,
}

impl Outcome {
    pub fn winner(self) -> Option<Side> {
        match self {
            Outcome::WonBy(side) => Some(side),
            Outcome::Draw => None,
        }
    }
}

/// A single cell on the 9x9 board, stored region-major: `region * 9 + cell`
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub struct Move(u8);

impl Move {
    /// The center cell of the center region, played as the fixed opening
    pub const CENTER: Move = Move(40);

    /// Builds a move from a region and a cell inside that region, both in 0..9
    pub fn new(region: usize, cell: usize) -> Option<Move> {
        if region < REGION_COUNT && cell < CELLS_PER_REGION {
            Some(Move((region * CELLS_PER_REGION + cell) as u8))
        } else {
            None
        }
    }

    pub fn from_index(index: usize) -> Option<Move> {
        if index < CELL_COUNT {
            Some(Move(index as u8))
        } else {
            None
        }
    }

    /// Iterates all 81 moves in index order
    pub fn all() -> impl Iterator<Item = Move> {
        (0..CELL_COUNT as u8).map(Move)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn region(self) -> usize {
        self.index() / CELLS_PER_REGION
    }

    /// Position inside the region, which is also the region the opponent is sent to
    pub fn cell(self) -> usize {
        self.index() % CELLS_PER_REGION
    }
}

impl TryFrom<u8> for Move {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Move::from_index(value as usize).ok_or_else(|| format!("move index {} out of range", value))
    }
}

impl From<Move> for u8 {
    fn from(mv: Move) -> u8 {
        mv.0
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.region(), self.cell())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_region_and_cell() {
        let mv = Move::new(3, 7).unwrap();
        assert_eq!(mv.index(), 34);
        assert_eq!(mv.region(), 3);
        assert_eq!(mv.cell(), 7);
        assert_eq!(Move::CENTER, Move::new(4, 4).unwrap());
    }

    #[test]
    fn test_move_out_of_range() {
        assert!(Move::new(9, 0).is_none());
        assert!(Move::from_index(81).is_none());
        assert!(serde_json::from_str::<Move>("81").is_err());
        assert_eq!(serde_json::from_str::<Move>("80").unwrap().index(), 80);
    }

    #[test]
    fn test_side_other() {
        assert_eq!(Side::X.other(), Side::O);
        assert_eq!(Side::O.other(), Side::X);
        assert_eq!(Outcome::WonBy(Side::O).winner(), Some(Side::O));
        assert_eq!(Outcome::Draw.winner(), None);
    }
}
