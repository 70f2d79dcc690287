// Match state: who supplies each side's moves, and the board history
//
// The history is never empty and each entry differs from its predecessor by
// exactly one legal move. Only the active turn loop worker pushes onto it; undo,
// turn-local and new-match replace it while no worker is running.

use crate::board::Board;
use crate::types::Side;

/// Difficulty presets offered to players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(s: &str) -> Option<Difficulty> {
        match s.to_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

/// Parameters of a Search actor
#[derive(Debug, Clone, PartialEq)]
pub enum SearchParams {
    /// Alpha-beta negamax to a fixed depth
    Negamax { depth: u32 },
    /// Shallow minimax without pruning, playing a random move with the given probability
    Casual { depth: u32, random_move_probability: f64 },
}

/// The move-supplying strategy assigned to one side
#[derive(Debug, Clone, PartialEq)]
pub enum Actor {
    /// Moves are deposited by the local user interface
    Interactive,
    /// Moves are computed by the search engine
    Search(SearchParams),
    /// Moves are deposited by the sync engine after replay validation
    Remote,
}

impl Actor {
    pub fn is_search(&self) -> bool {
        matches!(self, Actor::Search(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Actor::Remote)
    }

    /// Whether this actor's moves arrive through the mailbox
    pub fn uses_mailbox(&self) -> bool {
        matches!(self, Actor::Interactive | Actor::Remote)
    }
}

/// Lifecycle of one match: `Idle -> Running -> {Done, Stopped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchPhase {
    Idle,
    Running,
    Done,
    Stopped,
}

/// Shared record of one match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    /// Actors indexed by `Side::index()`: first mover, second mover
    actors: [Actor; 2],
    history: Vec<Board>,
    phase: MatchPhase,
    /// Whether the local player gave up the first move
    swapped: bool,
}

impl MatchState {
    /// Starts a match on `start`, which becomes the only history entry
    pub fn new(x: Actor, o: Actor, start: Board, swapped: bool) -> Self {
        MatchState {
            actors: [x, o],
            history: vec![start],
            phase: MatchPhase::Idle,
            swapped,
        }
    }

    /// Two local players on an empty board
    pub fn local() -> Self {
        MatchState::new(Actor::Interactive, Actor::Interactive, Board::new(), false)
    }

    pub fn actor(&self, side: Side) -> &Actor {
        &self.actors[side.index()]
    }

    pub fn actors(&self) -> &[Actor; 2] {
        &self.actors
    }

    pub fn top(&self) -> &Board {
        // history is never empty
        &self.history[self.history.len() - 1]
    }

    pub fn history(&self) -> &[Board] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == MatchPhase::Running
    }

    pub fn swapped(&self) -> bool {
        self.swapped
    }

    /// The side whose actor should supply the next move
    pub fn side_to_move(&self) -> Side {
        self.top().next_player()
    }

    pub fn has_remote(&self) -> bool {
        self.actors.iter().any(Actor::is_remote)
    }

    pub(crate) fn set_phase(&mut self, phase: MatchPhase) {
        self.phase = phase;
    }

    /// Pushes the board produced by one legal move on the current top
    pub(crate) fn push(&mut self, board: Board) {
        self.history.push(board);
    }

    /// Pops one board unless it is the last one
    pub(crate) fn pop(&mut self) -> Option<Board> {
        if self.history.len() < 2 {
            return None;
        }
        self.history.pop()
    }

    /// Replaces both actors with `Interactive`, keeping the history
    pub(crate) fn make_local(&mut self) {
        self.actors = [Actor::Interactive, Actor::Interactive];
    }
}
