// Match controller: the turn loop and the operations that replace match state
//
// One dedicated worker thread drives a match. It repeatedly asks the actor of the
// side to move for a move, applies it to a copy of the top board, pushes the
// result and tells the peer when the opponent is Remote. Undo, turn-local and
// new-match stop and join that worker first, edit the state, then restart it,
// so the history is only ever mutated by one party at a time.

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::board::Board;
use crate::config::Config;
use crate::deadline::{CancelToken, Deadline};
use crate::error::MatchError;
use crate::mailbox::{Mailbox, MoveRequest};
use crate::match_state::{Actor, Difficulty, MatchPhase, MatchState};
use crate::presenter::Presenter;
use crate::search::SearchStrategy;
use crate::types::{Move, Outcome, Side};

/// Outbound half of the sync engine as seen by the turn loop
pub trait PeerLink: Send + Sync {
    /// Sends the full post-move board to the peer
    fn send_board(&self, board: &Board);
}

type SharedPeer = Arc<RwLock<Option<Arc<dyn PeerLink>>>>;

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancelToken,
}

/// Everything the worker thread owns or shares
struct TurnLoop {
    state: Arc<Mutex<MatchState>>,
    mailbox: Arc<Mailbox>,
    presenter: Arc<dyn Presenter>,
    peer: SharedPeer,
    cancel: CancelToken,
    move_deadline: Duration,
    strategies: [Option<SearchStrategy>; 2],
}

/// Owns the match state and the single turn loop worker
pub struct MatchController {
    config: Config,
    state: Arc<Mutex<MatchState>>,
    mailbox: Arc<Mailbox>,
    presenter: Arc<dyn Presenter>,
    peer: SharedPeer,
    /// Held for the whole of every stop/edit/restart sequence
    worker: Mutex<Option<Worker>>,
}

impl MatchController {
    /// Creates a controller holding an idle local match
    pub fn new(config: Config, presenter: Arc<dyn Presenter>) -> Self {
        MatchController {
            config,
            state: Arc::new(Mutex::new(MatchState::local())),
            mailbox: Arc::new(Mailbox::new()),
            presenter,
            peer: Arc::new(RwLock::new(None)),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A copy of the current match state for display
    pub fn snapshot(&self) -> MatchState {
        self.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    pub fn actor(&self, side: Side) -> Actor {
        self.state.lock().actor(side).clone()
    }

    pub fn has_remote_actor(&self) -> bool {
        self.state.lock().has_remote()
    }

    /// Input entry point: deposits a move for `side` into the mailbox. Only sides
    /// played at this terminal accept input.
    pub fn submit_move(&self, side: Side, mv: Move) {
        let actor = self.actor(side);
        if actor != Actor::Interactive {
            debug!("Ignoring input {} for {}, played by {:?}", mv, side, actor);
            return;
        }
        self.mailbox.deposit(side, mv);
    }

    /// Deposits a move the sync engine has already validated for a Remote side
    pub(crate) fn deliver_remote_move(&self, side: Side, mv: Move) {
        self.mailbox.deposit(side, mv);
    }

    /// Installs or clears the link used to forward local moves to a Remote opponent
    pub fn set_peer_link(&self, link: Option<Arc<dyn PeerLink>>) {
        *self.peer.write() = link;
    }

    /// Stops the current match and starts a new one on `start`
    pub fn new_match(&self, x: Actor, o: Actor, start: Board, swapped: bool) {
        self.new_match_with(x, o, start, swapped, |_| {});
    }

    /// Like `new_match`, running `prepare` on the start board after the old worker
    /// has been joined and before the new one starts
    pub fn new_match_with<F>(&self, x: Actor, o: Actor, start: Board, swapped: bool, prepare: F)
    where
        F: FnOnce(&Board),
    {
        let snapshot = {
            let mut worker = self.worker.lock();
            self.stop_locked(&mut worker);
            prepare(&start);
            *self.state.lock() = MatchState::new(x, o, start, swapped);
            self.mailbox.advance_epoch();
            self.start_locked(&mut worker);
            self.state.lock().clone()
        };
        info!("New match: X={:?}, O={:?}", snapshot.actor(Side::X), snapshot.actor(Side::O));
        self.presenter.on_state_changed(&snapshot);
    }

    /// Two local players on an empty board
    pub fn new_local_match(&self) {
        self.new_match(Actor::Interactive, Actor::Interactive, Board::new(), false);
    }

    /// Local player against the search engine; `ai_first` gives the AI the X side
    pub fn new_ai_match(&self, difficulty: Difficulty, ai_first: bool) {
        let ai = Actor::Search(self.config.search_params(difficulty));
        if ai_first {
            self.new_match(ai, Actor::Interactive, Board::new(), true);
        } else {
            self.new_match(Actor::Interactive, ai, Board::new(), false);
        }
    }

    /// Takes back the last move, and the one before it when that leaves a Search
    /// actor to move. Fails without touching the match when fewer than two boards remain.
    pub fn undo(&self) -> Result<Board, MatchError> {
        self.undo_with(|| None, |_| {})
    }

    /// Like `undo`, for a match shared with a peer. Once the worker is stopped,
    /// `agreed` names the board both sides hold; a move that has been delivered
    /// but not yet played is played first so the undo starts from that board.
    /// `prepare` runs on the new top board before the worker resumes.
    pub fn undo_with<A, F>(&self, agreed: A, prepare: F) -> Result<Board, MatchError>
    where
        A: FnOnce() -> Option<Board>,
        F: FnOnce(&Board),
    {
        let result = {
            let mut worker = self.worker.lock();
            let phase = self.state.lock().phase();
            if phase == MatchPhase::Idle {
                Err(MatchError::NoMatch)
            } else {
                self.stop_locked(&mut worker);
                if let Some(agreed) = agreed() {
                    self.catch_up_locked(&agreed);
                }

                let popped = {
                    let mut state = self.state.lock();
                    if state.len() < 2 {
                        false
                    } else {
                        state.pop();
                        if state.actor(state.side_to_move()).is_search() {
                            state.pop();
                        }
                        true
                    }
                };

                if popped {
                    let top = self.state.lock().top().clone();
                    prepare(&top);
                    self.mailbox.advance_epoch();
                }
                self.resume_locked(&mut worker, phase);
                if popped {
                    Ok(self.state.lock().clone())
                } else {
                    Err(MatchError::UndoUnavailable)
                }
            }
        };

        match result {
            Ok(snapshot) => {
                info!("Undo: {} boards remain", snapshot.len());
                let top = snapshot.top().clone();
                self.presenter.on_state_changed(&snapshot);
                Ok(top)
            }
            Err(e) => {
                self.presenter.on_notice(&e.to_string());
                Err(e)
            }
        }
    }

    /// Demotes both actors to Interactive while keeping the history. Returns false
    /// when the match was already local.
    pub fn turn_local(&self) -> bool {
        let snapshot = {
            let mut worker = self.worker.lock();
            if self
                .state
                .lock()
                .actors()
                .iter()
                .all(|actor| *actor == Actor::Interactive)
            {
                return false;
            }
            let previous = self.state.lock().phase();
            self.stop_locked(&mut worker);
            self.state.lock().make_local();
            self.mailbox.advance_epoch();
            self.resume_locked(&mut worker, previous);
            self.state.lock().clone()
        };
        info!("Match turned local at {} boards", snapshot.len());
        self.presenter.on_state_changed(&snapshot);
        true
    }

    /// Stops the turn loop and waits for it to finish
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        self.stop_locked(&mut worker);
    }

    /// Plays the move that leads from the top board to `agreed`, if there is one.
    /// Only called with the worker stopped.
    fn catch_up_locked(&self, agreed: &Board) {
        let mut state = self.state.lock();
        if state.top() == agreed {
            return;
        }
        let leads_there = agreed
            .last_move()
            .and_then(|mv| state.top().apply(mv).ok())
            .map_or(false, |next| next == *agreed);
        if leads_there {
            debug!("Playing delivered move {:?} before editing the match", agreed.last_move());
            state.push(agreed.clone());
        } else {
            warn!("History does not lead to the agreed board");
        }
    }

    fn resume_locked(&self, slot: &mut Option<Worker>, previous: MatchPhase) {
        if matches!(previous, MatchPhase::Running | MatchPhase::Done) {
            self.start_locked(slot);
        }
    }

    fn start_locked(&self, slot: &mut Option<Worker>) {
        let cancel = CancelToken::new();
        let strategies = {
            let mut state = self.state.lock();
            if state.top().is_done() {
                state.set_phase(MatchPhase::Done);
                return;
            }
            state.set_phase(MatchPhase::Running);
            let strategy = |side: Side| match state.actor(side) {
                Actor::Search(params) => Some(SearchStrategy::from_params(params, &self.config)),
                _ => None,
            };
            [strategy(Side::X), strategy(Side::O)]
        };

        let turn_loop = TurnLoop {
            state: self.state.clone(),
            mailbox: self.mailbox.clone(),
            presenter: self.presenter.clone(),
            peer: self.peer.clone(),
            cancel: cancel.clone(),
            move_deadline: self.config.timing.move_deadline(),
            strategies,
        };

        match thread::Builder::new()
            .name("turn-loop".to_string())
            .spawn(move || turn_loop.run())
        {
            Ok(handle) => *slot = Some(Worker { handle, cancel }),
            Err(e) => {
                error!("Failed to spawn turn loop: {}", e);
                self.state.lock().set_phase(MatchPhase::Stopped);
            }
        }
    }

    fn stop_locked(&self, slot: &mut Option<Worker>) {
        let worker = match slot.take() {
            Some(worker) => worker,
            None => return,
        };

        worker.cancel.cancel();
        self.mailbox.wake_all();

        if worker.handle.thread().id() == thread::current().id() {
            // Called from a presenter callback on the worker itself: it exits on its next check.
            warn!("Turn loop stopped from its own thread; not joining");
        } else if worker.handle.join().is_err() {
            error!("Turn loop worker panicked");
        }

        let mut state = self.state.lock();
        if state.is_running() {
            state.set_phase(MatchPhase::Stopped);
        }
    }
}

impl Drop for MatchController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TurnLoop {
    fn run(mut self) {
        info!("Turn loop started");

        while !self.cancel.is_cancelled() {
            let (board, actor) = {
                let state = self.state.lock();
                (state.top().clone(), state.actor(state.side_to_move()).clone())
            };

            if board.is_done() {
                self.finish(&board);
                break;
            }

            let side = board.next_player();
            let deadline = Deadline::after(self.move_deadline, self.cancel.clone());
            let request = if actor.uses_mailbox() {
                self.mailbox.wait_for(side, &board, &deadline)
            } else {
                self.search_move(side, &board, &deadline)
            };

            let mv = match request {
                MoveRequest::Move(mv) => mv,
                // Interactive and Remote sources keep waiting across deadline ticks
                MoveRequest::Cancelled => continue,
            };

            let next = match board.apply(mv) {
                Ok(next) => next,
                Err(e) => {
                    warn!("Discarding move from {:?}: {}", actor, e);
                    continue;
                }
            };

            let snapshot = {
                let mut state = self.state.lock();
                if self.cancel.is_cancelled() {
                    break;
                }
                state.push(next.clone());
                state.clone()
            };
            // Advance before the peer can answer, so its reply lands in the new epoch
            self.mailbox.advance_epoch();
            info!("Turn {}: {} played {}", snapshot.len() - 1, side, mv);

            if snapshot.actor(side.other()).is_remote() {
                let link = self.peer.read().clone();
                match link {
                    Some(link) => link.send_board(&next),
                    None => warn!("Opponent is remote but no peer link is installed"),
                }
            }

            self.presenter.on_state_changed(&snapshot);
        }

        info!("Turn loop finished");
    }

    fn search_move(&mut self, side: Side, board: &Board, deadline: &Deadline) -> MoveRequest {
        let strategy = match self.strategies[side.index()].as_mut() {
            Some(strategy) => strategy,
            None => {
                error!("No search strategy for {}", side);
                self.cancel.cancel();
                return MoveRequest::Cancelled;
            }
        };

        if let Some(mv) = strategy.select_move(board, deadline) {
            return MoveRequest::Move(mv);
        }
        if deadline.is_cancelled() {
            return MoveRequest::Cancelled;
        }

        warn!("Search produced no move before the deadline, playing a random move");
        strategy
            .fallback_move(board)
            .map_or(MoveRequest::Cancelled, MoveRequest::Move)
    }

    fn finish(&self, board: &Board) {
        let snapshot = {
            let mut state = self.state.lock();
            if self.cancel.is_cancelled() {
                return;
            }
            state.set_phase(MatchPhase::Done);
            state.clone()
        };

        let text = match board.outcome() {
            Some(Outcome::WonBy(side)) => format!("{} wins", side),
            _ => "Draw".to_string(),
        };
        info!("Match over: {}", text);
        self.presenter.on_notice(&text);
        self.presenter.on_state_changed(&snapshot);
    }
}
