// Presentation callbacks exposed to the user interface collaborator
//
// Every callback is fire-and-forget. The core never holds one of its own locks
// while calling into a presenter.

use log::info;
use tokio::sync::oneshot;

use crate::match_state::MatchState;

/// Questions the sync engine needs the local player to answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The peer proposes a new match; `local_first` tells whether we would move first
    NewMatch { local_first: bool },
    /// The peer asks to take back the last move
    Undo,
}

impl Confirmation {
    pub fn prompt(&self) -> String {
        match self {
            Confirmation::NewMatch { local_first: true } => {
                "Opponent proposes a new game, you move first. Accept?".to_string()
            }
            Confirmation::NewMatch { local_first: false } => {
                "Opponent proposes a new game, they move first. Accept?".to_string()
            }
            Confirmation::Undo => "Opponent asks to undo the last move. Accept?".to_string(),
        }
    }
}

/// Receives state changes, notices and confirmation requests from the core
pub trait Presenter: Send + Sync {
    /// The match state changed: a move was applied, undone, or the match was replaced
    fn on_state_changed(&self, state: &MatchState);

    /// A transient, non-fatal message for the user
    fn on_notice(&self, text: &str);

    /// Asks the user to accept or decline. Dropping `reply` counts as declining.
    fn on_confirmation_request(&self, request: Confirmation, reply: oneshot::Sender<bool>);
}

/// Presenter that only logs, and answers every confirmation with a fixed value
#[derive(Debug, Clone, Copy)]
pub struct LogPresenter {
    accept: bool,
}

impl LogPresenter {
    pub fn new(accept: bool) -> Self {
        LogPresenter { accept }
    }
}

impl Presenter for LogPresenter {
    fn on_state_changed(&self, state: &MatchState) {
        info!(
            "Match {:?}: {} boards, {} to move",
            state.phase(),
            state.len(),
            state.side_to_move()
        );
    }

    fn on_notice(&self, text: &str) {
        info!("Notice: {}", text);
    }

    fn on_confirmation_request(&self, request: Confirmation, reply: oneshot::Sender<bool>) {
        info!("{} -> {}", request.prompt(), if self.accept { "yes" } else { "no" });
        let _ = reply.send(self.accept);
    }
}
