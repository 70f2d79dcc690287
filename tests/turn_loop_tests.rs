//! Turn Loop Tests
//!
//! Drives whole matches through `MatchController` and checks the history it
//! produces, stop/restart behaviour and the notices sent to the presenter.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use ultimate_ttt::board::Board;
use ultimate_ttt::config::Config;
use ultimate_ttt::controller::MatchController;
use ultimate_ttt::match_state::{Actor, MatchPhase, MatchState, SearchParams};
use ultimate_ttt::presenter::{Confirmation, Presenter};
use ultimate_ttt::types::{Move, Side};

#[derive(Default)]
struct RecordingPresenter {
    notices: Mutex<Vec<String>>,
    updates: Mutex<usize>,
}

impl Presenter for RecordingPresenter {
    fn on_state_changed(&self, _state: &MatchState) {
        *self.updates.lock() += 1;
    }

    fn on_notice(&self, text: &str) {
        self.notices.lock().push(text.to_string());
    }

    fn on_confirmation_request(&self, _request: Confirmation, reply: oneshot::Sender<bool>) {
        let _ = reply.send(false);
    }
}

fn fast_config() -> Config {
    let mut config = Config::default_hardcoded();
    config.timing.move_deadline_ms = 50;
    config
}

fn setup() -> (Arc<RecordingPresenter>, MatchController) {
    let presenter = Arc::new(RecordingPresenter::default());
    let controller = MatchController::new(fast_config(), presenter.clone());
    (presenter, controller)
}

fn wait_until(controller: &MatchController, done: impl Fn(&MatchState) -> bool) -> MatchState {
    let start = Instant::now();
    loop {
        let snapshot = controller.snapshot();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(start.elapsed() < Duration::from_secs(30), "timed out in {:?}", snapshot.phase());
        thread::sleep(Duration::from_millis(5));
    }
}

/// Each history entry must be its predecessor with exactly one legal move applied
fn assert_history_is_a_game(history: &[Board]) {
    assert_eq!(history[0], Board::new());
    for pair in history.windows(2) {
        let mv = pair[1].last_move().expect("every pushed board carries its move");
        assert_eq!(pair[0].apply(mv).unwrap(), pair[1]);
    }
}

#[test]
fn test_engine_vs_engine_plays_to_the_end() {
    let (presenter, controller) = setup();
    let casual = Actor::Search(SearchParams::Casual {
        depth: 1,
        random_move_probability: 0.5,
    });
    let negamax = Actor::Search(SearchParams::Negamax { depth: 2 });
    controller.new_match(negamax, casual, Board::new(), false);

    let finished = wait_until(&controller, |s| s.phase() == MatchPhase::Done);
    assert!(finished.top().is_done());
    assert_history_is_a_game(finished.history());
    assert_eq!(finished.history()[1].last_move(), Some(Move::CENTER));

    let notices = presenter.notices.lock();
    assert!(
        notices.iter().any(|n| n.ends_with("wins") || n == "Draw"),
        "no result notice in {:?}",
        *notices
    );
}

#[test]
fn test_deposits_for_the_wrong_side_are_ignored() {
    let (_presenter, controller) = setup();
    controller.new_local_match();

    controller.submit_move(Side::O, Move::CENTER);
    thread::sleep(Duration::from_millis(120));
    assert_eq!(controller.snapshot().len(), 1);

    controller.submit_move(Side::X, Move::CENTER);
    let state = wait_until(&controller, |s| s.len() == 2);
    assert_eq!(state.side_to_move(), Side::O);
}

#[test]
fn test_stop_freezes_the_history() {
    let (_presenter, controller) = setup();
    controller.new_match(
        Actor::Search(SearchParams::Negamax { depth: 1 }),
        Actor::Search(SearchParams::Negamax { depth: 1 }),
        Board::new(),
        false,
    );
    wait_until(&controller, |s| s.len() >= 3);

    controller.stop();
    let stopped = controller.snapshot();
    assert!(matches!(stopped.phase(), MatchPhase::Stopped | MatchPhase::Done));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(controller.snapshot().len(), stopped.len());
    assert_history_is_a_game(stopped.history());
}

#[test]
fn test_new_match_replaces_a_running_one() {
    let (_presenter, controller) = setup();
    controller.new_local_match();
    controller.submit_move(Side::X, Move::CENTER);
    wait_until(&controller, |s| s.len() == 2);

    let start = Board::from_moves(&[Move::new(0, 0).unwrap()]).unwrap();
    controller.new_match(Actor::Interactive, Actor::Interactive, start.clone(), true);
    let state = controller.snapshot();
    assert_eq!(state.history(), &[start]);
    assert!(state.swapped());
    assert!(state.is_running());
}

#[test]
fn test_undo_pops_one_board_between_humans() {
    let (presenter, controller) = setup();
    controller.new_local_match();
    controller.submit_move(Side::X, Move::CENTER);
    wait_until(&controller, |s| s.len() == 2);
    controller.submit_move(Side::O, Move::new(4, 0).unwrap());
    let before = wait_until(&controller, |s| s.len() == 3);

    let top = controller.undo().unwrap();
    assert_eq!(top, before.history()[1]);
    assert_eq!(controller.snapshot().len(), 2);

    controller.undo().unwrap();
    assert!(controller.undo().is_err());
    assert!(presenter.notices.lock().iter().any(|n| n == "cannot undo further"));
}

#[test]
fn test_undo_against_engine_to_move_pops_twice() {
    let (_presenter, controller) = setup();
    // Engine plays O; once it has answered, undo lands back on X's turn
    controller.new_match(
        Actor::Interactive,
        Actor::Search(SearchParams::Negamax { depth: 1 }),
        Board::new(),
        false,
    );
    controller.submit_move(Side::X, Move::new(0, 0).unwrap());
    wait_until(&controller, |s| s.len() == 3);
    let reply = controller.snapshot().top().legal_moves()[0];
    controller.submit_move(Side::X, reply);
    let before = wait_until(&controller, |s| s.len() == 5);

    controller.undo().unwrap();
    let after = controller.snapshot();
    assert_eq!(after.len(), 3);
    assert_eq!(after.top(), &before.history()[2]);
    assert_eq!(after.side_to_move(), Side::X);
}

/// An engine that keeps thinking until it is stopped
fn slow_engine() -> (Arc<RecordingPresenter>, MatchController, Actor) {
    let mut config = Config::default_hardcoded();
    config.timing.move_deadline_ms = 60_000;
    let presenter = Arc::new(RecordingPresenter::default());
    let controller = MatchController::new(config, presenter.clone());
    (presenter, controller, Actor::Search(SearchParams::Negamax { depth: 40 }))
}

#[test]
fn test_undo_with_engine_thinking_pops_once() {
    let (_presenter, controller, engine) = slow_engine();
    controller.new_match(Actor::Interactive, engine, Board::new(), false);
    controller.submit_move(Side::X, Move::CENTER);
    wait_until(&controller, |s| s.len() == 2);

    // The human is to move again after one pop, so there is no second one
    assert_eq!(controller.undo().unwrap(), Board::new());
    let after = controller.snapshot();
    assert_eq!(after.len(), 1);
    assert_eq!(after.side_to_move(), Side::X);
    assert!(after.is_running());
}

#[test]
fn test_undo_of_human_reply_to_engine_opening_pops_once() {
    let (_presenter, controller, engine) = slow_engine();
    controller.new_match(engine, Actor::Interactive, Board::new(), true);

    // The opening is played without searching
    let opened = wait_until(&controller, |s| s.len() == 2);
    assert_eq!(opened.top().last_move(), Some(Move::CENTER));
    controller.submit_move(Side::O, Move::new(4, 0).unwrap());
    wait_until(&controller, |s| s.len() == 3);

    controller.undo().unwrap();
    let after = controller.snapshot();
    assert_eq!(after.len(), 2);
    assert_eq!(after.top(), &opened.history()[1]);
    assert_eq!(after.side_to_move(), Side::O);
    assert!(after.is_running());
}

#[test]
fn test_turn_local_after_engine_match() {
    let (_presenter, controller) = setup();
    controller.new_match(
        Actor::Search(SearchParams::Negamax { depth: 1 }),
        Actor::Interactive,
        Board::new(),
        true,
    );
    let before = wait_until(&controller, |s| s.len() == 2);

    assert!(controller.turn_local());
    let after = controller.snapshot();
    assert_eq!(after.history(), before.history());
    assert_eq!(after.actor(Side::X), &Actor::Interactive);

    // X no longer answers on its own
    let mv = after.top().legal_moves()[0];
    controller.submit_move(Side::O, mv);
    wait_until(&controller, |s| s.len() == 3);
    thread::sleep(Duration::from_millis(120));
    assert_eq!(controller.snapshot().len(), 3);
}
