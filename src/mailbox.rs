// Single-slot mailbox handing externally supplied moves to the turn loop
//
// The UI and the sync engine deposit; the turn loop worker waits. A deposit
// overwrites whatever was pending. Each deposit is stamped with the current turn
// epoch; the controller advances the epoch after every applied move, so clicks
// that were made for an earlier position are dropped instead of applied.

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::board::Board;
use crate::deadline::Deadline;
use crate::types::{Move, Side};

/// Result of asking a move source for the next move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRequest {
    Move(Move),
    /// The deadline ran out or the worker was stopped before a usable move arrived
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deposit {
    claimant: Side,
    mv: Move,
    epoch: u64,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<Deposit>,
    epoch: u64,
}

/// The `PendingRemoteMove` slot shared by Interactive and Remote move sources
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Slot>,
    wake: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox::default()
    }

    /// Deposits `mv` on behalf of `claimant`, replacing any pending move
    pub fn deposit(&self, claimant: Side, mv: Move) {
        let mut slot = self.slot.lock();
        let epoch = slot.epoch;
        slot.pending = Some(Deposit { claimant, mv, epoch });
        drop(slot);
        self.wake.notify_all();
    }

    /// Starts a new turn: anything deposited before now is stale
    pub fn advance_epoch(&self) {
        let mut slot = self.slot.lock();
        slot.epoch += 1;
        slot.pending = None;
    }

    /// Wakes any waiter so it can observe cancellation
    pub fn wake_all(&self) {
        // Taking the lock orders the wake after the waiter's cancellation check.
        let _slot = self.slot.lock();
        self.wake.notify_all();
    }

    /// Blocks until a move for `side` that is legal on `board` is deposited, or the
    /// deadline expires. Deposits for the wrong side, from an older epoch or not
    /// legal on `board` are discarded and waiting continues.
    pub fn wait_for(&self, side: Side, board: &Board, deadline: &Deadline) -> MoveRequest {
        let mut slot = self.slot.lock();
        loop {
            if deadline.is_cancelled() {
                return MoveRequest::Cancelled;
            }

            if let Some(deposit) = slot.pending.take() {
                if deposit.epoch != slot.epoch {
                    debug!("Ignoring stale move {} from {}", deposit.mv, deposit.claimant);
                } else if deposit.claimant != side {
                    debug!("Ignoring move {} from {}: {} is to move", deposit.mv, deposit.claimant, side);
                } else if !board.is_legal(deposit.mv) {
                    debug!("Ignoring illegal move {} from {}", deposit.mv, deposit.claimant);
                } else {
                    return MoveRequest::Move(deposit.mv);
                }
            }

            let remaining = match deadline.remaining() {
                Some(remaining) => remaining,
                None => return MoveRequest::Cancelled,
            };
            self.wake.wait_for(&mut slot, remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::CancelToken;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn short_deadline() -> Deadline {
        Deadline::after(Duration::from_millis(50), CancelToken::new())
    }

    #[test]
    fn test_legal_deposit_is_returned() {
        let mailbox = Mailbox::new();
        mailbox.deposit(Side::X, Move::CENTER);
        assert_eq!(
            mailbox.wait_for(Side::X, &Board::new(), &short_deadline()),
            MoveRequest::Move(Move::CENTER)
        );
    }

    #[test]
    fn test_wrong_claimant_and_illegal_moves_are_ignored() {
        let mailbox = Mailbox::new();
        let board = Board::from_moves(&[Move::CENTER]).unwrap();

        mailbox.deposit(Side::X, Move::new(4, 0).unwrap());
        assert_eq!(mailbox.wait_for(Side::O, &board, &short_deadline()), MoveRequest::Cancelled);

        // O is forced into region 4; 0:0 is not legal
        mailbox.deposit(Side::O, Move::new(0, 0).unwrap());
        assert_eq!(mailbox.wait_for(Side::O, &board, &short_deadline()), MoveRequest::Cancelled);
    }

    #[test]
    fn test_stale_epoch_is_ignored() {
        let mailbox = Mailbox::new();
        mailbox.deposit(Side::X, Move::CENTER);
        mailbox.advance_epoch();
        assert_eq!(mailbox.wait_for(Side::X, &Board::new(), &short_deadline()), MoveRequest::Cancelled);
    }

    #[test]
    fn test_deposit_wakes_waiter() {
        let mailbox = Arc::new(Mailbox::new());
        let depositor = mailbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            depositor.deposit(Side::X, Move::CENTER);
        });

        let deadline = Deadline::after(Duration::from_secs(5), CancelToken::new());
        assert_eq!(
            mailbox.wait_for(Side::X, &Board::new(), &deadline),
            MoveRequest::Move(Move::CENTER)
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_unblocks_waiter() {
        let mailbox = Arc::new(Mailbox::new());
        let token = CancelToken::new();
        let deadline = Deadline::after(Duration::from_secs(30), token.clone());

        let waiter = mailbox.clone();
        let handle = thread::spawn(move || waiter.wait_for(Side::X, &Board::new(), &deadline));

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        mailbox.wake_all();
        assert_eq!(handle.join().unwrap(), MoveRequest::Cancelled);
    }
}
