// Library exports for the Ultimate Tic-Tac-Toe engine
// The terminal front end, the arena tool and the integration tests all build on these

pub mod board;
pub mod config;
pub mod controller;
pub mod deadline;
pub mod error;
pub mod heuristic;
pub mod mailbox;
pub mod match_state;
pub mod presenter;
pub mod protocol;
pub mod search;
pub mod sync;
pub mod types;
