// Arena: plays the engine against itself at two difficulties and reports the results
//
// Usage:
//   cargo run --release --bin arena -- <left> <right> [options]
//
// Options:
//   --games <n>        Number of games, alternating who moves first (default: 20)
//   --config <path>    Path to Ultimate.toml (default: Ultimate.toml)

use log::info;
use rayon::prelude::*;
use std::env;
use std::process;
use std::time::Instant;

use ultimate_ttt::board::Board;
use ultimate_ttt::config::Config;
use ultimate_ttt::deadline::{CancelToken, Deadline};
use ultimate_ttt::match_state::Difficulty;
use ultimate_ttt::search::SearchStrategy;
use ultimate_ttt::types::{Outcome, Side};

fn print_usage() {
    eprintln!("Ultimate Tic-Tac-Toe Arena");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("  arena <easy|medium|hard> <easy|medium|hard> [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("  --games <n>         Number of games (default: 20)");
    eprintln!("  --config <path>     Path to Ultimate.toml (default: Ultimate.toml)");
    eprintln!("  --help              Show this help message");
}

/// Win/draw/loss counts from the left player's point of view
#[derive(Debug, Default, Clone, Copy)]
struct Wdl {
    win: u32,
    draw: u32,
    loss: u32,
}

impl std::ops::Add for Wdl {
    type Output = Wdl;

    fn add(self, other: Wdl) -> Wdl {
        Wdl {
            win: self.win + other.win,
            draw: self.draw + other.draw,
            loss: self.loss + other.loss,
        }
    }
}

struct GameResult {
    wdl: Wdl,
    moves: usize,
    seconds: f32,
}

fn play_game(config: &Config, left: Difficulty, right: Difficulty, left_side: Side) -> GameResult {
    let mut left_ai = SearchStrategy::from_params(&config.search_params(left), config);
    let mut right_ai = SearchStrategy::from_params(&config.search_params(right), config);
    let cancel = CancelToken::new();

    let start = Instant::now();
    let mut board = Board::new();
    let mut moves = 0;

    while !board.is_done() {
        let deadline = Deadline::after(config.timing.move_deadline(), cancel.clone());
        let ai = if board.next_player() == left_side {
            &mut left_ai
        } else {
            &mut right_ai
        };
        let mv = match ai.select_move(&board, &deadline).or_else(|| ai.fallback_move(&board)) {
            Some(mv) => mv,
            None => break,
        };
        if board.play(mv).is_err() {
            break;
        }
        moves += 1;
    }

    let wdl = match board.outcome() {
        Some(Outcome::WonBy(side)) if side == left_side => Wdl { win: 1, ..Wdl::default() },
        Some(Outcome::WonBy(_)) => Wdl { loss: 1, ..Wdl::default() },
        _ => Wdl { draw: 1, ..Wdl::default() },
    };

    GameResult {
        wdl,
        moves,
        seconds: start.elapsed().as_secs_f32(),
    }
}

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "warn");
    }
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.contains(&"--help".to_string()) {
        print_usage();
        process::exit(if args.contains(&"--help".to_string()) { 0 } else { 1 });
    }

    let parse = |s: &str| {
        Difficulty::parse(s).unwrap_or_else(|| {
            eprintln!("Error: unknown difficulty '{}'", s);
            process::exit(1);
        })
    };
    let left = parse(&args[1]);
    let right = parse(&args[2]);

    let mut games: u32 = 20;
    let mut config_path = "Ultimate.toml".to_string();
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--games" => {
                games = match args.get(i + 1).and_then(|n| n.parse().ok()) {
                    Some(n) => n,
                    None => {
                        eprintln!("Error: --games requires a number");
                        process::exit(1);
                    }
                };
                i += 1;
            }
            "--config" => {
                config_path = match args.get(i + 1) {
                    Some(path) => path.clone(),
                    None => {
                        eprintln!("Error: --config requires an argument");
                        process::exit(1);
                    }
                };
                i += 1;
            }
            other => {
                eprintln!("Error: Unknown option '{}'", other);
                print_usage();
                process::exit(1);
            }
        }
        i += 1;
    }

    let config = Config::from_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from '{}': {}", config_path, e);
        eprintln!("Using default configuration");
        Config::default_hardcoded()
    });

    info!("Arena: {:?} vs {:?}, {} games", left, right, games);
    println!("{:?} vs {:?}, {} games", left, right, games);

    let results: Vec<GameResult> = (0..games)
        .into_par_iter()
        .map(|game| {
            let left_side = if game % 2 == 0 { Side::X } else { Side::O };
            play_game(&config, left, right, left_side)
        })
        .collect();

    let total = results.iter().fold(Wdl::default(), |acc, r| acc + r.wdl);
    let count = results.len().max(1) as f32;
    let average_moves = results.iter().map(|r| r.moves as f32).sum::<f32>() / count;
    let average_seconds = results.iter().map(|r| r.seconds).sum::<f32>() / count;

    println!();
    println!("{:?}: {} wins, {} draws, {} losses", left, total.win, total.draw, total.loss);
    println!("Average game: {:.1} moves, {:.2}s", average_moves, average_seconds);
}
