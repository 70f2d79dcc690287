// Terminal front end for Ultimate Tic-Tac-Toe
//
// Usage:
//   ultimate-ttt [MODE] [--config <path>]
//
// Modes:
//   local                          Two players at one terminal (default)
//   ai [easy|medium|hard] [--second]
//                                  Play against the engine, optionally moving second
//   host [addr]                    Wait for a peer (default 0.0.0.0:<network.default_port>)
//   join <addr>                    Connect to a hosting peer
//
// Commands while playing:
//   <region> <cell>   play a move (both 0-8, row-major)
//   u                 undo (asks the peer when connected)
//   n                 new game (proposed to the peer when connected)
//   y / n             answer a pending question
//   q                 quit

use log::info;
use parking_lot::Mutex;
use std::env;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

use ultimate_ttt::config::Config;
use ultimate_ttt::controller::MatchController;
use ultimate_ttt::match_state::{Actor, Difficulty, MatchPhase, MatchState};
use ultimate_ttt::presenter::{Confirmation, Presenter};
use ultimate_ttt::sync::{LinkState, SyncEngine};
use ultimate_ttt::types::Move;

#[derive(Debug, Clone)]
enum Mode {
    Local,
    Ai { difficulty: Difficulty, second: bool },
    Host(SocketAddr),
    Join(SocketAddr),
}

/// Prints to stdout and keeps the one open question until the user answers it
#[derive(Default)]
struct TerminalPresenter {
    pending: Mutex<Option<oneshot::Sender<bool>>>,
}

impl TerminalPresenter {
    /// Answers the open question, if any. Returns false when nothing was asked.
    fn answer(&self, accept: bool) -> bool {
        match self.pending.lock().take() {
            Some(reply) => {
                let _ = reply.send(accept);
                true
            }
            None => false,
        }
    }
}

impl Presenter for TerminalPresenter {
    fn on_state_changed(&self, state: &MatchState) {
        println!();
        print!("{}", state.top());
        match state.phase() {
            MatchPhase::Running => {
                let side = state.side_to_move();
                let region = match state.top().active_region() {
                    Some(region) => format!("region {}", region),
                    None => "any region".to_string(),
                };
                let who = match state.actor(side) {
                    Actor::Interactive => "you",
                    Actor::Search(_) => "engine",
                    Actor::Remote => "peer",
                };
                println!("{} to move ({}) in {}", side, who, region);
            }
            phase => println!("Match {:?}", phase),
        }
    }

    fn on_notice(&self, text: &str) {
        println!("** {}", text);
    }

    fn on_confirmation_request(&self, request: Confirmation, reply: oneshot::Sender<bool>) {
        println!("?? {} (y/n)", request.prompt());
        // A newer question replaces the old one, which then counts as declined
        *self.pending.lock() = Some(reply);
    }
}

fn print_usage() {
    eprintln!("Ultimate Tic-Tac-Toe");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("  ultimate-ttt [local | ai [easy|medium|hard] [--second] | host [addr] | join <addr>]");
    eprintln!("               [--config <path>]");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("  <region> <cell>   play a move, both 0-8");
    eprintln!("  u                 undo");
    eprintln!("  n                 new game");
    eprintln!("  y / n             answer a question");
    eprintln!("  q                 quit");
}

fn parse_addr(s: &str, default_port: u16) -> Result<SocketAddr, String> {
    s.parse::<SocketAddr>()
        .or_else(|_| format!("{}:{}", s, default_port).parse::<SocketAddr>())
        .map_err(|e| format!("Invalid address '{}': {}", s, e))
}

fn parse_mode(args: &[String], config: &Config) -> Result<Mode, String> {
    let port = config.network.default_port;
    match args.first().map(String::as_str) {
        None | Some("local") => Ok(Mode::Local),
        Some("ai") => {
            let mut difficulty = Difficulty::Medium;
            let mut second = false;
            for arg in &args[1..] {
                if arg == "--second" {
                    second = true;
                } else {
                    difficulty =
                        Difficulty::parse(arg).ok_or_else(|| format!("Unknown difficulty '{}'", arg))?;
                }
            }
            Ok(Mode::Ai { difficulty, second })
        }
        Some("host") => {
            let addr = match args.get(1) {
                Some(addr) => parse_addr(addr, port)?,
                None => SocketAddr::from(([0, 0, 0, 0], port)),
            };
            Ok(Mode::Host(addr))
        }
        Some("join") => {
            let addr = args.get(1).ok_or("join requires an address")?;
            Ok(Mode::Join(parse_addr(addr, port)?))
        }
        Some(other) => Err(format!("Unknown mode '{}'", other)),
    }
}

fn parse_move(line: &str) -> Option<Move> {
    let mut parts = line.split_whitespace();
    let region = parts.next()?.parse::<usize>().ok()?;
    let cell = parts.next()?.parse::<usize>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Move::new(region, cell)
}

/// Runs a blocking controller operation off the async reactor
async fn blocking<T, F>(controller: &Arc<MatchController>, op: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&MatchController) -> T + Send + 'static,
{
    let controller = controller.clone();
    match tokio::task::spawn_blocking(move || op(&controller)).await {
        Ok(value) => Some(value),
        Err(e) => {
            log::error!("Controller task failed: {}", e);
            None
        }
    }
}

async fn start_mode(mode: &Mode, controller: &Arc<MatchController>, engine: &SyncEngine) {
    match mode.clone() {
        Mode::Local => {
            blocking(controller, |c| c.new_local_match()).await;
        }
        Mode::Ai { difficulty, second } => {
            blocking(controller, move |c| c.new_ai_match(difficulty, second)).await;
        }
        Mode::Host(addr) => match engine.listen(addr).await {
            Ok(local) => println!("Waiting for a peer on {}", local),
            Err(e) => {
                eprintln!("Error: could not listen on {}: {}", addr, e);
                process::exit(1);
            }
        },
        Mode::Join(addr) => {
            engine.connect(addr);
            let timeout = controller.config().timing.connect_timeout() + controller.config().timing.handshake_timeout();
            let start = tokio::time::Instant::now();
            while engine.link_state() == LinkState::Connecting && start.elapsed() < timeout {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if engine.link_state() == LinkState::Connected {
                // The joining side proposes the first match and moves first
                if let Err(e) = engine.propose_match(false) {
                    println!("** {}", e);
                }
            }
        }
    }
}

async fn handle_line(
    line: &str,
    mode: &Mode,
    presenter: &TerminalPresenter,
    controller: &Arc<MatchController>,
    engine: &SyncEngine,
) -> bool {
    let connected = engine.link_state() == LinkState::Connected;
    match line {
        "" => {}
        "q" => return false,
        "y" => {
            if !presenter.answer(true) {
                println!("** Nothing to answer");
            }
        }
        "n" => {
            if presenter.answer(false) {
                println!("Declined");
            } else if connected {
                let swapped = controller.snapshot().swapped();
                if let Err(e) = engine.propose_match(swapped) {
                    println!("** {}", e);
                }
            } else if matches!(mode, Mode::Host(_) | Mode::Join(_)) {
                blocking(controller, |c| c.new_local_match()).await;
            } else {
                start_mode(mode, controller, engine).await;
            }
        }
        "u" => {
            if connected && controller.has_remote_actor() {
                if let Err(e) = engine.request_undo() {
                    println!("** {}", e);
                }
            } else {
                // Failures reach the presenter as a notice
                let _ = blocking(controller, |c| c.undo()).await;
            }
        }
        _ => match parse_move(line) {
            Some(mv) => {
                let state = controller.snapshot();
                let side = state.side_to_move();
                if !state.is_running() {
                    println!("** No match in progress");
                } else if *state.actor(side) != Actor::Interactive {
                    println!("** Not your turn");
                } else if !state.top().is_legal(mv) {
                    println!("** {} is not a legal move", mv);
                } else {
                    controller.submit_move(side, mv);
                }
            }
            None => println!("** Unknown command '{}'", line),
        },
    }
    true
}

#[tokio::main]
async fn main() {
    // We default to 'info' level logging. But if the `RUST_LOG` environment variable is set,
    // we keep that value instead.
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        process::exit(0);
    }

    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = match args.get(i + 1) {
                Some(path) => path.clone(),
                None => {
                    eprintln!("Error: --config requires an argument");
                    process::exit(1);
                }
            };
            args.drain(i..=i + 1);
            Config::from_file(&path).unwrap_or_else(|e| {
                eprintln!("Error: could not load config from '{}': {}", path, e);
                process::exit(1);
            })
        }
        None => Config::load_or_default(),
    };

    let mode = match parse_mode(&args, &config) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            process::exit(1);
        }
    };

    info!("Starting Ultimate Tic-Tac-Toe in {:?} mode", mode);

    let presenter = Arc::new(TerminalPresenter::default());
    let controller = Arc::new(MatchController::new(config.clone(), presenter.clone()));
    let engine = SyncEngine::new(controller.clone(), presenter.clone(), config);

    start_mode(&mode, &controller, &engine).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !handle_line(line.trim(), &mode, &presenter, &controller, &engine).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }

    engine.stop();
    blocking(&controller, |c| c.stop()).await;
    info!("Goodbye");
}
