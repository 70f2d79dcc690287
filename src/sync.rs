// Peer sync engine: connection management and the replay-validated move exchange
//
// Link states follow NONE -> LISTENING -> CONNECTING -> CONNECTED -> NONE. At most
// one session is live. Each connection attempt gets a fresh generation number;
// anything tagged with an older generation (a late handshake, a retired reader, a
// turn loop still holding an old link) is ignored.
//
// Every session runs a reader task and a writer task. The reader is the only place
// a session is torn down: local disconnects and writer failures just wake it.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::board::Board;
use crate::config::Config;
use crate::controller::{MatchController, PeerLink};
use crate::error::SyncError;
use crate::match_state::Actor;
use crate::presenter::{Confirmation, Presenter};
use crate::protocol::{read_message, write_message, WireMessage, PROTOCOL_VERSION};
use crate::types::{Move, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    None,
    Listening,
    Connecting,
    Connected,
}

/// Checks an inbound board against the last board both peers agreed on. The
/// incoming board must be exactly the snapshot with its last move played.
pub fn validate_update(snapshot: &Board, incoming: &Board) -> Result<Move, SyncError> {
    let mv = incoming
        .last_move()
        .ok_or_else(|| SyncError::ProtocolDesync("update carries no move".to_string()))?;

    let replayed = snapshot
        .apply(mv)
        .map_err(|e| SyncError::ProtocolDesync(format!("{} with {} to move", e, snapshot.next_player())))?;

    if replayed != *incoming {
        return Err(SyncError::ProtocolDesync(format!(
            "board after {} does not match its replay",
            mv
        )));
    }
    Ok(mv)
}

/// The live connection to one peer
struct SyncSession {
    generation: u64,
    /// Last board both peers agree on
    peer_snapshot: Board,
    outbound: mpsc::UnboundedSender<WireMessage>,
    shutdown: Arc<Notify>,
}

impl SyncSession {
    fn send(&self, message: WireMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Session {} writer is gone, dropping message", self.generation);
        }
    }
}

struct ListenerTask {
    task: JoinHandle<()>,
    addr: SocketAddr,
}

struct EngineState {
    link: LinkState,
    generation: u64,
    session: Option<SyncSession>,
    listener: Option<ListenerTask>,
    connector: Option<JoinHandle<()>>,
    /// Demotion of a replaced session; a new match waits for it
    demotion: Option<JoinHandle<()>>,
    block_incoming: bool,
}

impl EngineState {
    fn session_mut(&mut self, generation: u64) -> Option<&mut SyncSession> {
        self.session
            .as_mut()
            .filter(|session| session.generation == generation)
    }

    /// Where the link falls back to once no session or attempt is live
    fn idle_link(&self) -> LinkState {
        if self.listener.is_some() {
            LinkState::Listening
        } else {
            LinkState::None
        }
    }
}

struct EngineInner {
    controller: Arc<MatchController>,
    presenter: Arc<dyn Presenter>,
    config: Config,
    runtime: Handle,
    state: Mutex<EngineState>,
}

/// Turn loop side of a session: forwards boards while its generation is current
struct SessionLink {
    inner: Weak<EngineInner>,
    generation: u64,
}

impl PeerLink for SessionLink {
    fn send_board(&self, board: &Board) {
        if let Some(inner) = self.inner.upgrade() {
            inner.send_board(self.generation, board);
        }
    }
}

/// Connection manager owning the listener, the connector and the single session
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Creates an idle engine. Must be called from within a tokio runtime.
    pub fn new(controller: Arc<MatchController>, presenter: Arc<dyn Presenter>, config: Config) -> Self {
        let block_incoming = config.network.block_incoming;
        SyncEngine {
            inner: Arc::new(EngineInner {
                controller,
                presenter,
                config,
                runtime: Handle::current(),
                state: Mutex::new(EngineState {
                    link: LinkState::None,
                    generation: 0,
                    session: None,
                    listener: None,
                    connector: None,
                    demotion: None,
                    block_incoming,
                }),
            }),
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.inner.state.lock().link
    }

    /// When true, inbound connections are refused while a session is live;
    /// otherwise they replace it
    pub fn set_block_incoming(&self, block: bool) {
        self.inner.state.lock().block_incoming = block;
    }

    /// Starts accepting inbound connections on `addr`, cancelling any outbound attempt
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, SyncError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        let inner = self.inner.clone();
        let task = self.inner.runtime.spawn(inner.accept_loop(listener));

        let mut state = self.inner.state.lock();
        if let Some(connector) = state.connector.take() {
            connector.abort();
            if state.link == LinkState::Connecting {
                state.generation += 1;
            }
        }
        if let Some(old) = state.listener.replace(ListenerTask { task, addr: local }) {
            old.task.abort();
        }
        if state.session.is_none() {
            state.link = LinkState::Listening;
        }
        info!("Listening on {}", local);
        Ok(local)
    }

    /// Connects to a listening peer in the background, cancelling the listener and
    /// any live session. Failures are reported through the presenter.
    pub fn connect(&self, addr: SocketAddr) {
        let generation = self.inner.begin_attempt(true);
        let inner = self.inner.clone();
        info!("Connecting to {}", addr);

        let task = self.inner.runtime.spawn(async move {
            let timeout = inner.config.timing.connect_timeout();
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY: {}", e);
                    }
                    // establish reports its own failures
                    let _ = inner.establish(generation, stream).await;
                }
                Ok(Err(e)) => inner.attempt_failed(generation, &SyncError::from(e)),
                Err(_) => inner.attempt_failed(
                    generation,
                    &SyncError::Handshake(format!("connecting to {} timed out", addr)),
                ),
            }
        });
        self.inner.state.lock().connector = Some(task);
    }

    /// Runs a session over an already connected stream, replacing any live one.
    /// Returns once the handshake has completed or failed.
    pub async fn attach<S>(&self, stream: S) -> Result<(), SyncError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let generation = self.inner.begin_attempt(false);
        self.inner.establish(generation, stream).await
    }

    /// Asks the peer to start a new match on an empty board. `swapped` gives the
    /// peer the first move.
    pub fn propose_match(&self, swapped: bool) -> Result<(), SyncError> {
        let state = self.inner.state.lock();
        let session = state.session.as_ref().ok_or(SyncError::NotConnected)?;
        info!("Proposing a new match, local side {}", if swapped { Side::O } else { Side::X });
        session.send(WireMessage::Setup {
            board: Board::new(),
            swapped,
            force: false,
        });
        Ok(())
    }

    /// Asks the peer to take back the last move; both sides undo once it accepts
    pub fn request_undo(&self) -> Result<(), SyncError> {
        let state = self.inner.state.lock();
        let session = state.session.as_ref().ok_or(SyncError::NotConnected)?;
        info!("Requesting undo from peer");
        session.send(WireMessage::UndoRequest { force: false });
        Ok(())
    }

    /// Closes the live session or abandons the pending attempt; the listener stays up
    pub fn disconnect(&self) {
        let shutdown = {
            let mut state = self.inner.state.lock();
            if let Some(connector) = state.connector.take() {
                connector.abort();
            }
            if state.link == LinkState::Connecting && state.session.is_none() {
                state.generation += 1;
                state.link = state.idle_link();
            }
            state.session.as_ref().map(|session| session.shutdown.clone())
        };

        match shutdown {
            Some(shutdown) => {
                info!("Disconnecting from peer");
                shutdown.notify_one();
            }
            None => debug!("Disconnect requested with no live session"),
        }
    }

    /// Shuts everything down: listener, connector and session
    pub fn stop(&self) {
        let listener = self.inner.state.lock().listener.take();
        if let Some(listener) = listener {
            info!("Stopped listening on {}", listener.addr);
            listener.task.abort();
        }
        self.disconnect();
    }
}

impl EngineInner {
    fn max_frame_bytes(&self) -> usize {
        self.config.network.max_frame_bytes
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().session_mut(generation).is_some()
    }

    /// Opens a new generation for an outbound or attached stream
    fn begin_attempt(self: &Arc<Self>, cancel_listener: bool) -> u64 {
        let (generation, replaced) = {
            let mut state = self.state.lock();
            if let Some(connector) = state.connector.take() {
                connector.abort();
            }
            if cancel_listener {
                if let Some(listener) = state.listener.take() {
                    info!("Stopped listening on {}", listener.addr);
                    listener.task.abort();
                }
            }
            state.generation += 1;
            state.link = LinkState::Connecting;
            (state.generation, state.session.take())
        };

        if let Some(old) = replaced {
            self.retire(old);
        }
        generation
    }

    /// Ends a session that was replaced before its reader noticed
    fn retire(self: &Arc<Self>, old: SyncSession) {
        info!("Closing session {} in favour of a new connection", old.generation);
        old.shutdown.notify_one();
        self.controller.set_peer_link(None);
        let inner = self.clone();
        let mut state = self.state.lock();
        let earlier = state.demotion.take();
        state.demotion = Some(self.runtime.spawn(async move {
            if let Some(earlier) = earlier {
                let _ = earlier.await;
            }
            inner.demote().await
        }));
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.on_inbound(stream, peer),
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn on_inbound(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let (generation, replaced) = {
            let mut state = self.state.lock();
            let busy = matches!(state.link, LinkState::Connecting | LinkState::Connected);
            if busy && state.block_incoming {
                info!("Rejecting connection from {}: link is {:?}", peer, state.link);
                drop(state);
                drop(stream);
                return;
            }
            state.generation += 1;
            state.link = LinkState::Connecting;
            (state.generation, state.session.take())
        };

        if let Some(old) = replaced {
            self.retire(old);
        }

        info!("Accepted connection from {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        let inner = self.clone();
        self.runtime.spawn(async move {
            let _ = inner.establish(generation, stream).await;
        });
    }

    /// Exchanges HELLO frames and, on success, installs the session
    async fn establish<S>(self: &Arc<Self>, generation: u64, stream: S) -> Result<(), SyncError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let max = self.max_frame_bytes();

        let handshake = async {
            write_message(&mut writer, &WireMessage::Hello { version: PROTOCOL_VERSION }).await?;
            let reply = read_message(&mut reader, max).await?;
            Ok::<WireMessage, SyncError>(reply)
        };

        let result = match tokio::time::timeout(self.config.timing.handshake_timeout(), handshake).await {
            Ok(Ok(WireMessage::Hello { version })) if version == PROTOCOL_VERSION => Ok(()),
            Ok(Ok(WireMessage::Hello { version })) => Err(SyncError::Handshake(format!(
                "peer speaks version {}, expected {}",
                version, PROTOCOL_VERSION
            ))),
            Ok(Ok(other)) => Err(SyncError::Handshake(format!("expected HELLO, got {}", other.kind()))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SyncError::Handshake("timed out".to_string())),
        };

        if let Err(e) = result {
            self.attempt_failed(generation, &e);
            return Err(e);
        }
        self.install(generation, reader, writer)
    }

    fn attempt_failed(&self, generation: u64, error: &SyncError) {
        let current = {
            let mut state = self.state.lock();
            let current = state.generation == generation && state.session.is_none();
            if current {
                state.link = state.idle_link();
            }
            current
        };

        if current {
            warn!("Connection attempt failed: {}", error);
            self.presenter.on_notice(&format!("Connection failed: {}", error));
        } else {
            debug!("Abandoned attempt {} ended: {}", generation, error);
        }
    }

    fn install<R, W>(self: &Arc<Self>, generation: u64, reader: R, writer: W) -> Result<(), SyncError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, queue) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!("Handshake {} finished after being superseded", generation);
                return Err(SyncError::Closed);
            }
            state.session = Some(SyncSession {
                generation,
                peer_snapshot: Board::new(),
                outbound,
                shutdown: shutdown.clone(),
            });
            state.link = LinkState::Connected;
            state.connector = None;
        }

        self.controller.set_peer_link(Some(Arc::new(SessionLink {
            inner: Arc::downgrade(self),
            generation,
        })));

        self.runtime.spawn(write_loop(writer, queue, shutdown.clone()));
        self.runtime.spawn(self.clone().read_loop(generation, reader, shutdown));

        info!("Session {} connected", generation);
        self.presenter.on_notice("Connected to peer");
        Ok(())
    }

    async fn read_loop<R>(self: Arc<Self>, generation: u64, mut reader: R, shutdown: Arc<Notify>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let max = self.max_frame_bytes();
        let result = loop {
            let message = tokio::select! {
                _ = shutdown.notified() => break Ok(()),
                message = read_message(&mut reader, max) => message,
            };

            match message {
                Ok(message) => {
                    if let Err(e) = self.handle_message(generation, message).await {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        self.finish_session(generation, result).await;
    }

    /// Tears down the session if it is still the live one
    async fn finish_session(self: &Arc<Self>, generation: u64, result: Result<(), SyncError>) {
        let current = {
            let mut state = self.state.lock();
            if state.session_mut(generation).is_some() {
                state.session = None;
                state.link = state.idle_link();
                true
            } else {
                false
            }
        };

        let text = match &result {
            Ok(()) => "Disconnected from peer".to_string(),
            Err(SyncError::Closed) => "Peer disconnected".to_string(),
            Err(e) if e.is_desync() => format!("Lost sync with peer ({}), continuing locally", e),
            Err(e) => format!("Connection lost: {}", e),
        };
        match &result {
            Ok(()) | Err(SyncError::Closed) => info!("Session {} closed", generation),
            Err(e) => warn!("Session {} failed: {}", generation, e),
        }

        if !current {
            return;
        }

        self.controller.set_peer_link(None);
        self.demote().await;
        self.presenter.on_notice(&text);
    }

    /// Turns a match with a Remote actor into a local one
    async fn demote(&self) {
        if !self.controller.has_remote_actor() {
            return;
        }
        let controller = self.controller.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || controller.turn_local()).await {
            error!("Turning the match local failed: {}", e);
        }
    }

    /// Outbound BOARD_UPDATE from the turn loop
    fn send_board(&self, generation: u64, board: &Board) {
        let mut state = self.state.lock();
        match state.session_mut(generation) {
            Some(session) => {
                session.peer_snapshot = board.clone();
                session.send(WireMessage::BoardUpdate { board: board.clone() });
            }
            None => debug!("Dropping board for retired session {}", generation),
        }
    }

    fn agreed_board(&self, generation: u64) -> Option<Board> {
        self.state
            .lock()
            .session_mut(generation)
            .map(|session| session.peer_snapshot.clone())
    }

    /// Resets the agreed board and optionally queues a reply, atomically
    fn rebase(&self, generation: u64, board: &Board, reply: Option<WireMessage>) {
        let mut state = self.state.lock();
        if let Some(session) = state.session_mut(generation) {
            session.peer_snapshot = board.clone();
            if let Some(reply) = reply {
                session.send(reply);
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, generation: u64, message: WireMessage) -> Result<(), SyncError> {
        match message {
            WireMessage::Hello { .. } => {
                debug!("Ignoring repeated HELLO");
                Ok(())
            }
            WireMessage::BoardUpdate { board } => self.on_board_update(generation, board),
            WireMessage::Setup { board, swapped, force: true } => {
                self.apply_setup(generation, board, swapped, None).await;
                Ok(())
            }
            WireMessage::Setup { board, swapped, force: false } => {
                // The sender plays O when swapped, which leaves us the first move
                let (reply, answer) = oneshot::channel();
                self.presenter
                    .on_confirmation_request(Confirmation::NewMatch { local_first: swapped }, reply);

                let inner = self.clone();
                self.runtime.spawn(async move {
                    if !answer.await.unwrap_or(false) {
                        info!("Declined new match from peer");
                        return;
                    }
                    if !inner.is_current(generation) {
                        debug!("Setup accepted after session {} ended", generation);
                        return;
                    }
                    let confirm = WireMessage::Setup {
                        board: board.clone(),
                        swapped: !swapped,
                        force: true,
                    };
                    inner.apply_setup(generation, board, swapped, Some(confirm)).await;
                });
                Ok(())
            }
            WireMessage::UndoRequest { force: true } => {
                self.apply_undo(generation, None).await;
                Ok(())
            }
            WireMessage::UndoRequest { force: false } => {
                let (reply, answer) = oneshot::channel();
                self.presenter.on_confirmation_request(Confirmation::Undo, reply);

                let inner = self.clone();
                self.runtime.spawn(async move {
                    if !answer.await.unwrap_or(false) {
                        info!("Declined undo request from peer");
                        return;
                    }
                    if !inner.is_current(generation) {
                        debug!("Undo accepted after session {} ended", generation);
                        return;
                    }
                    inner
                        .apply_undo(generation, Some(WireMessage::UndoRequest { force: true }))
                        .await;
                });
                Ok(())
            }
        }
    }

    fn on_board_update(&self, generation: u64, board: Board) -> Result<(), SyncError> {
        let (claimant, mv) = {
            let mut state = self.state.lock();
            let session = match state.session_mut(generation) {
                Some(session) => session,
                None => return Ok(()),
            };
            let claimant = session.peer_snapshot.next_player();
            let mv = validate_update(&session.peer_snapshot, &board)?;
            (claimant, mv)
        };

        if !self.controller.actor(claimant).is_remote() {
            return Err(SyncError::ProtocolDesync(format!(
                "peer played {} for the local side {}",
                mv, claimant
            )));
        }

        if let Some(session) = self.state.lock().session_mut(generation) {
            session.peer_snapshot = board;
        }
        debug!("Peer played {} as {}", mv, claimant);
        self.controller.deliver_remote_move(claimant, mv);
        Ok(())
    }

    /// Starts the negotiated match. `sender_swapped` is the SETUP flag as sent by
    /// the peer, so the peer is O when it is true.
    async fn apply_setup(
        self: &Arc<Self>,
        generation: u64,
        board: Board,
        sender_swapped: bool,
        reply: Option<WireMessage>,
    ) {
        let demotion = self.state.lock().demotion.take();
        if let Some(demotion) = demotion {
            if let Err(e) = demotion.await {
                error!("Demoting the replaced match failed: {}", e);
            }
        }

        let (x, o) = if sender_swapped {
            (Actor::Interactive, Actor::Remote)
        } else {
            (Actor::Remote, Actor::Interactive)
        };
        info!(
            "Starting networked match, local side {}",
            if sender_swapped { Side::X } else { Side::O }
        );

        let inner = self.clone();
        let controller = self.controller.clone();
        let started = tokio::task::spawn_blocking(move || {
            controller.new_match_with(x, o, board, !sender_swapped, |start| {
                inner.rebase(generation, start, reply)
            })
        })
        .await;
        if let Err(e) = started {
            error!("Starting the networked match failed: {}", e);
        }
    }

    /// Undoes locally and moves the agreed board back with it
    async fn apply_undo(self: &Arc<Self>, generation: u64, reply: Option<WireMessage>) {
        if reply.is_none() {
            info!("Peer confirmed an undo");
        }

        // A validated peer move may still be waiting in the mailbox; the undo has
        // to start from the board both sides agree on.
        let inner = self.clone();
        let controller = self.controller.clone();
        let undone = tokio::task::spawn_blocking(move || {
            controller.undo_with(
                || inner.agreed_board(generation),
                |top| inner.rebase(generation, top, reply),
            )
        })
        .await;
        match undone {
            Ok(Ok(top)) => debug!("Undo applied, {} to move", top.next_player()),
            Ok(Err(e)) => info!("Undo from peer not applied: {}", e),
            Err(e) => error!("Undo task failed: {}", e),
        }
    }
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<WireMessage>, shutdown: Arc<Notify>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            warn!("Sending {} failed: {}", message.kind(), e);
            shutdown.notify_one();
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn center_then(region: usize, cell: usize) -> (Board, Board) {
        let snapshot = Board::from_moves(&[Move::CENTER]).unwrap();
        let next = snapshot.apply(Move::new(region, cell).unwrap()).unwrap();
        (snapshot, next)
    }

    #[test]
    fn test_valid_update_yields_its_move() {
        let (snapshot, next) = center_then(4, 0);
        assert_eq!(validate_update(&snapshot, &next).unwrap(), Move::new(4, 0).unwrap());
    }

    #[test]
    fn test_update_without_move_is_desync() {
        let snapshot = Board::new();
        let err = validate_update(&snapshot, &Board::new()).unwrap_err();
        assert!(err.is_desync());
    }

    #[test]
    fn test_illegal_last_move_is_desync() {
        // After 4:4, O is confined to region 4; a board whose last move is 0:0 cannot follow
        let snapshot = Board::from_moves(&[Move::CENTER]).unwrap();
        let elsewhere = Board::from_moves(&[Move::new(0, 4).unwrap(), Move::new(4, 0).unwrap()]).unwrap();
        let incoming = Board::from_moves(&[Move::new(4, 0).unwrap(), Move::new(0, 0).unwrap()]).unwrap();
        assert!(validate_update(&snapshot, &incoming).unwrap_err().is_desync());
        assert!(validate_update(&snapshot, &elsewhere).unwrap_err().is_desync());
    }

    #[test]
    fn test_skipped_move_is_desync() {
        // Two moves ahead of the snapshot: the last move is legal on the snapshot but
        // the replayed board lacks the skipped one
        let snapshot = Board::from_moves(&[Move::CENTER]).unwrap();
        let moves = [Move::CENTER, Move::new(4, 1).unwrap(), Move::new(1, 4).unwrap(), Move::new(4, 2).unwrap()];
        let incoming = Board::from_moves(&moves).unwrap();
        assert!(validate_update(&snapshot, &incoming).unwrap_err().is_desync());
    }
}
