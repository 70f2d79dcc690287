// Wire messages exchanged between two peers and their framing
//
// Each frame is a 4-byte big-endian length followed by that many bytes of JSON.
// Frames never rely on one read returning one message.

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::board::Board;
use crate::error::SyncError;

/// Bumped whenever a message shape changes
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireMessage {
    /// First frame in each direction
    Hello { version: u32 },
    /// The full board after the sender applied a move
    BoardUpdate { board: Board },
    /// Proposes (or, with `force`, confirms) a new match starting on `board`.
    /// `swapped` is false when the sender plays X.
    Setup { board: Board, swapped: bool, force: bool },
    /// Asks for (or, with `force`, confirms) taking back the last move
    UndoRequest { force: bool },
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "HELLO",
            WireMessage::BoardUpdate { .. } => "BOARD_UPDATE",
            WireMessage::Setup { .. } => "SETUP",
            WireMessage::UndoRequest { .. } => "UNDO_REQUEST",
        }
    }
}

/// Reads one frame. A clean end of stream before the length prefix is `Closed`.
pub async fn read_message<R>(reader: &mut R, max_frame_bytes: usize) -> Result<WireMessage, SyncError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(SyncError::Closed),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes(prefix) as usize;
    if size > max_frame_bytes {
        return Err(SyncError::FrameTooLarge {
            size,
            limit: max_frame_bytes,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    let message: WireMessage = serde_json::from_slice(&body)?;
    debug!("<- {} ({} bytes)", message.kind(), size);
    Ok(message)
}

/// Writes one frame and flushes it
pub async fn write_message<W>(writer: &mut W, message: &WireMessage) -> Result<(), SyncError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let size = u32::try_from(body.len()).map_err(|_| SyncError::FrameTooLarge {
        size: body.len(),
        limit: u32::MAX as usize,
    })?;

    writer.write_all(&size.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    debug!("-> {} ({} bytes)", message.kind(), body.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Move;

    #[tokio::test]
    async fn test_frames_survive_split_reads() {
        // A 7-byte pipe forces every frame across several reads
        let (mut a, mut b) = tokio::io::duplex(7);
        let board = Board::from_moves(&[Move::CENTER, Move::new(4, 0).unwrap()]).unwrap();
        let sent = vec![
            WireMessage::Hello { version: PROTOCOL_VERSION },
            WireMessage::BoardUpdate { board: board.clone() },
            WireMessage::UndoRequest { force: false },
        ];

        let to_send = sent.clone();
        let writer = tokio::spawn(async move {
            for message in &to_send {
                write_message(&mut a, message).await.unwrap();
            }
        });

        for expected in &sent {
            assert_eq!(&read_message(&mut b, 65536).await.unwrap(), expected);
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversize_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&(1_000_000u32).to_be_bytes()).await.unwrap();
        match read_message(&mut b, 65536).await {
            Err(SyncError::FrameTooLarge { size, limit }) => {
                assert_eq!(size, 1_000_000);
                assert_eq!(limit, 65536);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_stream_reports_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_message(&mut b, 64).await, Err(SyncError::Closed)));
    }

    #[test]
    fn test_message_tag_names() {
        let json = serde_json::to_string(&WireMessage::UndoRequest { force: true }).unwrap();
        assert_eq!(json, r#"{"type":"UNDO_REQUEST","force":true}"#);
    }

    #[test]
    fn test_malformed_board_is_rejected() {
        let json = r#"{"type":"BOARD_UPDATE","board":{"cells":[],"next_player":"X","last_move":200}}"#;
        assert!(serde_json::from_str::<WireMessage>(json).is_err());
    }
}
