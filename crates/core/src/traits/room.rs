//! Room transport traits
//!
//! The room protocol itself lives outside this workspace. These traits are
//! the seam the session lifecycle manager talks to.

use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use crate::credential::AccessCredential;
use crate::error::{Result, TransportError};
use crate::AudioFrame;

/// Why a room connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// This agent asked to leave
    ClientInitiated,
    RoomClosed,
    ParticipantRemoved,
    ConnectionLost,
    ServerRestart,
    Unknown,
}

impl DisconnectReason {
    /// Whether the session should try to rejoin
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DisconnectReason::ConnectionLost | DisconnectReason::ServerRestart | DisconnectReason::Unknown
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::ClientInitiated => "client_initiated",
            DisconnectReason::RoomClosed => "room_closed",
            DisconnectReason::ParticipantRemoved => "participant_removed",
            DisconnectReason::ConnectionLost => "connection_lost",
            DisconnectReason::ServerRestart => "server_restart",
            DisconnectReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Events observed on a live room connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Joined,
    /// Data packet on the side channel
    DataMessage {
        participant: Option<String>,
        payload: Vec<u8>,
    },
    Disconnected(DisconnectReason),
}

/// Parameters for joining a room
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub url: String,
    pub room: String,
    pub identity: String,
    pub display_name: String,
}

/// Dials rooms
#[async_trait]
pub trait RoomTransport: Send + Sync + 'static {
    /// Join a room.
    ///
    /// Returns [`crate::Error::Auth`] when the credential is refused and
    /// [`crate::Error::Transport`] for anything network related.
    async fn connect(
        &self,
        request: &JoinRequest,
        credential: &AccessCredential,
    ) -> Result<Arc<dyn RoomConnection>>;
}

/// A joined room
#[async_trait]
pub trait RoomConnection: Send + Sync + 'static {
    /// Connection events. The stream ends after `Disconnected`.
    fn events(&self) -> Pin<Box<dyn Stream<Item = RoomEvent> + Send>>;

    /// Audio from the primary remote participant
    fn audio_input(&self) -> Pin<Box<dyn Stream<Item = AudioFrame> + Send>>;

    /// Publish one frame of agent speech
    async fn publish_audio(&self, frame: AudioFrame) -> std::result::Result<(), TransportError>;

    /// Send a data packet on the side channel
    async fn send(&self, payload: Vec<u8>) -> std::result::Result<(), TransportError>;

    async fn disconnect(&self) -> std::result::Result<(), TransportError>;
}
