//! Connection seam driven by the session manager.
//!
//! A transport creates one connection per remote peer. Connections report what
//! happens to them asynchronously as [`SessionEvent`]s on the channel handed to
//! the transport; the event loop feeds those back into the session manager.

use crate::error::SessionError;
use shared::{IceCandidate, PlayerId, SessionDescription};

/// Asynchronous notifications raised by peer connections.
///
/// Every event carries the serial of the session whose connection raised it,
/// so events still queued from a replaced session can be told apart.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    CandidateDiscovered {
        peer: PlayerId,
        serial: u64,
        candidate: IceCandidate,
    },
    ChannelOpened {
        peer: PlayerId,
        serial: u64,
    },
    MessageReceived {
        peer: PlayerId,
        serial: u64,
        data: Vec<u8>,
    },
    ChannelClosed {
        peer: PlayerId,
        serial: u64,
        reason: String,
    },
}

impl SessionEvent {
    /// Peer and session serial of the connection that raised the event.
    pub fn source(&self) -> (&PlayerId, u64) {
        match self {
            SessionEvent::CandidateDiscovered { peer, serial, .. }
            | SessionEvent::ChannelOpened { peer, serial }
            | SessionEvent::MessageReceived { peer, serial, .. }
            | SessionEvent::ChannelClosed { peer, serial, .. } => (peer, *serial),
        }
    }
}

/// Factory for per-peer connections.
pub trait PeerTransport {
    type Connection: PeerConnection;

    /// Creates the connection for session `serial` with `peer`. Candidate
    /// discovery starts immediately.
    fn connect(&mut self, peer: &PlayerId, serial: u64)
        -> Result<Self::Connection, SessionError>;
}

pub trait PeerConnection {
    type Channel: DataChannel;

    fn create_data_channel(&mut self, label: &str) -> Result<Self::Channel, SessionError>;

    fn create_offer(&mut self) -> Result<SessionDescription, SessionError>;

    fn create_answer(&mut self) -> Result<SessionDescription, SessionError>;

    fn set_local_description(&mut self, description: SessionDescription)
        -> Result<(), SessionError>;

    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), SessionError>;

    fn add_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError>;

    fn close(&mut self);
}

/// Reliable ordered message stream over a peer connection.
pub trait DataChannel {
    fn label(&self) -> &str;

    fn send(&self, data: Vec<u8>) -> Result<(), SessionError>;
}
