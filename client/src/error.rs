//! Error types for the game peer.

use shared::PlayerId;
use thiserror::Error;

/// Failures of the per-peer session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no session with peer {0}")]
    UnknownPeer(PlayerId),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("data channel {0} already exists on this connection")]
    DuplicateChannel(String),

    #[error("connection closed")]
    Closed,
}

/// Failures delivering negotiation messages out of band.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signal encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relay packet encoding failed: {0}")]
    Packet(#[from] bincode::Error),

    #[error("relay rejected registration: {0}")]
    Rejected(String),

    #[error("no signaling endpoint registered for {0}")]
    UnknownPeer(PlayerId),

    #[error("signaling endpoint closed")]
    Closed,
}

/// Why an inbound payload was discarded.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("malformed game state payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failures reading or writing the persisted player profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("profile is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("profile root must be a JSON object")]
    NotAnObject,

    #[error("no player name stored and none supplied")]
    MissingName,
}

/// Top-level error for starting and running a peer.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
