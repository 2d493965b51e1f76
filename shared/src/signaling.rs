//! Session negotiation messages exchanged out of band before a peer channel opens.
//!
//! The JSON shape mirrors what browser peers put on the wire:
//! `{"type":"offer","sdp":"..."}`, `{"type":"answer","sdp":"..."}` and
//! `{"type":"candidate","candidate":{"candidate":"...","sdpMid":"0","sdpMLineIndex":0}}`.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

impl SignalMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl From<SessionDescription> for SignalMessage {
    fn from(description: SessionDescription) -> Self {
        match description.kind {
            SdpKind::Offer => SignalMessage::Offer {
                sdp: description.sdp,
            },
            SdpKind::Answer => SignalMessage::Answer {
                sdp: description.sdp,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Value of the first `a=<name>:<value>` attribute line.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.sdp.lines().find_map(|line| {
            line.trim()
                .strip_prefix("a=")
                .and_then(|attr| attr.strip_prefix(name))
                .and_then(|rest| rest.strip_prefix(':'))
        })
    }

    /// Session id from the `o=` origin line.
    pub fn session_id(&self) -> Option<&str> {
        self.sdp
            .lines()
            .find_map(|line| line.trim().strip_prefix("o="))
            .and_then(|origin| origin.split_whitespace().nth(1))
    }
}

/// Network candidate descriptor, as produced by candidate discovery.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Host candidate for a locally bound TCP listener.
    pub fn tcp_host(address: SocketAddr) -> Self {
        Self {
            candidate: format!(
                "candidate:1 1 tcp 2130706431 {} {} typ host",
                address.ip(),
                address.port()
            ),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    /// Transport protocol field, lowercased.
    pub fn protocol(&self) -> Option<String> {
        self.fields().nth(2).map(|p| p.to_ascii_lowercase())
    }

    /// Connection address carried by the candidate line.
    pub fn address(&self) -> Option<SocketAddr> {
        let mut fields = self.fields().skip(4);
        let ip: IpAddr = fields.next()?.parse().ok()?;
        let port: u16 = fields.next()?.parse().ok()?;
        Some(SocketAddr::new(ip, port))
    }

    fn fields(&self) -> std::str::SplitWhitespace<'_> {
        let line = self.candidate.trim();
        line.strip_prefix("a=")
            .unwrap_or(line)
            .split_whitespace()
    }
}
