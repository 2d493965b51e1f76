//! Per-peer connection lifecycle and best-effort payload delivery.
//!
//! Each remote peer gets one connection record with a single data channel.
//! A record walks `New -> Connecting -> Open -> Closed` and never leaves
//! `Closed`; only a fresh session replaces it. Sends to a channel that is not
//! open are dropped without error and counted in [`SessionStats`].

use crate::error::SessionError;
use crate::signaling::SignalingTransport;
use crate::transport::{DataChannel, PeerConnection, PeerTransport, SessionEvent};
use log::{debug, info, warn};
use shared::{
    GameStatePayload, IceCandidate, PlayerId, SessionDescription, SignalMessage, GAME_CHANNEL,
};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    New,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// Identifies one session with a peer; a replaced session gets a new serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub peer: PlayerId,
    pub serial: u64,
}

pub struct PeerConnectionRecord<C: PeerConnection> {
    pub peer: PlayerId,
    pub serial: u64,
    pub connection: C,
    pub channel: C::Channel,
    pub state: ChannelState,
    pub role: Option<Role>,
    seen_candidates: HashSet<IceCandidate>,
}

/// Counters for the silent paths of the session layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sent: u64,
    pub dropped_not_open: u64,
    pub dropped_unknown_peer: u64,
    pub send_errors: u64,
    pub duplicate_candidates: u64,
    pub ignored_signals: u64,
    pub stale_events: u64,
}

pub struct PeerSessionManager<T: PeerTransport, S: SignalingTransport> {
    local_id: PlayerId,
    transport: T,
    signaling: S,
    peers: HashMap<PlayerId, PeerConnectionRecord<T::Connection>>,
    next_serial: u64,
    stats: SessionStats,
}

impl<T: PeerTransport, S: SignalingTransport> PeerSessionManager<T, S> {
    pub fn new(local_id: &PlayerId, transport: T, signaling: S) -> Self {
        Self {
            local_id: local_id.clone(),
            transport,
            signaling,
            peers: HashMap::new(),
            next_serial: 1,
            stats: SessionStats::default(),
        }
    }

    /// Creates a connection and its data channel for `peer`, replacing any
    /// previous record. Candidates discovered by the connection are forwarded
    /// to `peer` as they are reported through [`Self::handle_event`].
    pub fn open_session(&mut self, peer: &PlayerId) -> Result<SessionHandle, SessionError> {
        if *peer == self.local_id {
            return Err(SessionError::UnknownPeer(peer.clone()));
        }
        if let Some(mut old) = self.peers.remove(peer) {
            debug!("Replacing {:?} session with {}", old.state, peer);
            old.connection.close();
        }

        let serial = self.next_serial;
        self.next_serial += 1;
        let mut connection = self.transport.connect(peer, serial)?;
        let channel = connection.create_data_channel(GAME_CHANNEL)?;

        info!("Opened session {} with {}", serial, peer);
        self.peers.insert(
            peer.clone(),
            PeerConnectionRecord {
                peer: peer.clone(),
                serial,
                connection,
                channel,
                state: ChannelState::New,
                role: None,
                seen_candidates: HashSet::new(),
            },
        );
        Ok(SessionHandle {
            peer: peer.clone(),
            serial,
        })
    }

    /// Opens a session and sends the offer that starts negotiation.
    pub fn connect(&mut self, peer: &PlayerId) -> Result<SessionHandle, SessionError> {
        let handle = self.open_session(peer)?;
        let result = self.send_offer(peer);
        if let Err(e) = result {
            self.fail(peer, &e.to_string());
            return Err(e);
        }
        Ok(handle)
    }

    fn send_offer(&mut self, peer: &PlayerId) -> Result<(), SessionError> {
        let record = self
            .peers
            .get_mut(peer)
            .ok_or_else(|| SessionError::UnknownPeer(peer.clone()))?;
        let offer = record.connection.create_offer()?;
        record.connection.set_local_description(offer.clone())?;
        record.role = Some(Role::Offerer);
        record.state = ChannelState::Connecting;
        self.signaling.send(peer, &offer.into())?;
        debug!("Sent offer to {}", peer);
        Ok(())
    }

    pub fn on_signaling_message(
        &mut self,
        from: &PlayerId,
        message: SignalMessage,
    ) -> Result<(), SessionError> {
        if *from == self.local_id {
            self.stats.ignored_signals += 1;
            warn!("Ignoring {} addressed from ourselves", message.kind());
            return Ok(());
        }

        match message {
            SignalMessage::Offer { sdp } => self.on_offer(from, SessionDescription::offer(sdp)),
            SignalMessage::Answer { sdp } => self.on_answer(from, SessionDescription::answer(sdp)),
            SignalMessage::Candidate { candidate } => self.on_candidate(from, candidate),
        }
    }

    fn on_offer(&mut self, from: &PlayerId, offer: SessionDescription) -> Result<(), SessionError> {
        if let Some(record) = self.peers.get(from) {
            match (record.state, record.role) {
                (ChannelState::Open, _) => {
                    self.stats.ignored_signals += 1;
                    warn!("Ignoring offer from {}: session already open", from);
                    return Ok(());
                }
                // Both sides offered; the smaller id keeps its own offer.
                (ChannelState::Connecting, Some(Role::Offerer)) if self.local_id < *from => {
                    self.stats.ignored_signals += 1;
                    info!("Offer collision with {}, keeping ours", from);
                    return Ok(());
                }
                _ => {}
            }
        }

        self.open_session(from)?;
        let result = self.answer(from, offer);
        if let Err(e) = &result {
            self.fail(from, &e.to_string());
        }
        result
    }

    fn answer(&mut self, from: &PlayerId, offer: SessionDescription) -> Result<(), SessionError> {
        let record = self
            .peers
            .get_mut(from)
            .ok_or_else(|| SessionError::UnknownPeer(from.clone()))?;
        record.connection.set_remote_description(offer)?;
        let answer = record.connection.create_answer()?;
        record.connection.set_local_description(answer.clone())?;
        record.role = Some(Role::Answerer);
        record.state = ChannelState::Connecting;
        self.signaling.send(from, &answer.into())?;
        debug!("Answered offer from {}", from);
        Ok(())
    }

    fn on_answer(
        &mut self,
        from: &PlayerId,
        answer: SessionDescription,
    ) -> Result<(), SessionError> {
        let Some(record) = self.peers.get_mut(from) else {
            self.stats.ignored_signals += 1;
            warn!("Ignoring answer from {}: no session", from);
            return Ok(());
        };
        if record.role != Some(Role::Offerer) || record.state != ChannelState::Connecting {
            self.stats.ignored_signals += 1;
            warn!(
                "Ignoring answer from {} in state {:?} as {:?}",
                from, record.state, record.role
            );
            return Ok(());
        }
        if let Err(e) = record.connection.set_remote_description(answer) {
            self.fail(from, &e.to_string());
            return Err(e);
        }
        debug!("Applied answer from {}", from);
        Ok(())
    }

    fn on_candidate(
        &mut self,
        from: &PlayerId,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        let Some(record) = self.peers.get_mut(from) else {
            self.stats.ignored_signals += 1;
            warn!("Ignoring candidate from {}: no session", from);
            return Ok(());
        };
        if record.state == ChannelState::Closed {
            self.stats.ignored_signals += 1;
            debug!("Ignoring candidate from {}: session closed", from);
            return Ok(());
        }
        if !record.seen_candidates.insert(candidate.clone()) {
            self.stats.duplicate_candidates += 1;
            debug!("Duplicate candidate from {}", from);
            return Ok(());
        }
        record.connection.add_candidate(candidate)
    }

    /// Applies a connection event. Returns the payload bytes of an inbound
    /// message, to be handed to the reconciler.
    ///
    /// Events raised by a connection that has since been replaced or removed
    /// are dropped.
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<(PlayerId, Vec<u8>)> {
        let (peer, serial) = event.source();
        if self.serial(peer) != Some(serial) {
            self.stats.stale_events += 1;
            debug!("Dropping event from stale session {} with {}", serial, peer);
            return None;
        }

        match event {
            SessionEvent::CandidateDiscovered {
                peer, candidate, ..
            } => {
                let live = self
                    .peers
                    .get(&peer)
                    .map_or(false, |record| record.state != ChannelState::Closed);
                if !live {
                    debug!("Dropping local candidate for inactive session with {}", peer);
                    return None;
                }
                let message = SignalMessage::Candidate { candidate };
                if let Err(e) = self.signaling.send(&peer, &message) {
                    warn!("Failed to signal candidate to {}: {}", peer, e);
                }
                None
            }
            SessionEvent::ChannelOpened { peer, .. } => {
                match self.peers.get_mut(&peer) {
                    Some(record) if record.state != ChannelState::Closed => {
                        record.state = ChannelState::Open;
                        info!(
                            "Channel {} to {} is open",
                            record.channel.label(),
                            peer
                        );
                    }
                    _ => debug!("Open event for inactive session with {}", peer),
                }
                None
            }
            SessionEvent::MessageReceived { peer, data, .. } => {
                match self.peers.get(&peer) {
                    Some(record) if record.state == ChannelState::Open => Some((peer, data)),
                    _ => {
                        debug!("Dropping message from {} on an inactive channel", peer);
                        None
                    }
                }
            }
            SessionEvent::ChannelClosed { peer, reason, .. } => {
                self.fail(&peer, &reason);
                None
            }
        }
    }

    fn fail(&mut self, peer: &PlayerId, reason: &str) {
        if let Some(record) = self.peers.get_mut(peer) {
            if record.state != ChannelState::Closed {
                warn!("Session with {} closed: {}", peer, reason);
                record.state = ChannelState::Closed;
                record.connection.close();
            }
        }
    }

    /// Writes `payload` to `peer` only if its channel is open; otherwise does nothing.
    pub fn send(&mut self, peer: &PlayerId, payload: &GameStatePayload) {
        let Some(record) = self.peers.get(peer) else {
            self.stats.dropped_unknown_peer += 1;
            debug!("Not sending to {}: no session", peer);
            return;
        };
        if record.state != ChannelState::Open {
            self.stats.dropped_not_open += 1;
            debug!("Not sending to {}: channel {:?}", peer, record.state);
            return;
        }

        let data = match payload.encode() {
            Ok(data) => data,
            Err(e) => {
                self.stats.send_errors += 1;
                warn!("Failed to encode payload for {}: {}", peer, e);
                return;
            }
        };
        match record.channel.send(data) {
            Ok(()) => self.stats.sent += 1,
            Err(e) => {
                self.stats.send_errors += 1;
                debug!("Send to {} failed: {}", peer, e);
            }
        }
    }

    /// Sends `payload` to every known peer.
    pub fn broadcast(&mut self, payload: &GameStatePayload) {
        let peers: Vec<PlayerId> = self
            .peers
            .keys()
            .filter(|peer| **peer != self.local_id)
            .cloned()
            .collect();
        for peer in peers {
            self.send(&peer, payload);
        }
    }

    pub fn close_session(&mut self, peer: &PlayerId) {
        if let Some(mut record) = self.peers.remove(peer) {
            record.connection.close();
            info!("Ended session with {}", peer);
        }
    }

    pub fn close_all(&mut self) {
        let peers: Vec<PlayerId> = self.peers.keys().cloned().collect();
        for peer in peers {
            self.close_session(&peer);
        }
    }

    pub fn channel_state(&self, peer: &PlayerId) -> Option<ChannelState> {
        self.peers.get(peer).map(|record| record.state)
    }

    /// Serial of the current session with `peer`.
    pub fn serial(&self, peer: &PlayerId) -> Option<u64> {
        self.peers.get(peer).map(|record| record.serial)
    }

    pub fn role(&self, peer: &PlayerId) -> Option<Role> {
        self.peers.get(peer).and_then(|record| record.role)
    }

    pub fn open_peers(&self) -> Vec<PlayerId> {
        let mut peers: Vec<PlayerId> = self
            .peers
            .values()
            .filter(|record| record.state == ChannelState::Open)
            .map(|record| record.peer.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn local_id(&self) -> &PlayerId {
        &self.local_id
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
