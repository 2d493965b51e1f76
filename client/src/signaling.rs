//! Out-of-band delivery of offer/answer/candidate messages between named peers.

use crate::error::SignalingError;
use log::{debug, error, info, warn};
use shared::{Packet, PlayerId, SignalMessage, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

/// A negotiation message and the peer that sent it.
pub type InboundSignal = (PlayerId, SignalMessage);

pub trait SignalingTransport {
    fn send(&self, to: &PlayerId, message: &SignalMessage) -> Result<(), SignalingError>;
}

const REGISTER_TIMEOUT: Duration = Duration::from_secs(3);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Signaling through the UDP relay in the `server` crate.
pub struct RelaySignaling {
    local_id: PlayerId,
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl RelaySignaling {
    /// Registers `local_id` with the relay and starts forwarding inbound
    /// messages to `inbound`.
    pub async fn connect(
        local_id: &PlayerId,
        relay_addr: &str,
        inbound: mpsc::UnboundedSender<InboundSignal>,
    ) -> Result<Self, SignalingError> {
        let relay = lookup_host(relay_addr).await?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("relay address {} did not resolve", relay_addr),
            )
        })?;
        let bind = if relay.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = Arc::new(UdpSocket::bind(bind).await?);

        info!("Registering {} with relay {}", local_id, relay);
        let register = Packet::Register {
            player_id: local_id.clone(),
            client_version: PROTOCOL_VERSION,
        };
        socket.send_to(&register.encode()?, relay).await?;

        let mut buffer = [0u8; 4096];
        let reply = timeout(REGISTER_TIMEOUT, async {
            loop {
                let (len, addr) = socket.recv_from(&mut buffer).await?;
                if addr != relay {
                    continue;
                }
                match Packet::decode(&buffer[..len]) {
                    Ok(packet) => return Ok::<Packet, SignalingError>(packet),
                    Err(e) => warn!("Ignoring undecodable relay datagram: {}", e),
                }
            }
        })
        .await
        .map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "relay did not answer")
        })??;

        match reply {
            Packet::Registered { player_id } => info!("Registered with relay as {}", player_id),
            Packet::Rejected { reason } => return Err(SignalingError::Rejected(reason)),
            other => {
                return Err(SignalingError::Rejected(format!(
                    "unexpected reply {:?}",
                    other
                )))
            }
        }

        let mut signaling = Self {
            local_id: local_id.clone(),
            socket,
            relay,
            tasks: Vec::new(),
        };
        signaling.spawn_receiver(inbound);
        signaling.spawn_heartbeat();
        Ok(signaling)
    }

    fn spawn_receiver(&mut self, inbound: mpsc::UnboundedSender<InboundSignal>) {
        let socket = Arc::clone(&self.socket);
        let relay = self.relay;
        let local_id = self.local_id.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                let (len, addr) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Error receiving from relay: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };
                if addr != relay {
                    debug!("Ignoring datagram from non-relay address {}", addr);
                    continue;
                }

                match Packet::decode(&buffer[..len]) {
                    Ok(Packet::Forward { from, to, payload }) => {
                        if to != local_id {
                            warn!("Relay delivered a message for {} to {}", to, local_id);
                            continue;
                        }
                        match SignalMessage::decode(&payload) {
                            Ok(message) => {
                                if inbound.send((from, message)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Discarding malformed signal from {}: {}", from, e),
                        }
                    }
                    Ok(Packet::Rejected { reason }) => warn!("Relay rejected a packet: {}", reason),
                    Ok(packet) => debug!("Ignoring relay packet {:?}", packet),
                    Err(e) => warn!("Failed to deserialize relay datagram: {}", e),
                }
            }
        }));
    }

    fn spawn_heartbeat(&mut self) {
        let socket = Arc::clone(&self.socket);
        let relay = self.relay;

        self.tasks.push(tokio::spawn(async move {
            let Ok(heartbeat) = Packet::Heartbeat.encode() else {
                return;
            };
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&heartbeat, relay).await {
                    warn!("Relay heartbeat failed: {}", e);
                }
            }
        }));
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.relay
    }
}

impl SignalingTransport for RelaySignaling {
    fn send(&self, to: &PlayerId, message: &SignalMessage) -> Result<(), SignalingError> {
        let packet = Packet::Forward {
            from: self.local_id.clone(),
            to: to.clone(),
            payload: message.encode()?,
        };
        self.socket.try_send_to(&packet.encode()?, self.relay)?;
        debug!("Sent {} to {} via relay", message.kind(), to);
        Ok(())
    }
}

impl Drop for RelaySignaling {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Ok(data) = Packet::Unregister.encode() {
            let _ = self.socket.try_send_to(&data, self.relay);
        }
    }
}

type Endpoints = HashMap<PlayerId, mpsc::UnboundedSender<InboundSignal>>;

/// In-process signaling between peers living in the same program.
#[derive(Clone, Default)]
pub struct LocalSignalingHub {
    endpoints: Arc<Mutex<Endpoints>>,
}

impl LocalSignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        id: &PlayerId,
    ) -> Result<(LocalSignaling, mpsc::UnboundedReceiver<InboundSignal>), SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints
            .lock()
            .map_err(|_| SignalingError::Closed)?
            .insert(id.clone(), tx);
        let endpoint = LocalSignaling {
            local_id: id.clone(),
            hub: self.clone(),
        };
        Ok((endpoint, rx))
    }
}

pub struct LocalSignaling {
    local_id: PlayerId,
    hub: LocalSignalingHub,
}

impl SignalingTransport for LocalSignaling {
    fn send(&self, to: &PlayerId, message: &SignalMessage) -> Result<(), SignalingError> {
        // Go through the wire encoding so both paths see the same bytes.
        let message = SignalMessage::decode(&message.encode()?)?;
        let endpoints = self.hub.endpoints.lock().map_err(|_| SignalingError::Closed)?;
        let endpoint = endpoints
            .get(to)
            .ok_or_else(|| SignalingError::UnknownPeer(to.clone()))?;
        endpoint
            .send((self.local_id.clone(), message))
            .map_err(|_| SignalingError::Closed)
    }
}
