//! Relay network layer handling UDP communications and message forwarding

use crate::client_manager::{ClientManager, Registration, Route};
use log::{debug, error, info, warn};
use shared::{Packet, PlayerId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { id: PlayerId },
}

/// A packet queued for the sender task
#[derive(Debug)]
pub struct Outbound {
    pub packet: Packet,
    pub addr: SocketAddr,
}

/// Signaling relay: peers register a name, then exchange negotiation
/// messages addressed by name.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    out_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
}

impl Server {
    pub async fn new(addr: &str, timeout: Duration, max_clients: usize) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, timeout))),
            timeout,
            server_tx,
            server_rx,
            out_tx,
            out_rx: Some(out_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Shared handle to the registry.
    pub fn clients(&self) -> Arc<RwLock<ClientManager>> {
        Arc::clone(&self.clients)
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 65536];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut out_rx) = self.out_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(Outbound { packet, addr }) = out_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that drops peers which stopped sending heartbeats
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let period = (self.timeout / 2).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let data = packet.encode()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(Outbound { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn reject(&self, reason: String, addr: SocketAddr) {
        debug!("Rejecting {}: {}", addr, reason);
        self.send_packet(Packet::Rejected { reason }, addr);
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Register {
                player_id,
                client_version,
            } => {
                info!(
                    "Peer {} registering from {} (version: {})",
                    player_id, addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.reject(
                        format!(
                            "Unsupported protocol version {} (relay speaks {})",
                            client_version, PROTOCOL_VERSION
                        ),
                        addr,
                    );
                    return;
                }
                if player_id.trim().is_empty() {
                    self.reject("Player name is empty".to_string(), addr);
                    return;
                }

                let registration = {
                    let mut clients = self.clients.write().await;
                    clients.register(&player_id, addr)
                };
                match registration {
                    Registration::Added | Registration::Replaced { .. } => {
                        self.send_packet(Packet::Registered { player_id }, addr);
                    }
                    Registration::Full => self.reject("Relay full".to_string(), addr),
                }
            }

            Packet::Heartbeat => {
                let known = {
                    let mut clients = self.clients.write().await;
                    clients.touch(addr)
                };
                if !known {
                    debug!("Heartbeat from unregistered {}", addr);
                }
            }

            Packet::Forward { from, to, payload } => {
                let route = {
                    let mut clients = self.clients.write().await;
                    clients.route(&from, addr, &to)
                };
                match route {
                    Route::Deliver(target) => {
                        debug!("Forwarding {} bytes {} -> {}", payload.len(), from, to);
                        self.send_packet(Packet::Forward { from, to, payload }, target);
                    }
                    Route::SenderNotRegistered => {
                        warn!("Dropping message from {}: not registered as {}", addr, from);
                        self.reject(format!("Not registered as {}", from), addr);
                    }
                    Route::UnknownPeer => {
                        debug!("Dropping message from {} to unknown peer {}", from, to);
                        self.reject(format!("Unknown peer {}", to), addr);
                    }
                }
            }

            Packet::Unregister => {
                let mut clients = self.clients.write().await;
                if let Some(id) = clients.find_client_by_addr(addr) {
                    clients.remove_client(&id);
                }
            }

            Packet::Registered { .. } | Packet::Rejected { .. } => {
                warn!("Unexpected packet type from peer at {}", addr);
            }
        }
    }

    /// Main relay loop
    pub async fn run(&mut self) -> Result<(), BoxError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Relay started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::ClientTimeout { id } => {
                    let remaining = self.clients.read().await.len();
                    info!("Dropped {} after timeout; {} peers remain", id, remaining);
                }
            }
        }

        info!("Relay shutting down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn start_relay(idle: Duration, max_clients: usize) -> (SocketAddr, Arc<RwLock<ClientManager>>) {
        let mut server = Server::new("127.0.0.1:0", idle, max_clients)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let clients = server.clients();
        tokio::spawn(async move { server.run().await });
        (addr, clients)
    }

    async fn peer() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    async fn send(socket: &UdpSocket, relay: SocketAddr, packet: Packet) {
        socket
            .send_to(&packet.encode().unwrap(), relay)
            .await
            .unwrap();
    }

    async fn recv(socket: &UdpSocket) -> Packet {
        let mut buffer = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .expect("no reply from relay")
            .unwrap();
        Packet::decode(&buffer[..len]).unwrap()
    }

    async fn register(socket: &UdpSocket, relay: SocketAddr, name: &str) {
        send(
            socket,
            relay,
            Packet::Register {
                player_id: name.to_string(),
                client_version: PROTOCOL_VERSION,
            },
        )
        .await;
        assert_eq!(
            recv(socket).await,
            Packet::Registered {
                player_id: name.to_string()
            }
        );
    }

    #[test]
    fn test_bind_failure_reported() {
        let result = tokio_test::block_on(Server::new("not-an-address", Duration::from_secs(1), 1));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_register_and_forward() {
        let (relay, _) = start_relay(Duration::from_secs(5), 8).await;
        let alice = peer().await;
        let bob = peer().await;
        register(&alice, relay, "alice").await;
        register(&bob, relay, "bob").await;

        let forward = Packet::Forward {
            from: "alice".to_string(),
            to: "bob".to_string(),
            payload: r#"{"type":"offer","sdp":"v=0"}"#.to_string(),
        };
        send(&alice, relay, forward.clone()).await;

        assert_eq!(recv(&bob).await, forward);
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let (relay, clients) = start_relay(Duration::from_secs(5), 8).await;
        let alice = peer().await;
        send(
            &alice,
            relay,
            Packet::Register {
                player_id: "alice".to_string(),
                client_version: PROTOCOL_VERSION + 1,
            },
        )
        .await;

        assert!(matches!(recv(&alice).await, Packet::Rejected { .. }));
        assert!(clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_relay_rejects() {
        let (relay, _) = start_relay(Duration::from_secs(5), 1).await;
        let alice = peer().await;
        let bob = peer().await;
        register(&alice, relay, "alice").await;

        send(
            &bob,
            relay,
            Packet::Register {
                player_id: "bob".to_string(),
                client_version: PROTOCOL_VERSION,
            },
        )
        .await;
        assert_eq!(
            recv(&bob).await,
            Packet::Rejected {
                reason: "Relay full".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_forward_to_unknown_peer_rejected() {
        let (relay, _) = start_relay(Duration::from_secs(5), 8).await;
        let alice = peer().await;
        register(&alice, relay, "alice").await;

        send(
            &alice,
            relay,
            Packet::Forward {
                from: "alice".to_string(),
                to: "zed".to_string(),
                payload: "{}".to_string(),
            },
        )
        .await;
        assert_eq!(
            recv(&alice).await,
            Packet::Rejected {
                reason: "Unknown peer zed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_spoofed_sender_not_forwarded() {
        let (relay, _) = start_relay(Duration::from_secs(5), 8).await;
        let alice = peer().await;
        let bob = peer().await;
        let eve = peer().await;
        register(&alice, relay, "alice").await;
        register(&bob, relay, "bob").await;

        send(
            &eve,
            relay,
            Packet::Forward {
                from: "alice".to_string(),
                to: "bob".to_string(),
                payload: "{}".to_string(),
            },
        )
        .await;

        assert!(matches!(recv(&eve).await, Packet::Rejected { .. }));
        let mut buffer = [0u8; 256];
        assert!(timeout(Duration::from_millis(100), bob.recv_from(&mut buffer))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unregister_removes_peer() {
        let (relay, clients) = start_relay(Duration::from_secs(5), 8).await;
        let alice = peer().await;
        register(&alice, relay, "alice").await;

        send(&alice, relay, Packet::Unregister).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (relay, clients) = start_relay(Duration::from_millis(200), 8).await;
        let alice = peer().await;
        let bob = peer().await;
        register(&alice, relay, "alice").await;
        register(&bob, relay, "bob").await;

        for _ in 0..12 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            send(&bob, relay, Packet::Heartbeat).await;
        }

        assert_eq!(clients.read().await.ids(), vec!["bob".to_string()]);
    }
}
