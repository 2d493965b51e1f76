//! Registry of peers known to the signaling relay
//!
//! Each registered peer is a name bound to the UDP address it registered
//! from. The registry handles:
//! - Registration, including a peer re-registering from a new address
//! - Capacity limits
//! - Routing decisions for forwarded signaling messages
//! - Timeout detection for peers that stopped sending heartbeats

use log::{debug, info, warn};
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A registered peer and where to reach it
#[derive(Debug)]
pub struct Client {
    pub id: PlayerId,
    /// Address signaling messages for this peer are delivered to
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
    /// Messages relayed on behalf of this peer
    pub forwarded: u64,
}

impl Client {
    pub fn new(id: PlayerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            forwarded: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing has been heard from this peer within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Result of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Added,
    /// The name was already taken; the old binding was replaced.
    Replaced { previous: SocketAddr },
    Full,
}

/// Where a forwarded message should go, if anywhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Deliver(SocketAddr),
    /// The datagram did not come from the address registered for `from`.
    SenderNotRegistered,
    UnknownPeer,
}

pub struct ClientManager {
    /// Registered peers indexed by name
    clients: HashMap<PlayerId, Client>,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
            timeout,
        }
    }

    /// Binds `id` to `addr`.
    ///
    /// A name that is already registered is rebound to the new address, so a
    /// restarted peer takes over its old name. Any other name registered from
    /// the same address is dropped first, because one socket speaks for one peer.
    pub fn register(&mut self, id: &PlayerId, addr: SocketAddr) -> Registration {
        if let Some(stale) = self.find_client_by_addr(addr).filter(|other| other != id) {
            info!("{} re-registered from {} as {}", stale, addr, id);
            self.remove_client(&stale);
        }

        if let Some(client) = self.clients.get_mut(id) {
            let previous = client.addr;
            client.addr = addr;
            client.touch();
            if previous != addr {
                info!("Peer {} moved from {} to {}", id, previous, addr);
            }
            return Registration::Replaced { previous };
        }

        // Enforce relay capacity limits
        if self.clients.len() >= self.max_clients {
            warn!("Rejecting {} from {}: relay full", id, addr);
            return Registration::Full;
        }

        info!("Peer {} registered from {}", id, addr);
        self.clients.insert(id.clone(), Client::new(id.clone(), addr));
        Registration::Added
    }

    pub fn remove_client(&mut self, id: &PlayerId) -> bool {
        if let Some(client) = self.clients.remove(id) {
            info!(
                "Peer {} left after {} relayed messages",
                client.id, client.forwarded
            );
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id.clone())
    }

    /// Marks the peer at `addr` as alive. Returns false for unknown addresses.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.clients.values_mut().find(|client| client.addr == addr) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    pub fn addr_of(&self, id: &PlayerId) -> Option<SocketAddr> {
        self.clients.get(id).map(|client| client.addr)
    }

    /// Decides where a message from `from`, received from `addr`, addressed to `to` goes.
    pub fn route(&mut self, from: &PlayerId, addr: SocketAddr, to: &PlayerId) -> Route {
        match self.clients.get_mut(from) {
            Some(sender) if sender.addr == addr => {
                sender.touch();
                sender.forwarded += 1;
            }
            _ => return Route::SenderNotRegistered,
        }

        match self.clients.get(to) {
            Some(target) => {
                debug!("Routing {} -> {} ({})", from, to, target.addr);
                Route::Deliver(target.addr)
            }
            None => Route::UnknownPeer,
        }
    }

    /// Removes peers silent for longer than the timeout and returns their names.
    pub fn check_timeouts(&mut self) -> Vec<PlayerId> {
        let timed_out: Vec<PlayerId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(self.timeout))
            .map(|client| client.id.clone())
            .collect();

        for id in &timed_out {
            warn!("Peer {} timed out", id);
            self.remove_client(id);
        }

        timed_out
    }

    /// Registered names, sorted.
    pub fn ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn id(name: &str) -> PlayerId {
        name.to_string()
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(id("alice"), test_addr());
        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5, Duration::from_secs(5));
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_register() {
        let mut manager = ClientManager::new(2, Duration::from_secs(5));
        assert_eq!(manager.register(&id("alice"), test_addr()), Registration::Added);
        assert_eq!(manager.addr_of(&id("alice")), Some(test_addr()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_register_same_name_replaces_address() {
        let mut manager = ClientManager::new(1, Duration::from_secs(5));
        manager.register(&id("alice"), test_addr());

        // Capacity is not consumed by a re-registration.
        assert_eq!(
            manager.register(&id("alice"), test_addr2()),
            Registration::Replaced {
                previous: test_addr()
            }
        );
        assert_eq!(manager.addr_of(&id("alice")), Some(test_addr2()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_register_new_name_from_same_address() {
        let mut manager = ClientManager::new(2, Duration::from_secs(5));
        manager.register(&id("alice"), test_addr());
        manager.register(&id("carol"), test_addr());

        assert_eq!(manager.ids(), vec![id("carol")]);
        assert_eq!(manager.find_client_by_addr(test_addr()), Some(id("carol")));
    }

    #[test]
    fn test_register_max_capacity() {
        let mut manager = ClientManager::new(1, Duration::from_secs(5));
        manager.register(&id("alice"), test_addr());
        assert_eq!(manager.register(&id("bob"), test_addr2()), Registration::Full);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2, Duration::from_secs(5));
        manager.register(&id("alice"), test_addr());

        assert!(manager.remove_client(&id("alice")));
        assert!(!manager.remove_client(&id("alice")));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_route() {
        let mut manager = ClientManager::new(3, Duration::from_secs(5));
        manager.register(&id("alice"), test_addr());
        manager.register(&id("bob"), test_addr2());

        assert_eq!(
            manager.route(&id("alice"), test_addr(), &id("bob")),
            Route::Deliver(test_addr2())
        );
        assert_eq!(
            manager.route(&id("alice"), test_addr(), &id("dave")),
            Route::UnknownPeer
        );
    }

    #[test]
    fn test_route_rejects_spoofed_sender() {
        let mut manager = ClientManager::new(3, Duration::from_secs(5));
        manager.register(&id("alice"), test_addr());
        manager.register(&id("bob"), test_addr2());

        assert_eq!(
            manager.route(&id("alice"), test_addr2(), &id("bob")),
            Route::SenderNotRegistered
        );
        assert_eq!(
            manager.route(&id("eve"), test_addr(), &id("bob")),
            Route::SenderNotRegistered
        );
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = ClientManager::new(3, Duration::from_secs(1));
        manager.register(&id("alice"), test_addr());
        manager.register(&id("bob"), test_addr2());

        if let Some(client) = manager.clients.get_mut(&id("alice")) {
            client.last_seen = Instant::now() - Duration::from_secs(2);
        }

        assert_eq!(manager.check_timeouts(), vec![id("alice")]);
        assert_eq!(manager.ids(), vec![id("bob")]);
    }

    #[test]
    fn test_touch() {
        let mut manager = ClientManager::new(3, Duration::from_secs(1));
        manager.register(&id("alice"), test_addr());
        if let Some(client) = manager.clients.get_mut(&id("alice")) {
            client.last_seen = Instant::now() - Duration::from_secs(2);
        }

        assert!(manager.touch(test_addr()));
        assert!(!manager.touch(test_addr2()));
        assert!(manager.check_timeouts().is_empty());
    }
}
