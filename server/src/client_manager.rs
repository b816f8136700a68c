//! Connection registry for the match server
//!
//! This module tracks the transport-level connections that may take part in
//! the match:
//! - Connection lifecycle (opened, handshake, closed)
//! - Readiness, which gates pairing
//! - Capacity enforcement, since a match seats exactly two players
//!
//! The registry is owned by the match controller rather than looked up
//! through global state, so pairing decisions always see a consistent view.

use log::info;
use shared::PlayerId;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Represents one open connection
#[derive(Debug)]
pub struct Client {
    /// Connection identifier assigned by the network layer
    pub id: PlayerId,
    /// Peer address, used for logging
    pub addr: SocketAddr,
    /// Set once the client completed the version handshake
    pub ready: bool,
}

impl Client {
    pub fn new(id: PlayerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            ready: false,
        }
    }
}

/// Manages all open connections in connection order
///
/// Iteration order is ascending connection id, which is also the order the
/// connections were opened in. Pairing relies on this to pick "player one"
/// and "player two" deterministically.
pub struct ClientManager {
    clients: BTreeMap<PlayerId, Client>,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            max_clients,
        }
    }

    /// Registers a new connection
    ///
    /// Returns false when the registry is at capacity or the id is already
    /// taken.
    pub fn add_client(&mut self, id: PlayerId, addr: SocketAddr) -> bool {
        if self.clients.len() >= self.max_clients || self.clients.contains_key(&id) {
            return false;
        }

        info!("Client {} connected from {}", id, addr);
        self.clients.insert(id, Client::new(id, addr));
        true
    }

    /// Marks a connection as ready after a successful handshake
    pub fn mark_ready(&mut self, id: PlayerId) -> bool {
        match self.clients.get_mut(&id) {
            Some(client) => {
                client.ready = true;
                true
            }
            None => false,
        }
    }

    /// Removes a connection. Returns false if it was already gone.
    pub fn remove_client(&mut self, id: &PlayerId) -> bool {
        if let Some(client) = self.clients.remove(id) {
            info!("Client {} disconnected ({})", client.id, client.addr);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.clients.contains_key(&id)
    }

    /// True when at least one connection is open and all of them are ready
    pub fn all_ready(&self) -> bool {
        !self.clients.is_empty() && self.clients.values().all(|c| c.ready)
    }

    /// Connection ids in connection order
    pub fn ids(&self) -> Vec<PlayerId> {
        self.clients.keys().copied().collect()
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

    #[test]
    fn test_client_creation() {
        let client = Client::new(1, test_addr());
        assert_eq!(client.id, 1);
        assert_eq!(client.addr, test_addr());
        assert!(!client.ready);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(2);

        assert!(manager.add_client(1, test_addr()));
        assert!(manager.add_client(2, test_addr2()));
        assert!(!manager.add_client(3, test_addr()));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_duplicate_id_refused() {
        let mut manager = ClientManager::new(2);
        assert!(manager.add_client(1, test_addr()));
        assert!(!manager.add_client(1, test_addr2()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_readiness() {
        let mut manager = ClientManager::new(2);
        assert!(!manager.all_ready());

        manager.add_client(1, test_addr());
        manager.add_client(2, test_addr2());
        assert!(!manager.all_ready());

        assert!(manager.mark_ready(1));
        assert!(!manager.all_ready());

        assert!(manager.mark_ready(2));
        assert!(manager.all_ready());

        assert!(!manager.mark_ready(99));
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        manager.add_client(1, test_addr());

        assert!(manager.remove_client(&1));
        assert!(manager.is_empty());
        assert!(!manager.remove_client(&1));
    }

    #[test]
    fn test_ids_ascending() {
        let mut manager = ClientManager::new(3);
        manager.add_client(7, test_addr());
        manager.add_client(3, test_addr2());
        manager.add_client(5, test_addr());

        assert_eq!(manager.ids(), vec![3, 5, 7]);
        assert!(manager.contains(5));
        assert!(!manager.contains(4));
    }
}
