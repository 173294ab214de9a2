use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use super::connection::SharedConn;
use crate::threadpool::Op;
use crate::timer::TimerId;

/// Payload of an idle timer.
#[derive(Debug, Clone, Copy)]
pub struct ClientData {
    pub fd: RawFd,
    pub address: SocketAddr,
}

/// A live client as the dispatcher tracks it.
pub struct Client {
    pub conn: Arc<SharedConn>,
    pub timer: TimerId,
    pub address: SocketAddr,
    /// Operation a worker currently holds for this client.
    pub in_flight: Option<Op>,
    /// Readiness observed while in flight, replayed on completion.
    pub deferred: Option<Op>,
}

/// Dispatcher-side table of clients keyed by socket descriptor.
///
/// Only the dispatcher thread touches it, so it needs no locking.
pub struct ConnectionManager {
    clients: HashMap<RawFd, Client>,
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_connections,
        }
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_connections
    }

    /// Tracks a new client. Returns `false` when the table is full.
    pub fn add_connection(&mut self, fd: RawFd, client: Client) -> bool {
        if self.is_full() {
            return false;
        }
        self.clients.insert(fd, client);
        true
    }

    pub fn get(&self, fd: RawFd) -> Option<&Client> {
        self.clients.get(&fd)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Client> {
        self.clients.get_mut(&fd)
    }

    pub fn remove_connection(&mut self, fd: RawFd) -> Option<Client> {
        self.clients.remove(&fd)
    }

    /// Descriptors with a task in flight.
    pub fn in_flight_fds(&self) -> Vec<RawFd> {
        self.clients
            .iter()
            .filter(|(_, client)| client.in_flight.is_some())
            .map(|(&fd, _)| fd)
            .collect()
    }

    pub fn has_in_flight(&self) -> bool {
        self.clients.values().any(|client| client.in_flight.is_some())
    }

    pub fn drain(&mut self) -> Vec<(RawFd, Client)> {
        self.clients.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::connection::{ConnContext, HttpConn};
    use crate::server::epoll::Epoll;
    use crate::timer::TimerList;
    use std::time::Instant;

    #[test]
    fn test_add_connection_refuses_beyond_limit() {
        let ctx = Arc::new(ConnContext::new(Epoll::new().unwrap()));
        let address: SocketAddr = "127.0.0.1:9006".parse().unwrap();
        let mut timers = TimerList::new();
        let mut client = |fd: RawFd| Client {
            conn: Arc::new(SharedConn::new(HttpConn::new(Arc::clone(&ctx)))),
            timer: timers.add(Instant::now(), ClientData { fd, address }),
            address,
            in_flight: None,
            deferred: None,
        };

        let mut manager = ConnectionManager::new(1);
        assert!(!manager.is_full());
        assert!(manager.add_connection(10, client(10)));
        assert!(manager.is_full());
        assert!(!manager.add_connection(11, client(11)));
        assert!(manager.get(11).is_none());

        assert!(manager.remove_connection(10).is_some());
        assert!(manager.add_connection(11, client(11)));
    }
}
