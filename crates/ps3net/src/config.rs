//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};

use crate::{
    whitelist::Whitelist,
    wire::{DEFAULT_BUFFER_SIZE, DEFAULT_PORT},
};

/// Pending connections the listener queues by default.
const DEFAULT_BACKLOG: u32 = 1;

/// Configuration for the acceptor and the sessions it spawns.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub addr: SocketAddr,

    /// Listen backlog.
    pub backlog: u32,

    /// Size of the transfer buffer each session allocates.
    pub buffer_size: usize,

    /// Peers allowed to connect; everyone when unset.
    pub whitelist: Option<Whitelist>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            backlog: DEFAULT_BACKLOG,
            buffer_size: DEFAULT_BUFFER_SIZE,
            whitelist: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen address.
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set the listen port, keeping the address.
    pub fn port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Set the listen backlog.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Set the transfer buffer size (at least one byte).
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Restrict the peers allowed to connect.
    pub fn whitelist(mut self, whitelist: Option<Whitelist>) -> Self {
        self.whitelist = whitelist;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::new();
        assert_eq!(config.addr.port(), 38008);
        assert!(config.addr.ip().is_unspecified());
        assert_eq!(config.backlog, 1);
        assert_eq!(config.buffer_size, 4 * 1024 * 1024);
        assert!(config.whitelist.is_none());
    }

    #[test]
    fn builder() {
        let config = ServerConfig::new()
            .port(40000)
            .buffer_size(0)
            .backlog(16)
            .whitelist(Some("127.0.0.*".parse().unwrap()));
        assert_eq!(config.addr.port(), 40000);
        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.backlog, 16);
        assert!(config.whitelist.is_some());
    }
}
