//! Runtime settings for the relay

use shared::{Framing, DEFAULT_HOST, DEFAULT_PORT, MAX_MESSAGE_LEN};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Settings for a [`RelayServer`](crate::network::RelayServer)
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listener binds to; port 0 picks a free port
    pub bind_addr: SocketAddr,
    pub framing: Framing,
    /// Upper bound on a single write to one peer. A peer that cannot take a
    /// message within this window is evicted. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
    pub max_message_len: usize,
    /// Buffer size of the local display event channel
    pub event_capacity: usize,
}

impl RelayConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        let host = DEFAULT_HOST
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        Self {
            bind_addr: SocketAddr::new(host, DEFAULT_PORT),
            framing: Framing::default(),
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            max_message_len: MAX_MESSAGE_LEN,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
