//! Per-connection worker
//!
//! Every accepted stream gets one [`Session`]. It reads the handshake,
//! registers the peer, relays everything the peer sends, and tears the
//! connection down when the stream ends for any reason:
//!
//! ```text
//! Handshake --name--> Active --message--> Active
//!     |                  |
//!     +----closed/error--+--> Teardown
//! ```

use crate::broadcast::{Broadcaster, RelayEvent};
use crate::connection::{Connection, Disconnected};
use futures::StreamExt;
use log::{debug, info, warn};
use shared::{departure_notice, ChatCodec};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first message, which names the peer
    Handshake,
    /// Relaying messages
    Active,
    /// Terminal
    Teardown,
}

pub struct Session<R> {
    conn: Arc<Connection>,
    reader: FramedRead<R, ChatCodec>,
    broadcaster: Broadcaster,
    state: SessionState,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(conn: Arc<Connection>, reader: R, codec: ChatCodec, broadcaster: Broadcaster) -> Self {
        Self {
            conn,
            reader: FramedRead::new(reader, codec),
            broadcaster,
            state: SessionState::Handshake,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Drives the session to completion and returns why it ended
    ///
    /// Any read failure only ends this session. Teardown always runs before
    /// returning.
    pub async fn run(mut self) -> Disconnected {
        let reason = loop {
            if let Err(reason) = self.step().await {
                break reason;
            }
        };

        match &reason {
            Disconnected::Closed | Disconnected::Shutdown => debug!(
                "Connection {} ({}) ended: {}",
                self.conn.id(),
                self.conn.label(),
                reason
            ),
            _ => warn!(
                "Connection {} ({}) dropped: {}",
                self.conn.id(),
                self.conn.label(),
                reason
            ),
        }

        self.state = SessionState::Teardown;
        teardown(&self.conn, &self.broadcaster).await;
        reason
    }

    async fn step(&mut self) -> Result<(), Disconnected> {
        let message = self.next_message().await?;

        match self.state {
            SessionState::Handshake => {
                self.register(message).await;
                self.state = SessionState::Active;
            }
            SessionState::Active => {
                self.broadcaster.broadcast(&message, &self.conn).await;
            }
            SessionState::Teardown => return Err(Disconnected::Shutdown),
        }

        Ok(())
    }

    /// Reads one logical message; end of stream, read errors and the
    /// connection being closed all come back as [`Disconnected`]
    async fn next_message(&mut self) -> Result<String, Disconnected> {
        tokio::select! {
            _ = self.conn.closed() => Err(Disconnected::Shutdown),
            frame = self.reader.next() => match frame {
                Some(Ok(message)) => Ok(message),
                Some(Err(e)) => Err(Disconnected::Io(e)),
                None => Err(Disconnected::Closed),
            },
        }
    }

    async fn register(&mut self, name: String) {
        // The handshake is taken as-is: empty, duplicate or odd names included
        self.conn.bind_name(name);

        let added = {
            let mut registry = self.broadcaster.registry().write().await;
            registry.add(Arc::clone(&self.conn))
        };

        if added {
            self.broadcaster.publish(RelayEvent::Joined {
                id: self.conn.id(),
                name: self.conn.label().to_string(),
                addr: self.conn.addr(),
            });
        }
    }
}

/// Removes `conn` from the registry, closes it and tells the remaining peers
///
/// Only the first call per connection does anything; it returns true, every
/// later call returns false. Peers that never finished the handshake leave
/// without a notice.
pub async fn teardown(conn: &Arc<Connection>, broadcaster: &Broadcaster) -> bool {
    if !conn.mark_torn_down() {
        return false;
    }

    {
        let mut registry = broadcaster.registry().write().await;
        registry.remove(conn.id());
    }
    conn.close().await;

    if let Some(name) = conn.display_name() {
        info!("{} left (connection {})", name, conn.id());
        broadcaster
            .announce(&departure_notice(name), Some(conn.id()))
            .await;
        broadcaster.publish(RelayEvent::Left {
            id: conn.id(),
            name: name.to_string(),
        });
    }

    true
}
