//! One connected peer as seen by the relay
//!
//! A [`Connection`] owns the write side of a peer's stream. The read side
//! stays with the session task that accepted it; the registry and the
//! broadcaster only ever hold `Arc<Connection>` handles for writing.

use futures::SinkExt;
use log::debug;
use shared::{ChatCodec, UNKNOWN_SENDER};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

/// Identity of a connection, allocated in accept order
pub type ConnectionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Why a peer can no longer be read from or written to
#[derive(Debug, Error)]
pub enum Disconnected {
    #[error("peer closed the stream")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("write timed out after {0:?}")]
    TimedOut(Duration),

    #[error("connection shut down")]
    Shutdown,
}

/// A live peer: identity, display name and a serialized writer
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    display_name: OnceLock<String>,
    /// Held for the whole of one message so concurrent broadcasts from
    /// different senders never interleave partial frames
    writer: Mutex<FramedWrite<BoxedWriter, ChatCodec>>,
    closed: CancellationToken,
    torn_down: AtomicBool,
}

impl Connection {
    /// Wraps the write half of a freshly accepted stream
    ///
    /// The connection closes on its own [`close`](Self::close) or when
    /// `shutdown` is cancelled, whichever comes first.
    pub fn new<W>(
        id: ConnectionId,
        addr: SocketAddr,
        writer: W,
        codec: ChatCodec,
        shutdown: &CancellationToken,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            addr,
            display_name: OnceLock::new(),
            writer: Mutex::new(FramedWrite::new(Box::new(writer), codec)),
            closed: shutdown.child_token(),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds the handshake name. Only the first call has any effect.
    pub fn bind_name(&self, name: String) -> bool {
        self.display_name.set(name).is_ok()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.get().map(String::as_str)
    }

    /// Display name, or `"Unknown"` before the handshake
    pub fn label(&self) -> &str {
        self.display_name().unwrap_or(UNKNOWN_SENDER)
    }

    /// Writes one message to the peer
    ///
    /// Never retries. Any failure, including running past `write_timeout`
    /// or the connection being closed mid-write, is a [`Disconnected`].
    pub async fn send(
        &self,
        message: &str,
        write_timeout: Option<Duration>,
    ) -> Result<(), Disconnected> {
        if self.closed.is_cancelled() {
            return Err(Disconnected::Shutdown);
        }

        let mut writer = self.writer.lock().await;
        let write = writer.send(message.to_string());

        tokio::select! {
            _ = self.closed.cancelled() => Err(Disconnected::Shutdown),
            result = bounded(write, write_timeout) => result,
        }
    }

    /// Completes once the connection has been closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Closes the stream: wakes the session's pending read and shuts the
    /// write side down. Safe to call any number of times.
    pub async fn close(&self) {
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            debug!("Shutdown of connection {} ({}): {}", self.id, self.addr, e);
        }
    }

    /// Claims the one-time teardown. Returns true for the first caller only.
    pub fn mark_torn_down(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("display_name", &self.display_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn bounded<F>(write: F, limit: Option<Duration>) -> Result<(), Disconnected>
where
    F: Future<Output = io::Result<()>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, write).await {
            Ok(result) => result.map_err(Disconnected::from),
            Err(_) => Err(Disconnected::TimedOut(limit)),
        },
        None => write.await.map_err(Disconnected::from),
    }
}
