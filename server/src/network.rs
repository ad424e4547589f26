//! Listener and relay lifecycle: binds the socket, accepts peers, spawns one
//! session per peer and coordinates shutdown

use crate::broadcast::{Broadcaster, RelayEvent};
use crate::config::RelayConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::RelayError;
use crate::registry::{Registry, SharedRegistry};
use crate::session::Session;
use log::{debug, error, info};
use shared::ChatCodec;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Pause before retrying after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Stops a running relay from any task
///
/// Closes the listener and every live connection. Calling it more than once
/// is harmless.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Relay shutting down");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// The broadcast relay
///
/// [`bind`](Self::bind) claims the address; nothing is accepted until
/// [`run`](Self::run) is awaited.
pub struct RelayServer {
    listener: TcpListener,
    config: RelayConfig,
    registry: SharedRegistry,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    next_id: ConnectionId,
}

impl RelayServer {
    /// Binds the listening socket
    ///
    /// Failing to bind is the one fatal error of the relay and is returned
    /// before anything claims to be listening.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        info!(
            "Relay listening on {} ({} framing)",
            listener.local_addr()?,
            config.framing
        );

        let registry = Registry::shared();
        let broadcaster = Broadcaster::new(
            Arc::clone(&registry),
            config.write_timeout,
            config.event_capacity,
        );

        Ok(Self {
            listener,
            config,
            registry,
            broadcaster,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            next_id: 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Subscribes a local display to joins, messages and departures
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.broadcaster.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Accepts peers until shut down
    ///
    /// Each peer runs in its own task, so no single connection can hold up
    /// the accept loop. Failed accepts are logged and retried. After shutdown
    /// this waits for every session to finish its teardown, then returns.
    pub async fn run(mut self) -> Result<(), RelayError> {
        info!("Relay started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_session(stream, addr),
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
            }
        }

        drop(self.listener);
        self.sessions.close();
        debug!("Waiting for {} session(s) to finish", self.sessions.len());
        self.sessions.wait().await;

        info!("Relay stopped");
        Ok(())
    }

    fn spawn_session(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }
        debug!("Accepted connection {} from {}", id, addr);

        let (reader, writer) = stream.into_split();
        let codec = ChatCodec::with_max_length(self.config.framing, self.config.max_message_len);
        let conn = Arc::new(Connection::new(
            id,
            addr,
            writer,
            codec.clone(),
            &self.shutdown,
        ));
        let session = Session::new(conn, reader, codec, self.broadcaster.clone());

        self.sessions.spawn(session.run());
    }
}
