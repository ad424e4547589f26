//! Fan-out of one message to every other registered peer

use crate::connection::{Connection, ConnectionId, Disconnected};
use crate::registry::SharedRegistry;
use futures::future::join_all;
use log::{debug, warn};
use shared::compose_message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// What the relay shows to a local display, if one is listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Joined {
        id: ConnectionId,
        name: String,
        addr: SocketAddr,
    },
    /// A relayed chat line, already composed as `"<name>: <text>"`
    Message { id: ConnectionId, line: String },
    Left { id: ConnectionId, name: String },
}

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<ConnectionId>,
    pub evicted: Vec<ConnectionId>,
}

/// Delivers messages to the registered peers and evicts the ones that fail
///
/// Cheap to clone; every session holds its own copy.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: SharedRegistry,
    events: broadcast::Sender<RelayEvent>,
    write_timeout: Option<Duration>,
}

impl Broadcaster {
    pub fn new(
        registry: SharedRegistry,
        write_timeout: Option<Duration>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            registry,
            events,
            write_timeout,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Subscribes a local display to relay events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: RelayEvent) {
        // No subscriber is the normal headless case
        let _ = self.events.send(event);
    }

    /// Relays `message` from `sender` to every other registered peer
    ///
    /// The line goes out as `"<name>: <message>"`, with `"Unknown"` standing
    /// in for a sender that never bound a name. Peers whose write fails are
    /// removed from the registry and closed. Nothing is returned as an error;
    /// a broken peer must not take the sender's session down with it.
    pub async fn broadcast(&self, message: &str, sender: &Connection) -> BroadcastReport {
        let line = compose_message(sender.display_name(), message);
        debug!("Relaying from connection {}: {}", sender.id(), line);

        self.publish(RelayEvent::Message {
            id: sender.id(),
            line: line.clone(),
        });

        self.deliver(&line, Some(sender.id())).await
    }

    /// Sends a pre-composed notice, such as a departure, to all peers except
    /// `exclude`
    pub async fn announce(&self, notice: &str, exclude: Option<ConnectionId>) -> BroadcastReport {
        debug!("Announcing: {}", notice);
        self.deliver(notice, exclude).await
    }

    async fn deliver(&self, line: &str, exclude: Option<ConnectionId>) -> BroadcastReport {
        let peers = {
            let registry = self.registry.read().await;
            registry.snapshot()
        };

        let write_timeout = self.write_timeout;
        let targets = peers.iter().filter(|peer| Some(peer.id()) != exclude);
        let results = join_all(targets.map(|peer| async move {
            let result = peer.send(line, write_timeout).await;
            (peer, result)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (peer, result) in results {
            match result {
                Ok(()) => report.delivered.push(peer.id()),
                Err(e) => {
                    match e {
                        Disconnected::Shutdown => {
                            debug!("Dropping closed connection {}", peer.id())
                        }
                        e => warn!(
                            "Evicting {} (connection {}) after failed write: {}",
                            peer.label(),
                            peer.id(),
                            e
                        ),
                    }
                    self.evict(peer).await;
                    report.evicted.push(peer.id());
                }
            }
        }

        report
    }

    async fn evict(&self, peer: &Arc<Connection>) {
        {
            let mut registry = self.registry.write().await;
            registry.remove(peer.id());
        }
        // Wakes the peer's own session so it runs its teardown
        peer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::pipe_connection;
    use crate::registry::Registry;
    use futures::StreamExt;
    use shared::{ChatCodec, Framing};
    use tokio::io::DuplexStream;
    use tokio_util::codec::FramedRead;
    use tokio_util::sync::CancellationToken;

    type PeerReader = FramedRead<DuplexStream, ChatCodec>;

    fn reader(pipe: DuplexStream) -> PeerReader {
        FramedRead::new(pipe, ChatCodec::new(Framing::Lines))
    }

    async fn next_line(reader: &mut PeerReader) -> String {
        tokio::time::timeout(Duration::from_secs(1), reader.next())
            .await
            .expect("timed out waiting for a line")
            .expect("stream ended")
            .expect("decode failed")
    }

    async fn assert_silent(reader: &mut PeerReader) {
        let result = tokio::time::timeout(Duration::from_millis(100), reader.next()).await;
        assert!(result.is_err(), "expected no message, got {:?}", result);
    }

    struct Room {
        broadcaster: Broadcaster,
        conns: Vec<Arc<Connection>>,
        readers: Vec<PeerReader>,
        _shutdown: CancellationToken,
    }

    async fn room(names: &[&str]) -> Room {
        let shutdown = CancellationToken::new();
        let registry = Registry::shared();
        let mut conns = Vec::new();
        let mut readers = Vec::new();

        for (i, name) in names.iter().enumerate() {
            let (conn, pipe) = pipe_connection(i as u64 + 1, Some(name), &shutdown);
            registry.write().await.add(Arc::clone(&conn));
            conns.push(conn);
            readers.push(reader(pipe));
        }

        Room {
            broadcaster: Broadcaster::new(registry, Some(Duration::from_secs(1)), 16),
            conns,
            readers,
            _shutdown: shutdown,
        }
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let mut room = room(&["Alice", "Bob", "Carol"]).await;

        let report = room.broadcaster.broadcast("hi", &room.conns[0]).await;

        assert_eq!(report.delivered, vec![2, 3]);
        assert!(report.evicted.is_empty());
        assert_eq!(next_line(&mut room.readers[1]).await, "Alice: hi");
        assert_eq!(next_line(&mut room.readers[2]).await, "Alice: hi");
        assert_silent(&mut room.readers[0]).await;
    }

    #[tokio::test]
    async fn test_unnamed_sender_is_unknown() {
        let mut room = room(&["Bob"]).await;
        let shutdown = CancellationToken::new();
        let (ghost, _pipe) = pipe_connection(99, None, &shutdown);

        room.broadcaster.broadcast("boo", &ghost).await;

        assert_eq!(next_line(&mut room.readers[0]).await, "Unknown: boo");
    }

    #[tokio::test]
    async fn test_failed_write_evicts_peer() {
        let mut room = room(&["Alice", "Bob", "Carol"]).await;
        // Bob's socket goes away behind the relay's back
        let bob_pipe = room.readers.remove(1).into_inner();
        drop(bob_pipe);

        let report = room.broadcaster.broadcast("hi", &room.conns[0]).await;

        assert_eq!(report.delivered, vec![3]);
        assert_eq!(report.evicted, vec![2]);
        assert!(room.conns[1].is_closed());

        let registry = room.broadcaster.registry().read().await;
        assert_eq!(registry.names(), vec!["Alice", "Carol"]);
        drop(registry);

        assert_eq!(next_line(&mut room.readers[1]).await, "Alice: hi");

        // Later broadcasts skip the evicted peer entirely
        let report = room.broadcaster.broadcast("again", &room.conns[0]).await;
        assert_eq!(report.delivered, vec![3]);
        assert!(report.evicted.is_empty());
    }

    #[tokio::test]
    async fn test_announce_reaches_everyone_but_excluded() {
        let mut room = room(&["Alice", "Bob"]).await;

        let report = room.broadcaster.announce("Carol has left the chat", None).await;
        assert_eq!(report.delivered, vec![1, 2]);
        assert_eq!(next_line(&mut room.readers[0]).await, "Carol has left the chat");
        assert_eq!(next_line(&mut room.readers[1]).await, "Carol has left the chat");

        let report = room.broadcaster.announce("notice", Some(1)).await;
        assert_eq!(report.delivered, vec![2]);
    }

    #[tokio::test]
    async fn test_local_display_sees_messages() {
        let room = room(&["Alice", "Bob"]).await;
        let mut display = room.broadcaster.subscribe();

        room.broadcaster.broadcast("hi", &room.conns[0]).await;

        assert_eq!(
            display.recv().await.unwrap(),
            RelayEvent::Message {
                id: 1,
                line: "Alice: hi".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_broadcast_with_no_peers() {
        let room = room(&["Alice"]).await;

        let report = room.broadcaster.broadcast("anyone?", &room.conns[0]).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_sender_order_preserved() {
        let mut room = room(&["Alice", "Bob"]).await;

        for i in 0..20 {
            room.broadcaster
                .broadcast(&format!("m{}", i), &room.conns[0])
                .await;
        }

        for i in 0..20 {
            assert_eq!(next_line(&mut room.readers[1]).await, format!("Alice: m{}", i));
        }
    }

    #[tokio::test]
    async fn test_concurrent_senders_do_not_interleave() {
        let mut room = room(&["Alice", "Bob", "Carol"]).await;
        let mut tasks = Vec::new();

        for sender in [Arc::clone(&room.conns[0]), Arc::clone(&room.conns[1])] {
            let broadcaster = room.broadcaster.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    broadcaster.broadcast(&i.to_string(), &sender).await;
                }
            }));
        }

        let mut last_seen = [None::<u32>, None::<u32>];
        for _ in 0..100 {
            let line = next_line(&mut room.readers[2]).await;
            let (name, n) = line.split_once(": ").expect("malformed line");
            let n: u32 = n.parse().expect("corrupted payload");
            let slot = match name {
                "Alice" => 0,
                "Bob" => 1,
                other => panic!("unexpected sender {}", other),
            };
            assert!(last_seen[slot].map_or(true, |prev| prev < n));
            last_seen[slot] = Some(n);
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(last_seen, [Some(49), Some(49)]);
    }
}
