//! # Chat Relay Server Library
//!
//! A TCP relay for a single flat chat room. Every peer that connects names
//! itself with its first message; from then on each message it sends is
//! relayed to every other connected peer as `"<name>: <text>"`.
//!
//! ## Architecture Design
//!
//! ### Task per Connection
//! The listener runs one accept loop and spawns one task per accepted peer.
//! A slow or silent peer only ever blocks its own task. Tasks run on the
//! multi-threaded tokio runtime, so sessions make progress in parallel.
//!
//! ### One Shared Structure
//! The [`Registry`](registry::Registry) is the only state touched by more
//! than one task. Adds, removes and snapshots are serialized by a lock that
//! is never held across peer I/O: a broadcast copies the membership first,
//! then writes.
//!
//! ### Explicit Disconnects
//! End of stream, read errors, failed or timed out writes and shutdown all
//! surface as [`Disconnected`](connection::Disconnected). A session that sees
//! one moves to teardown; a broadcast that sees one evicts that peer. Neither
//! ever affects another session.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! A peer's identity, display name and per-connection write lock.
//!
//! ### Registry Module (`registry`)
//! The set of peers that completed their handshake, in join order.
//!
//! ### Broadcast Module (`broadcast`)
//! Fan-out with sender exclusion, eviction of failed peers and events for an
//! optional local display.
//!
//! ### Session Module (`session`)
//! The Handshake / Active / Teardown state machine run for each peer.
//!
//! ### Network Module (`network`)
//! Binding, the accept loop and shutdown.
//!
//! ## Known Limitation
//!
//! With [`Framing::Raw`](shared::Framing::Raw), the default, one read is one
//! message. Messages sent back to back can arrive merged. Use
//! [`Framing::Lines`](shared::Framing::Lines) when both ends support it.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::RelayConfig;
//! use server::network::RelayServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::bind(RelayConfig::new("127.0.0.1:65535".parse()?)).await?;
//!
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.shutdown();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod network;
pub mod registry;
pub mod session;
