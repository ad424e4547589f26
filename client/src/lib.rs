//! # Chat Client Library
//!
//! Connects to the relay, announces a display name and exchanges plain text
//! messages. Rendering is left to the caller; the bundled binary simply
//! prints to stdout.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ChatClient;
//! use shared::Framing;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut client = ChatClient::connect("127.0.0.1:65535", "Alice", Framing::Lines).await?;
//!     client.send("hi").await?;
//!
//!     while let Some(line) = client.recv().await? {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

pub mod network;
