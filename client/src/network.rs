use futures::{SinkExt, StreamExt};
use log::{debug, info};
use shared::{ChatCodec, Framing};
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite};

/// A connection to the relay that has already sent its handshake
///
/// With [`Framing::Raw`] the relay cannot tell where one message ends and the
/// next begins, so a message sent right after [`connect`](Self::connect) may
/// be merged into the name. Interactive use never hits this; scripted use
/// should prefer [`Framing::Lines`].
pub struct ChatClient {
    name: String,
    sender: ChatSender,
    receiver: ChatReceiver,
}

/// Outbound half of a [`ChatClient`]
pub struct ChatSender {
    writer: FramedWrite<OwnedWriteHalf, ChatCodec>,
}

/// Inbound half of a [`ChatClient`]
pub struct ChatReceiver {
    reader: FramedRead<OwnedReadHalf, ChatCodec>,
}

impl ChatClient {
    /// Connects to the relay and announces `name`
    pub async fn connect<A: ToSocketAddrs>(
        server_addr: A,
        name: &str,
        framing: Framing,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {} as {}", stream.peer_addr()?, name);

        let (reader, writer) = stream.into_split();
        let mut sender = ChatSender {
            writer: FramedWrite::new(writer, ChatCodec::new(framing)),
        };
        let receiver = ChatReceiver {
            reader: FramedRead::new(reader, ChatCodec::new(framing)),
        };

        sender.send(name).await?;

        Ok(ChatClient {
            name: name.to_string(),
            sender,
            receiver,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&mut self, text: &str) -> io::Result<()> {
        self.sender.send(text).await
    }

    /// Next relayed message, or `None` once the relay closed the stream
    pub async fn recv(&mut self) -> io::Result<Option<String>> {
        self.receiver.recv().await
    }

    /// Splits into halves that can be driven from separate tasks
    pub fn split(self) -> (ChatSender, ChatReceiver) {
        (self.sender, self.receiver)
    }

    /// Closes the write side; the relay treats this as leaving
    pub async fn close(self) -> io::Result<()> {
        self.sender.close().await
    }
}

impl ChatSender {
    pub async fn send(&mut self, text: &str) -> io::Result<()> {
        debug!("Sending: {}", text);
        self.writer.send(text.to_string()).await
    }

    pub async fn close(mut self) -> io::Result<()> {
        self.writer.get_mut().shutdown().await
    }
}

impl ChatReceiver {
    pub async fn recv(&mut self) -> io::Result<Option<String>> {
        self.reader.next().await.transpose()
    }
}
