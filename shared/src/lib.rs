//! Wire-level pieces shared by the relay server and the chat client: message
//! framing, the text codec and the composition rules for relayed lines.

use bytes::{BufMut, BytesMut};
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio_util::codec::{Decoder, Encoder};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 65535;

/// Largest payload a single read may yield in raw framing, and the default
/// line limit in line framing.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Label used when a sender has no bound display name.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// How logical messages are delimited on the byte stream
///
/// `Raw` is the historical behaviour: whatever one read returns is one
/// message, and nothing marks the end of an outbound message. Boundaries only
/// hold for small messages sent one at a time; two sends that the transport
/// coalesces arrive as one message. `Lines` delimits every message with `\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Raw,
    Lines,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "lines" => Ok(Framing::Lines),
            other => Err(format!(
                "unknown framing '{}', expected 'raw' or 'lines'",
                other
            )),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Raw => write!(f, "raw"),
            Framing::Lines => write!(f, "lines"),
        }
    }
}

/// Formats a relayed chat line as `"<name>: <text>"`
pub fn compose_message(display_name: Option<&str>, text: &str) -> String {
    format!("{}: {}", display_name.unwrap_or(UNKNOWN_SENDER), text)
}

/// Notice relayed to the remaining peers when someone leaves
pub fn departure_notice(display_name: &str) -> String {
    format!("{} has left the chat", display_name)
}

/// Text codec for both framings
///
/// Decoding never fails on bad UTF-8; invalid sequences are replaced with
/// U+FFFD. The only decode error is a line that outgrows `max_length`.
#[derive(Debug, Clone)]
pub struct ChatCodec {
    framing: Framing,
    max_length: usize,
    // Where the newline scan resumes, so partial lines are not rescanned
    next_index: usize,
}

impl ChatCodec {
    pub fn new(framing: Framing) -> Self {
        Self::with_max_length(framing, MAX_MESSAGE_LEN)
    }

    pub fn with_max_length(framing: Framing, max_length: usize) -> Self {
        Self {
            framing,
            max_length: max_length.max(1),
            next_index: 0,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn decode_raw(&mut self, src: &mut BytesMut) -> Option<String> {
        if src.is_empty() {
            return None;
        }
        let chunk = src.split_to(src.len().min(self.max_length));
        Some(String::from_utf8_lossy(&chunk).into_owned())
    }

    fn decode_line(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        let start = self.next_index.min(src.len());
        match src[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = start + offset;
                self.next_index = 0;
                let line = src.split_to(newline + 1);
                let line = without_line_ending(&line[..newline]);
                if line.len() > self.max_length {
                    return Err(line_too_long(self.max_length));
                }
                Ok(Some(String::from_utf8_lossy(line).into_owned()))
            }
            None if src.len() > self.max_length => Err(line_too_long(self.max_length)),
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }
}

fn without_line_ending(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn line_too_long(max_length: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line exceeds {} bytes", max_length),
    )
}

impl Decoder for ChatCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        match self.framing {
            Framing::Raw => Ok(self.decode_raw(src)),
            Framing::Lines => self.decode_line(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            // An unterminated trailing line still counts as a message
            None if !src.is_empty() => {
                self.next_index = 0;
                let rest = src.split();
                Ok(Some(
                    String::from_utf8_lossy(without_line_ending(&rest)).into_owned(),
                ))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<String> for ChatCodec {
    type Error = io::Error;

    fn encode(&mut self, message: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        match self.framing {
            Framing::Raw => {
                dst.reserve(message.len());
                dst.put(message.as_bytes());
            }
            Framing::Lines => {
                dst.reserve(message.len() + 1);
                dst.put(message.as_bytes());
                dst.put_u8(b'\n');
            }
        }
        Ok(())
    }
}
