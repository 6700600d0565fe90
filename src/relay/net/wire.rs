use super::ConnectionId;

/// Line payload that makes a reader close its own connection.
pub const QUIT: &str = "quit";

/// Sent to every connection before an announcing relay shuts down.
pub const SERVER_EXITED: &str = "Server exited.";

/// A line of text received from a connection, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: ConnectionId,
    text: String,
}

impl Message {
    pub fn new(origin: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            origin,
            text: text.into(),
        }
    }

    /// Decodes one line as yielded by [`lines`]. A trailing `\n` and a
    /// `\r` directly before it are stripped; invalid UTF-8 is replaced.
    pub fn decode(origin: ConnectionId, line: &[u8]) -> Self {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Self::new(origin, String::from_utf8_lossy(line))
    }

    pub fn origin(&self) -> ConnectionId {
        self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_quit(&self) -> bool {
        self.text == QUIT
    }

    /// The bytes written to recipients: the text and a single `\n`.
    pub fn encode(&self) -> Vec<u8> {
        line(&self.text)
    }

    /// Like [`Message::encode`], prefixed with the sender's id.
    pub fn encode_announced(&self) -> Vec<u8> {
        line(&format!("Client {} says: {}", self.origin, self.text))
    }
}

/// Splits the bytes of a single read into lines, terminators included. A
/// fragment left after the last `\n` is yielded as a line of its own; it is
/// never joined with the bytes of the next read.
pub fn lines(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split_inclusive(|&b| b == b'\n')
}

pub fn joined_notice(id: ConnectionId) -> Vec<u8> {
    line(&format!("Client {} joined.", id))
}

pub fn exited_notice(id: ConnectionId) -> Vec<u8> {
    line(&format!("Client {} exited.", id))
}

pub fn line(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 1);
    buf.extend_from_slice(text.as_bytes());
    buf.push(b'\n');
    buf
}
