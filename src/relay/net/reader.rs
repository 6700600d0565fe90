use std::io;

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tracing::{debug, debug_span, trace, Instrument};

use super::{
    wire::{lines, Message},
    ConnectionId,
};

/// What readers tell the coordinator.
#[derive(Debug, PartialEq, Eq)]
pub enum ReaderEvent {
    Message(Message),
    /// The reader has exited and released its half of the connection. Sent
    /// exactly once per reader, always last.
    Closed(ConnectionId),
}

#[derive(Debug)]
enum Termination {
    Eof,
    Quit,
    Failed(io::Error),
}

/// Reads lines from one connection and forwards them to the coordinator
/// until the peer disconnects, sends `quit`, or the socket errors. The read
/// half is dropped before the closing event is published.
pub async fn read_messages<R>(
    id: ConnectionId,
    mut stream: R,
    buffer_size: usize,
    events_tx: mpsc::Sender<ReaderEvent>,
) where
    R: AsyncRead + Unpin,
{
    let span = debug_span!("reader", connection = %id);
    async move {
        let mut buf = vec![0u8; buffer_size];
        let termination = 'read: loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break Termination::Eof,
                Ok(n) => n,
                Err(e) => break Termination::Failed(e),
            };
            for line in lines(&buf[..n]) {
                let msg = Message::decode(id, line);
                if msg.is_quit() {
                    break 'read Termination::Quit;
                }
                trace!("read {} bytes", line.len());
                // blocks while the coordinator is busy delivering
                if events_tx.send(ReaderEvent::Message(msg)).await.is_err() {
                    debug!("coordinator is gone");
                    return;
                }
            }
        };
        drop(stream);
        match termination {
            Termination::Eof => debug!("peer disconnected"),
            Termination::Quit => debug!("peer quit"),
            Termination::Failed(e) => debug!("read failed: {}", e),
        }
        let _ = events_tx.send(ReaderEvent::Closed(id)).await;
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const ID: ConnectionId = ConnectionId(3);

    async fn collect(
        input: &'static [u8],
        buffer_size: usize,
    ) -> Vec<ReaderEvent> {
        let (tx, mut rx) = mpsc::channel(1);
        let reader = tokio::spawn(read_messages(ID, input, buffer_size, tx));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        reader.await.unwrap();
        events
    }

    fn msg(text: &str) -> ReaderEvent {
        ReaderEvent::Message(Message::new(ID, text))
    }

    #[tokio::test]
    async fn forwards_lines_then_closes_on_eof() {
        let events = collect(b"hello\r\nworld\n", 2048).await;
        assert_eq!(
            events,
            [msg("hello"), msg("world"), ReaderEvent::Closed(ID)]
        );
    }

    #[tokio::test]
    async fn quit_is_swallowed_and_ends_the_reader() {
        let events = collect(b"before\nquit\nafter\n", 2048).await;
        assert_eq!(events, [msg("before"), ReaderEvent::Closed(ID)]);
    }

    #[tokio::test]
    async fn long_lines_arrive_in_buffer_sized_pieces() {
        let events = collect(b"abcdefgh\n", 4).await;
        assert_eq!(
            events,
            [msg("abcd"), msg("efgh"), msg(""), ReaderEvent::Closed(ID)]
        );
    }

    #[tokio::test]
    async fn peer_hangup_closes() {
        let (client, server) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(1);
        let reader = tokio::spawn(read_messages(ID, server, 64, tx));

        let mut client = client;
        client.write_all(b"one\n").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), msg("one"));

        drop(client);
        assert_eq!(rx.recv().await.unwrap(), ReaderEvent::Closed(ID));
        assert!(rx.recv().await.is_none());
        reader.await.unwrap();
    }
}
