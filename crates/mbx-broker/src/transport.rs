use std::io;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Byte-stream seam to the transport collaborator that carries session
/// payloads (named pipes in the reference deployment).
///
/// Creation, naming, and teardown of the underlying transport are out of
/// the broker's scope; a session only ever sees this trait.
#[async_trait]
pub trait SessionEndpoint: Send {
    /// Receive up to `buf.len()` bytes from the peer. Returns the number
    /// of bytes received; 0 means the peer ended the stream.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Deliver `data` to the peer.
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;
}

/// In-memory duplex endpoint for tests and embedding.
///
/// [`pair`](ChannelEndpoint::pair) returns two cross-connected endpoints:
/// bytes sent on one side arrive at the other. Dropping a side ends its
/// peer's stream.
pub struct ChannelEndpoint {
    incoming: mpsc::Receiver<Vec<u8>>,
    outgoing: mpsc::Sender<Vec<u8>>,
    pending: Vec<u8>,
}

impl ChannelEndpoint {
    /// Build a connected endpoint pair with the given channel capacity.
    pub fn pair(capacity: usize) -> (ChannelEndpoint, ChannelEndpoint) {
        let (left_tx, right_rx) = mpsc::channel(capacity);
        let (right_tx, left_rx) = mpsc::channel(capacity);
        (
            ChannelEndpoint {
                incoming: left_rx,
                outgoing: left_tx,
                pending: Vec::new(),
            },
            ChannelEndpoint {
                incoming: right_rx,
                outgoing: right_tx,
                pending: Vec::new(),
            },
        )
    }
}

#[async_trait]
impl SessionEndpoint for ChannelEndpoint {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.incoming.recv().await {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.outgoing
            .send(data.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer endpoint closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_carries_bytes_both_ways() {
        let (mut a, mut b) = ChannelEndpoint::pair(4);

        a.send(b"ping").await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(b.recv(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");

        b.send(b"pong").await.unwrap();
        assert_eq!(a.recv(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"pong");
    }

    #[tokio::test]
    async fn short_reads_resume_mid_chunk() {
        let (mut a, mut b) = ChannelEndpoint::pair(4);
        a.send(b"abcdef").await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(b.recv(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(b.recv(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[tokio::test]
    async fn dropped_peer_ends_stream() {
        let (a, mut b) = ChannelEndpoint::pair(4);
        drop(a);

        let mut buf = [0u8; 4];
        assert_eq!(b.recv(&mut buf).await.unwrap(), 0);
        assert!(b.send(b"into the void").await.is_err());
    }

    #[tokio::test]
    async fn empty_chunks_do_not_signal_eof() {
        let (mut a, mut b) = ChannelEndpoint::pair(4);
        a.send(b"").await.unwrap();
        a.send(b"real").await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(b.recv(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"real");
    }
}
