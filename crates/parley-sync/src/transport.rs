//! Transport abstraction for the sync protocol.
//!
//! A transport is a point-to-point, message-oriented pipe between exactly
//! two peers. The listener side binds and waits; the requestor side
//! connects. Implementations deliver whole [`Frame`]s or nothing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Result, SyncError};
use crate::wire::Frame;

/// Default deadline for a single send or receive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Largest accepted frame part, to bound allocation on a hostile peer.
const MAX_PART_LEN: u32 = 16 * 1024 * 1024;

/// A point-to-point frame pipe.
///
/// Every operation has a deadline; hitting it yields
/// [`SyncError::Timeout`], which callers treat as retryable. Any other
/// error means the connection is suspect and [`reconnect`](Transport::reconnect)
/// (or simply retrying, for lazily-connecting implementations) is the way
/// back.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a frame to the peer.
    async fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Receive the next frame from the peer.
    async fn recv(&mut self) -> Result<Frame>;

    /// Tear down the connection and establish a fresh one.
    async fn reconnect(&mut self) -> Result<()>;
}

enum Role {
    /// Bind `addr` and accept a single peer.
    Listen,
    /// Connect out to `addr`.
    Connect,
}

/// TCP transport with its own framing: a `u8` part count, then each part
/// as a `u32` little-endian length followed by that many bytes.
///
/// The connection is established lazily on first use and re-established
/// after any I/O failure, so a worker loop never has to care whether its
/// peer restarted underneath it.
pub struct TcpTransport {
    addr: String,
    role: Role,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// A transport that binds `addr` and waits for its peer.
    pub fn listen(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            role: Role::Listen,
            timeout: DEFAULT_TIMEOUT,
            stream: None,
        }
    }

    /// A transport that connects out to `addr`.
    pub fn connect(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            role: Role::Connect,
            timeout: DEFAULT_TIMEOUT,
            stream: None,
        }
    }

    /// Override the per-operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Establish the connection, bounded by `deadline`. Expiry leaves the
    /// transport unconnected; the next call starts over.
    async fn establish_within(&mut self, deadline: Duration) -> Result<&mut TcpStream> {
        match tokio::time::timeout(deadline, self.establish()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }

    async fn establish(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let stream = match self.role {
                Role::Listen => {
                    let listener = TcpListener::bind(&self.addr).await?;
                    tracing::debug!(addr = %self.addr, "waiting for a peer");
                    let (stream, peer) = listener.accept().await?;
                    tracing::debug!(%peer, "peer connected");
                    stream
                }
                Role::Connect => {
                    tracing::debug!(addr = %self.addr, "connecting to peer");
                    TcpStream::connect(&self.addr).await?
                }
            };
            stream.set_nodelay(true)?;
            self.stream = Some(stream);
        }
        // Just stored above if it was absent.
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(SyncError::Disconnected),
        }
    }

    async fn write_frame(stream: &mut TcpStream, frame: &Frame) -> Result<()> {
        let parts = u8::try_from(frame.len())
            .map_err(|_| SyncError::Protocol(format!("{} frame parts, max 255", frame.len())))?;
        stream.write_u8(parts).await?;
        for part in frame {
            let len = u32::try_from(part.len())
                .ok()
                .filter(|len| *len <= MAX_PART_LEN)
                .ok_or_else(|| {
                    SyncError::Protocol(format!("frame part of {} bytes is too large", part.len()))
                })?;
            stream.write_u32_le(len).await?;
            stream.write_all(part).await?;
        }
        stream.flush().await?;
        Ok(())
    }

    async fn read_frame(stream: &mut TcpStream) -> Result<Frame> {
        let parts = stream.read_u8().await?;
        let mut frame = Vec::with_capacity(parts as usize);
        for _ in 0..parts {
            let len = stream.read_u32_le().await?;
            if len > MAX_PART_LEN {
                return Err(SyncError::Protocol(format!(
                    "peer announced a frame part of {len} bytes"
                )));
            }
            let mut part = vec![0u8; len as usize];
            stream.read_exact(&mut part).await?;
            frame.push(part);
        }
        Ok(frame)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let timeout = self.timeout;
        let stream = self.establish_within(timeout).await?;
        let result = tokio::time::timeout(timeout, Self::write_frame(stream, frame)).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                // A half-written frame poisons the stream.
                self.stream = None;
                Err(err)
            }
            Err(_) => {
                self.stream = None;
                Err(SyncError::Timeout)
            }
        }
    }

    async fn recv(&mut self) -> Result<Frame> {
        let timeout = self.timeout;
        let stream = self.establish_within(timeout).await?;
        let result = tokio::time::timeout(timeout, Self::read_frame(stream)).await;
        match result {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(err)) => {
                self.stream = None;
                Err(err)
            }
            // Nothing was consumed; the connection stays usable, so a
            // timed-out receive may simply be retried.
            Err(_) => Err(SyncError::Timeout),
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.stream = None;
        let timeout = self.timeout;
        self.establish_within(timeout).await?;
        Ok(())
    }
}

/// In-memory transport pair for testing: two endpoints joined by
/// channels, with the same timeout semantics as the TCP transport.
pub struct MemoryTransport {
    tx: tokio::sync::mpsc::Sender<Frame>,
    rx: tokio::sync::mpsc::Receiver<Frame>,
    timeout: Duration,
}

impl MemoryTransport {
    /// Create both ends of a connected pipe.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = tokio::sync::mpsc::channel(64);
        let (b_tx, a_rx) = tokio::sync::mpsc::channel(64);
        (
            MemoryTransport {
                tx: a_tx,
                rx: a_rx,
                timeout: DEFAULT_TIMEOUT,
            },
            MemoryTransport {
                tx: b_tx,
                rx: b_rx,
                timeout: DEFAULT_TIMEOUT,
            },
        )
    }

    /// Override the receive deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.tx
            .send(frame.clone())
            .await
            .map_err(|_| SyncError::Disconnected)
    }

    async fn recv(&mut self) -> Result<Frame> {
        match tokio::time::timeout(self.timeout, self.rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(SyncError::Disconnected),
            Err(_) => Err(SyncError::Timeout),
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        // The pipe is the connection; there is nothing to rebuild.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_delivers_frames() {
        let (mut a, mut b) = MemoryTransport::pair();

        let frame = vec![b"send".to_vec()];
        a.send(&frame).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), frame);

        let reply = vec![b"deleted".to_vec()];
        b.send(&reply).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), reply);
    }

    #[tokio::test]
    async fn test_memory_recv_times_out() {
        let (a, _b) = MemoryTransport::pair();
        let mut a = a.with_timeout(Duration::from_millis(10));
        assert!(matches!(a.recv().await, Err(SyncError::Timeout)));
    }

    #[tokio::test]
    async fn test_memory_recv_reports_disconnect() {
        let (mut a, b) = MemoryTransport::pair();
        drop(b);
        assert!(matches!(a.recv().await, Err(SyncError::Disconnected)));
    }

    #[test]
    fn test_transports_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn Transport>();
        assert_send_sync::<TcpTransport>();
        assert_send_sync::<MemoryTransport>();
    }

    #[tokio::test]
    async fn test_tcp_recv_with_no_peer_times_out() {
        let mut transport =
            TcpTransport::listen("127.0.0.1:0").with_timeout(Duration::from_millis(50));

        // Nobody ever connects; the deadline must still hold.
        let result = tokio::time::timeout(Duration::from_secs(1), transport.recv())
            .await
            .expect("recv must return within its deadline");
        assert!(matches!(result, Err(SyncError::Timeout)));

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            transport.send(&vec![b"send".to_vec()]),
        )
        .await
        .expect("send must return within its deadline");
        assert!(matches!(result, Err(SyncError::Timeout)));
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut server = TcpTransport::listen(addr.clone());
        let mut client = TcpTransport::connect(addr);

        let server_task = tokio::spawn(async move {
            let frame = server.recv().await.unwrap();
            assert_eq!(frame, vec![b"send".to_vec()]);
            server
                .send(&vec![b"empty".to_vec(), 7u64.to_le_bytes().to_vec()])
                .await
                .unwrap();
        });

        // Give the server a moment to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.send(&vec![b"send".to_vec()]).await.unwrap();
        let reply = client.recv().await.unwrap();
        assert_eq!(reply[0], b"empty".to_vec());
        assert_eq!(reply[1], 7u64.to_le_bytes().to_vec());

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_multipart_frames_keep_boundaries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut server = TcpTransport::listen(addr.clone());
        let mut client = TcpTransport::connect(addr);

        let frame = vec![b"msg".to_vec(), vec![0u8; 4096], vec![], b"tail".to_vec()];
        let expect = frame.clone();

        let server_task = tokio::spawn(async move {
            assert_eq!(server.recv().await.unwrap(), expect);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        client.send(&frame).await.unwrap();
        server_task.await.unwrap();
    }
}
