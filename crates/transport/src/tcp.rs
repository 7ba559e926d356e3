use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use acip_protocol::AcipError;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::Transport;

/// A plain TCP transport. Reads and writes share the stream under separate
/// halves so a concurrent sender and receiver never block each other.
pub struct TcpTransport {
    reader: Mutex<tokio::net::tcp::OwnedReadHalf>,
    writer: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    peer: SocketAddr,
    closed: AtomicBool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        apply_keepalive(&stream);
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
            closed: AtomicBool::new(false),
        }
    }
}

fn apply_keepalive(stream: &TcpStream) {
    use socket2::{SockRef, TcpKeepalive};
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    #[cfg(not(target_os = "windows"))]
    let keepalive = keepalive.with_retries(3);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        tracing::debug!("failed to set TCP keepalive: {e}");
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, bytes: &[u8], timeout: Duration) -> Result<(), AcipError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AcipError::NotOpen);
        }
        let mut writer = self.writer.lock().await;
        tokio::time::timeout(timeout, writer.write_all(bytes))
            .await
            .map_err(|_| AcipError::Timeout)?
            .map_err(|e| map_io_error(&e))
    }

    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AcipError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AcipError::NotOpen);
        }
        let mut reader = self.reader.lock().await;
        let read = tokio::time::timeout(timeout, reader.read(buf))
            .await
            .map_err(|_| AcipError::Timeout)?
            .map_err(|e| map_io_error(&e))?;
        Ok(read)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn peer_id(&self) -> String {
        self.peer.to_string()
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

fn map_io_error(e: &std::io::Error) -> AcipError {
    use std::io::ErrorKind::*;
    match e.kind() {
        ConnectionRefused => AcipError::ConnectionRefused,
        ConnectionReset | BrokenPipe | ConnectionAborted => AcipError::ConnectionReset,
        UnexpectedEof => AcipError::EndOfStream,
        TimedOut => AcipError::Timeout,
        _ => AcipError::ConnectionReset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn send_recv_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let peer = stream.peer_addr().unwrap();
            TcpTransport::new(stream, peer)
        });

        let (server_stream, peer) = listener.accept().await.unwrap();
        let server = TcpTransport::new(server_stream, peer);
        let client = client_task.await.unwrap();

        client.send(b"hello", Duration::from_secs(1)).await.unwrap();
        let mut buf = [0u8; 16];
        let n = server.recv(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let peer = stream.peer_addr().unwrap();
            TcpTransport::new(stream, peer)
        });
        let (_server_stream, _peer) = listener.accept().await.unwrap();
        let client = client_task.await.unwrap();

        client.close().await;
        client.close().await;
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn send_after_close_is_not_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let peer = stream.peer_addr().unwrap();
            TcpTransport::new(stream, peer)
        });
        let (_server_stream, _peer) = listener.accept().await.unwrap();
        let client = client_task.await.unwrap();
        client.close().await;
        let result = client.send(b"x", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(AcipError::NotOpen)));
    }
}
