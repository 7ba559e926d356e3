use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acip_protocol::AcipError;
use tokio::net::{lookup_host, TcpStream};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolve `host:port`, launch one connect attempt per resolved address
/// family in parallel, and return the stream from whichever wins; the
/// loser is dropped (closing its half-open socket). Polls `should_exit`
/// at least every 100 ms so the caller can cancel an in-flight connect.
pub async fn connect_dual_stack(
    host: &str,
    port: u16,
    timeout: Duration,
    should_exit: Arc<AtomicBool>,
) -> Result<TcpStream, AcipError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|_| AcipError::ConnectionRefused)?
        .collect();

    let v4: Vec<SocketAddr> = addrs.iter().copied().filter(|a| a.is_ipv4()).collect();
    let v6: Vec<SocketAddr> = addrs.iter().copied().filter(|a| a.is_ipv6()).collect();

    if v4.is_empty() && v6.is_empty() {
        return Err(AcipError::ConnectionRefused);
    }

    let mut attempts = Vec::new();
    if let Some(addr) = v4.first().copied() {
        attempts.push(tokio::spawn(attempt(addr, timeout, should_exit.clone())));
    }
    if let Some(addr) = v6.first().copied() {
        attempts.push(tokio::spawn(attempt(addr, timeout, should_exit.clone())));
    }

    // "First to connect wins": a fast-failing family must not abort a
    // still-in-flight sibling, so keep polling whatever's left until one
    // attempt succeeds or all of them have failed.
    let mut last_err = AcipError::ConnectionRefused;
    loop {
        if attempts.is_empty() {
            return Err(last_err);
        }
        let (result, _index, remaining) = futures_util::future::select_all(attempts).await;
        match result {
            Ok(Ok(stream)) => {
                for handle in remaining {
                    handle.abort();
                }
                return Ok(stream);
            }
            Ok(Err(e)) => {
                last_err = e;
                attempts = remaining;
            }
            Err(_) => {
                attempts = remaining;
            }
        }
    }
}

async fn attempt(
    addr: SocketAddr,
    timeout: Duration,
    should_exit: Arc<AtomicBool>,
) -> Result<TcpStream, AcipError> {
    let connect = TcpStream::connect(addr);
    tokio::pin!(connect);

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if should_exit.load(Ordering::Acquire) {
            return Err(AcipError::Timeout);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AcipError::Timeout);
        }
        match tokio::time::timeout(POLL_INTERVAL, &mut connect).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(_)) => return Err(AcipError::ConnectionRefused),
            Err(_) => continue, // poll interval elapsed, recheck should_exit/deadline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_ipv4_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let should_exit = Arc::new(AtomicBool::new(false));
        let stream = connect_dual_stack("127.0.0.1", port, Duration::from_secs(2), should_exit)
            .await
            .unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn unreachable_port_times_out_quickly_when_cancelled() {
        let should_exit = Arc::new(AtomicBool::new(true));
        let result =
            connect_dual_stack("127.0.0.1", 1, Duration::from_secs(5), should_exit).await;
        assert!(result.is_err());
    }
}
