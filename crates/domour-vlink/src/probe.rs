use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use log::trace;
use tokio::net::TcpStream;

/// Local port the helper serves on.
pub const DEFAULT_PROBE_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1080));
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Whether something accepts TCP connections on `addr` within `timeout`.
pub async fn probe(addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(error)) => {
            trace!("Probe of {addr} failed: {error}");
            false
        }
        Err(_) => {
            trace!("Probe of {addr} timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::probe;

    #[tokio::test]
    async fn probe_reports_listener_then_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("listener has an address");

        assert!(probe(addr, Duration::from_millis(500)).await);

        drop(listener);
        assert!(!probe(addr, Duration::from_millis(500)).await);
    }
}
