//! Network helpers: LAN address discovery and port fallback.

use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
/// Falls back to `127.0.0.1` when no route is available.
pub fn local_ip() -> IpAddr {
    let probe = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!("local IP discovery failed: {e}");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Bind `host:port`, or the first free port among the next `attempts - 1`.
pub async fn bind_with_fallback(host: &str, port: u16, attempts: u16) -> io::Result<TcpListener> {
    if port == 0 {
        return TcpListener::bind((host, 0)).await;
    }

    let mut last_err = None;
    for candidate in (port..=u16::MAX).take(attempts.max(1) as usize) {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                if candidate != port {
                    warn!(requested = port, bound = candidate, "port in use, using fallback");
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!(port = candidate, "port in use");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "no free port")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ip_is_concrete() {
        assert!(!local_ip().is_unspecified());
    }

    #[tokio::test]
    async fn falls_back_to_next_port() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        match bind_with_fallback("127.0.0.1", port, 20).await {
            Ok(listener) => assert_ne!(listener.local_addr().unwrap().port(), port),
            // Every following port happened to be busy too.
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::AddrInUse),
        }
    }

    #[tokio::test]
    async fn single_attempt_reports_conflict() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind_with_fallback("127.0.0.1", port, 1).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn port_zero_is_ephemeral() {
        let listener = bind_with_fallback("127.0.0.1", 0, 5).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
