//! UDP command endpoint. A bound datagram listener with a bounded-wait
//! poll, decoding one datagram into a typed wire command. Bound with
//! `SO_REUSEADDR` set via `socket2` before handing the fd to tokio, so a
//! quick restart doesn't fail on a socket still draining in `TIME_WAIT`.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::warn;

use crate::config::MAX_APP_CMD_LENGTH;
use crate::error::WatchdogError;

/// Decoded wire command. `'a'`/`'o'`/`'r'` are reserved vocabulary the
/// parser recognises but the supervisor loop does not act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    Heartbeat(Vec<u8>),
    StartByName,
    StopByName,
    RestartByName,
    Unknown(u8),
}

pub fn decode(datagram: &[u8]) -> WireCommand {
    match datagram.first() {
        Some(b'p') => WireCommand::Heartbeat(datagram.to_vec()),
        Some(b'a') => WireCommand::StartByName,
        Some(b'o') => WireCommand::StopByName,
        Some(b'r') => WireCommand::RestartByName,
        Some(&other) => WireCommand::Unknown(other),
        None => WireCommand::Unknown(0),
    }
}

pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    pub async fn bind(port: u16) -> Result<Self, WatchdogError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let bind = || -> std::io::Result<std::net::UdpSocket> {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            socket.set_reuse_address(true)?;
            socket.set_nonblocking(true)?;
            socket.bind(&addr.into())?;
            Ok(socket.into())
        };
        let std_socket = bind()
            .map_err(|e| WatchdogError::UdpFatal(format!("bind 0.0.0.0:{port}: {e}")))?;
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| WatchdogError::UdpFatal(format!("bind 0.0.0.0:{port}: {e}")))?;
        Ok(Self { socket })
    }

    /// Wait up to `timeout_ms` for one datagram, zero-terminated conceptually
    /// and bounded by `MAX_APP_CMD_LENGTH - 1` bytes. Returns `Ok(None)` on
    /// timeout. Any recv error is fatal to the endpoint — the caller
    /// terminates the loop.
    pub async fn poll(&self, timeout_ms: u64) -> Result<Option<Vec<u8>>, WatchdogError> {
        let mut buf = [0u8; MAX_APP_CMD_LENGTH];
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.socket.recv_from(&mut buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok((n, _peer))) => {
                let n = n.min(MAX_APP_CMD_LENGTH - 1);
                Ok(Some(buf[..n].to_vec()))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "udp recv failed");
                Err(WatchdogError::UdpFatal(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_heartbeat_tag() {
        assert_eq!(decode(b"p1234"), WireCommand::Heartbeat(b"p1234".to_vec()));
    }

    #[test]
    fn decodes_reserved_tags() {
        assert_eq!(decode(b"astart-app"), WireCommand::StartByName);
        assert_eq!(decode(b"ostop-app"), WireCommand::StopByName);
        assert_eq!(decode(b"restart-app"), WireCommand::RestartByName);
    }

    #[test]
    fn unknown_tag_is_logged_and_discarded_by_caller() {
        assert_eq!(decode(b"zgarbage"), WireCommand::Unknown(b'z'));
    }

    #[test]
    fn empty_datagram_is_unknown() {
        assert_eq!(decode(b""), WireCommand::Unknown(0));
    }

    #[tokio::test]
    async fn poll_times_out_with_no_traffic() {
        let endpoint = UdpEndpoint::bind(0).await.expect("bind should succeed on port 0");
        let result = endpoint.poll(50).await.expect("poll should not error on timeout");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn poll_receives_datagram() {
        let endpoint = UdpEndpoint::bind(0).await.expect("bind should succeed on port 0");
        let local_addr = endpoint.socket.local_addr().unwrap();
        let sender = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        sender.send_to(b"p999", local_addr).await.unwrap();

        let result = endpoint.poll(500).await.expect("poll should succeed");
        assert_eq!(result, Some(b"p999".to_vec()));
    }
}
