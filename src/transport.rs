//! Transport adapter (C3): the abstract bind/send/receive surface the rest
//! of the engine depends on.
//!
//! The engine never touches `tokio::net` directly outside this module. Here
//! that abstraction is realized over Tokio's non-blocking primitives:
//! `UdpSocket::try_recv_from`/`try_send_to` for the datagram endpoint, and
//! `TcpStream::try_read`/`try_write` plus a `now_or_never`-probed `accept`
//! for the stream endpoints — so a poll from `tick()` never suspends
//! waiting for I/O that isn't already ready (§4.3, §5).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use futures_util::future::FutureExt;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::error::TransportError;

/// Datagram endpoint: one per process, bound to the discovery port with
/// `SO_BROADCAST` enabled.
pub struct UdpEp {
    socket: UdpSocket,
}

impl UdpEp {
    /// Bind to `local_port` with broadcast permission and `SO_REUSEADDR`
    /// (and `SO_REUSEPORT` where available) so that rapid restarts and
    /// multiple local test instances don't fight over the port.
    pub async fn bind(local_port: u16) -> Result<Self, TransportError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(TransportError::Fatal)?;
        socket.set_reuse_address(true).map_err(TransportError::Fatal)?;
        #[cfg(not(target_os = "windows"))]
        socket.set_reuse_port(true).ok();
        socket.set_broadcast(true).map_err(TransportError::Fatal)?;
        socket.set_nonblocking(true).map_err(TransportError::Fatal)?;
        socket
            .bind(&socket2::SockAddr::from(addr))
            .map_err(TransportError::Fatal)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(UdpEp { socket })
    }

    /// Enqueue one datagram. Non-blocking; `WouldBlock` on a full send
    /// buffer must not abort the caller (§4.3).
    pub fn try_send(&self, dest: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        match self.socket.try_send_to(bytes, dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(TransportError::WouldBlock),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    /// Drain one datagram without blocking. Callers loop on this until it
    /// returns `NoData` (drain discipline, §4.5).
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<(SocketAddr, usize), TransportError> {
        match self.socket.try_recv_from(buf) {
            Ok((n, src)) => Ok((src, n)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(TransportError::NoData),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

/// Listening stream endpoint: one per process, bound to the messaging port.
pub struct ListenerEp {
    listener: TcpListener,
}

impl ListenerEp {
    pub async fn bind(local_port: u16) -> Result<Self, TransportError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port);
        let listener = TcpListener::bind(addr).await?;
        Ok(ListenerEp { listener })
    }

    /// Probe for a pending connection without suspending the tick. Uses
    /// `now_or_never` so an already-ready accept completes immediately and
    /// an empty queue resolves to `NoData` rather than parking the task.
    pub fn try_accept(&self) -> Result<(DataEp, SocketAddr), TransportError> {
        match self.listener.accept().now_or_never() {
            Some(Ok((stream, addr))) => Ok((DataEp { stream }, addr)),
            Some(Err(e)) => Err(TransportError::Io(e)),
            None => Err(TransportError::NoData),
        }
    }
}

/// A single TCP data endpoint — either an accepted inbound connection or a
/// freshly connected transient outbound one.
pub struct DataEp {
    stream: TcpStream,
}

impl DataEp {
    /// Initiate an outbound stream with an explicit connect deadline.
    pub async fn connect(
        dest: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        match timeout(connect_timeout, TcpStream::connect(dest)).await {
            Ok(Ok(stream)) => Ok(DataEp { stream }),
            Ok(Err(e)) => Err(classify_connect_err(e)),
            Err(_) => Err(TransportError::TimedOut),
        }
    }

    /// Send the full buffer or fail; loops internally to cope with partial
    /// writes, bounded by `send_timeout`.
    pub async fn send(&mut self, bytes: &[u8], send_timeout: Duration) -> Result<(), TransportError> {
        use tokio::io::AsyncWriteExt;
        match timeout(send_timeout, self.stream.write_all(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::TimedOut),
        }
    }

    /// Non-blocking read up to `buf.len()`. Distinguishes a graceful peer
    /// close (`Ok(0)` from the underlying stream) from "no data yet".
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.try_read(buf) {
            Ok(0) => Err(TransportError::PeerClosed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(TransportError::NoData),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => Err(TransportError::Reset),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    /// Half-close our write side and let the peer observe EOF; the caller
    /// is still expected to drain any trailing bytes (closing discipline,
    /// §4.5) before considering the session torn down.
    pub async fn close_graceful(&mut self) -> Result<(), TransportError> {
        use tokio::io::AsyncWriteExt;
        self.stream.shutdown().await.map_err(TransportError::Io)
    }

    /// Abort the connection with an RST rather than a clean FIN, via
    /// `SO_LINGER(0)`. Used on timeout/error paths where the state machine
    /// enters `PostAbortCooldown` (§4.5).
    pub fn abort(&self) {
        let std_stream = socket2::SockRef::from(&self.stream);
        let _ = std_stream.set_linger(Some(Duration::from_secs(0)));
    }

    pub fn peer_ip(&self) -> Option<String> {
        self.stream.peer_addr().ok().map(|a| a.ip().to_string())
    }
}

fn classify_connect_err(e: std::io::Error) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => TransportError::Refused,
        std::io::ErrorKind::TimedOut => TransportError::TimedOut,
        _ => TransportError::Io(e),
    }
}

/// Best-effort textual local IPv4 address, used for display and as the
/// `sender_ip` field embedded in outbound frames.
///
/// There is no portable "get my LAN IP" syscall; the common trick —
/// connecting a UDP socket to a public address without sending anything —
/// is what decides which local interface the OS would route through.
pub async fn resolve_local_ip() -> Result<String, TransportError> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    probe.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).await?;
    let addr = probe.local_addr()?;
    Ok(addr.ip().to_string())
}
