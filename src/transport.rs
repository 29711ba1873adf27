//! Blocking TCP transport: connect (reverse mode) and listen/accept (bind
//! mode), tuned for low-latency small-message traffic.
//!
//! Byte-level send/receive with complete-transfer, EINTR-retrying
//! semantics lives in [`crate::frame`], which operates directly on the
//! [`std::net::TcpStream`] this module hands back -- there is no separate
//! transport-level send/recv API to duplicate that.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

/// How long `accept` blocks before returning control to the caller so it
/// can recheck a shutdown flag. Small enough that SIGINT/SIGTERM-driven
/// shutdown in bind mode feels immediate, large enough not to spin.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Dials `host:port`, trying every address the resolver returns (both
/// address families are acceptable) until one connects.
pub fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .with_context(|| format!("connect to {host}:{port} failed (unreachable)"))?;
    tune_for_low_latency(&stream)?;
    debug!(%host, port, "connected to peer");
    Ok(stream)
}

/// Binds a dual-stack listener on `port` when the platform allows it,
/// falling back to IPv4-only otherwise.
pub fn listen(port: u16) -> Result<TcpListener> {
    match listen_dual_stack(port) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            warn!("dual-stack listen failed ({e}), falling back to IPv4-only");
            listen_v4(port)
        }
    }
}

fn listen_dual_stack(port: u16) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
        .context("create IPv6 socket")?;
    socket.set_only_v6(false).context("enable dual-stack")?;
    socket.set_reuse_address(true).context("set SO_REUSEADDR")?;
    socket
        .set_read_timeout(Some(ACCEPT_POLL_INTERVAL))
        .context("set accept poll timeout")?;
    let addr = format!("[::]:{port}").parse().unwrap();
    socket.bind(&addr.into()).context("bind dual-stack listener")?;
    socket.listen(5).context("listen")?;
    Ok(socket.into())
}

fn listen_v4(port: u16) -> Result<TcpListener> {
    let socket =
        Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).context("create IPv4 socket")?;
    socket.set_reuse_address(true).context("set SO_REUSEADDR")?;
    socket
        .set_read_timeout(Some(ACCEPT_POLL_INTERVAL))
        .context("set accept poll timeout")?;
    let addr = format!("0.0.0.0:{port}").parse().unwrap();
    socket.bind(&addr.into()).context("bind IPv4 listener")?;
    socket.listen(5).context("listen")?;
    Ok(socket.into())
}

/// Blocks until a connection arrives or `ACCEPT_POLL_INTERVAL` elapses,
/// returning `Ok(None)` on timeout so the bind-mode accept loop can
/// recheck its shutdown flag. Applies the same low-latency option used
/// for the reverse-mode dial to any connection that does arrive.
pub fn accept(listener: &TcpListener) -> Result<Option<TcpStream>> {
    match listener.accept() {
        Ok((stream, addr)) => {
            tune_for_low_latency(&stream)?;
            debug!(peer = %addr, "accepted connection");
            Ok(Some(stream))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
            Ok(None)
        }
        Err(e) => Err(e).context("accept failed"),
    }
}

fn tune_for_low_latency(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true).context("set TCP_NODELAY")?;
    Ok(())
}
