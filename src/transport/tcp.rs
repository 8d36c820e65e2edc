//! TCP client and server transports.
//!
//! # Example
//!
//! An echo client talking to a local server:
//!
//! ```no_run
//! use rivulet::task::Executor;
//!
//! Executor::block_on(async {
//!     let mut stream = rivulet::tcp::connect("example.com", 80).await?;
//!     stream.write(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n").await?;
//!     let mut response = Vec::new();
//!     stream.read_until_eof(&mut response).await?;
//!     Ok::<_, rivulet::Error>(response)
//! });
//! ```

use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::{debug, trace};
use nix::errno::Errno;

use crate::error::{Error, Result};
use crate::reactor::Reactor;
use crate::stream::Stream;
use crate::sys;

use super::fd::FdTransport;
use super::ByteTransport;

/// A connected client socket.
///
/// Outgoing data is corked so that small writes batch into full segments;
/// a stream-level flush momentarily releases the cork to push everything
/// out.
#[derive(Debug)]
pub struct TcpTransport {
    fd: Option<OwnedFd>,
}

impl TcpTransport {
    pub(crate) async fn connect_addr(ip: Ipv4Addr, port: u16) -> Result<Self> {
        let fd = sys::socket(libc::SOCK_STREAM, libc::IPPROTO_TCP)?;
        connect_nonblocking(&fd, ip, port).await?;
        sys::set_cork(fd.as_raw_fd(), true)?;
        debug!("tcp: connected to {ip}:{port}");
        Ok(Self { fd: Some(fd) })
    }

    fn fd(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| Error::Usage("transport is closed".into()))
    }
}

/// Drive a non-blocking `connect(2)` to its conclusion: on `EINPROGRESS`,
/// suspend until the socket is writable, then read the pending socket
/// error.
pub(crate) async fn connect_nonblocking(fd: &OwnedFd, ip: Ipv4Addr, port: u16) -> Result<()> {
    if sys::connect(fd.as_raw_fd(), ip, port)? {
        return Ok(());
    }
    Reactor::wait_write(fd.as_raw_fd()).await?;
    match sys::so_error(fd.as_raw_fd())? {
        0 => Ok(()),
        err => Err(Error::Sys {
            call: "connect()",
            errno: Errno::from_raw(err),
        }),
    }
}

impl ByteTransport for TcpTransport {
    const LOOKAHEAD: bool = true;

    async fn wait_read(&mut self) -> Result<()> {
        Reactor::wait_read(self.fd()?).await
    }

    async fn wait_write(&mut self) -> Result<()> {
        Reactor::wait_write(self.fd()?).await
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        sys::read(self.fd()?, buf)
    }

    /// A broken pipe surfaces as [`Error::Eof`] (see [`sys::write`]).
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        sys::write(self.fd()?, data)
    }

    /// Releasing and re-setting the cork pushes the batched segments out.
    async fn flush(&mut self) -> Result<()> {
        let fd = self.fd()?;
        sys::set_cork(fd, false)?;
        sys::set_cork(fd, true)
    }

    async fn close(&mut self) -> Result<()> {
        self.fd.take();
        Ok(())
    }

    fn available_bytes(&mut self) -> Result<usize> {
        sys::available_bytes(self.fd()?)
    }
}

/// Resolve `host` and connect, returning the bare transport.
pub(crate) async fn connect_transport(host: &str, port: u16) -> Result<TcpTransport> {
    let ip = crate::dns::host_to_ip(host).await?;
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| Error::protocol(format!("resolver produced an invalid address: {ip}")))?;
    TcpTransport::connect_addr(ip, port).await
}

/// Connect to `host:port`, resolving `host` through the DNS client.
pub async fn connect(host: &str, port: u16) -> Result<Stream<TcpTransport>> {
    Ok(Stream::new(connect_transport(host, port).await?))
}

/// A socket listening for incoming connections.
pub struct Server {
    fd: OwnedFd,
}

impl Server {
    /// Wait for and accept the next connection, transferring ownership of
    /// the client socket to the returned stream.
    pub async fn accept(&mut self) -> Result<Stream<FdTransport>> {
        loop {
            Reactor::wait_read(self.fd.as_raw_fd()).await?;
            if let Some(client) = sys::accept(self.fd.as_raw_fd())? {
                trace!("tcp: accepted connection");
                return Ok(Stream::new(FdTransport::new(client)));
            }
        }
    }

    /// The port the listening socket is bound to; useful after binding
    /// port 0.
    pub fn local_port(&self) -> Result<u16> {
        sys::local_port(self.fd.as_raw_fd())
    }
}

/// Listen for TCP connections on `port`.
///
/// The socket currently binds `0.0.0.0` whatever `ip` says; the argument
/// is kept so callers read naturally.
// TODO honor `ip` by binding the requested interface address.
pub async fn listen(ip: &str, port: u16) -> Result<Server> {
    let _ = ip;
    Ok(Server {
        fd: sys::bind_listen(port)?,
    })
}
