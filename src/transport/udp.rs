//! Connected UDP datagram transport.

use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::debug;

use crate::error::{Error, Result};
use crate::reactor::Reactor;
use crate::stream::MsgStream;
use crate::sys;

use super::tcp::connect_nonblocking;
use super::DatagramTransport;

/// Largest datagram accepted or produced, either direction.
pub const MAX_DATAGRAM: usize = 65536;

/// A connected datagram socket: the remote peer is fixed at construction
/// and each read or write moves exactly one datagram.
pub struct UdpTransport {
    fd: Option<OwnedFd>,
}

impl UdpTransport {
    pub(crate) async fn connect_addr(ip: Ipv4Addr, port: u16) -> Result<Self> {
        let fd = sys::socket(libc::SOCK_DGRAM, libc::IPPROTO_UDP)?;
        connect_nonblocking(&fd, ip, port).await?;
        debug!("udp: connected to {ip}:{port}");
        Ok(Self { fd: Some(fd) })
    }

    fn fd(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| Error::Usage("transport is closed".into()))
    }
}

impl DatagramTransport for UdpTransport {
    fn max_incoming(&self) -> usize {
        MAX_DATAGRAM
    }

    fn max_outgoing(&self) -> usize {
        MAX_DATAGRAM
    }

    async fn wait_read(&mut self) -> Result<()> {
        Reactor::wait_read(self.fd()?).await
    }

    async fn wait_write(&mut self) -> Result<()> {
        Reactor::wait_write(self.fd()?).await
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        sys::read(self.fd()?, buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        sys::write(self.fd()?, data)
    }

    async fn close(&mut self) -> Result<()> {
        self.fd.take();
        Ok(())
    }
}

/// Open a datagram stream to `ip:port` without a DNS lookup.
pub(crate) async fn connect_ip(ip: Ipv4Addr, port: u16) -> Result<MsgStream<UdpTransport>> {
    Ok(MsgStream::new(UdpTransport::connect_addr(ip, port).await?))
}

/// Open a datagram stream to `host:port`, resolving `host` through the DNS
/// client.
pub async fn connect(host: &str, port: u16) -> Result<MsgStream<UdpTransport>> {
    let ip = crate::dns::host_to_ip(host).await?;
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| Error::protocol(format!("resolver produced an invalid address: {ip}")))?;
    connect_ip(ip, port).await
}
