//! Plain descriptor transports and the file-open fronts.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::error::{Error, Result};
use crate::reactor::Reactor;
use crate::stream::Stream;
use crate::sys;

use super::ByteTransport;

fn closed() -> Error {
    Error::Usage("transport is closed".into())
}

/// A byte transport over one non-blocking descriptor (file or connected
/// socket). Lookahead comes from the kernel's queued-byte count.
pub struct FdTransport {
    fd: Option<OwnedFd>,
}

impl FdTransport {
    /// Wrap an owned descriptor. The descriptor must already be
    /// non-blocking.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    fn fd(&self) -> Result<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd).ok_or_else(closed)
    }
}

impl ByteTransport for FdTransport {
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

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        sys::write(self.fd()?, data)
    }

    async fn close(&mut self) -> Result<()> {
        self.fd.take();
        Ok(())
    }

    fn available_bytes(&mut self) -> Result<usize> {
        sys::available_bytes(self.fd()?)
    }
}

/// A byte transport reading from one descriptor and writing to another.
pub struct FdPairTransport {
    read_fd: Option<OwnedFd>,
    write_fd: Option<OwnedFd>,
}

impl FdPairTransport {
    pub fn new(read_fd: OwnedFd, write_fd: OwnedFd) -> Self {
        Self {
            read_fd: Some(read_fd),
            write_fd: Some(write_fd),
        }
    }

    fn read_fd(&self) -> Result<RawFd> {
        self.read_fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(closed)
    }

    fn write_fd(&self) -> Result<RawFd> {
        self.write_fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(closed)
    }
}

impl ByteTransport for FdPairTransport {
    const LOOKAHEAD: bool = true;

    async fn wait_read(&mut self) -> Result<()> {
        Reactor::wait_read(self.read_fd()?).await
    }

    async fn wait_write(&mut self) -> Result<()> {
        Reactor::wait_write(self.write_fd()?).await
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        sys::read(self.read_fd()?, buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        sys::write(self.write_fd()?, data)
    }

    async fn close(&mut self) -> Result<()> {
        self.read_fd.take();
        self.write_fd.take();
        Ok(())
    }

    fn available_bytes(&mut self) -> Result<usize> {
        sys::available_bytes(self.read_fd()?)
    }
}

/// Open `path` for reading.
pub async fn open_read(path: &str) -> Result<Stream<FdTransport>> {
    let fd = sys::open(path, libc::O_RDONLY)?;
    Ok(Stream::new(FdTransport::new(fd)))
}

/// Open `path` for writing. `create` truncates or creates the file,
/// `append` positions every write at the end.
pub async fn open_write(path: &str, append: bool, create: bool) -> Result<Stream<FdTransport>> {
    let fd = sys::open(path, write_flags(append, create))?;
    Ok(Stream::new(FdTransport::new(fd)))
}

/// Open a read path and a write path as one stream.
pub async fn open_rw(
    read_path: &str,
    write_path: &str,
    append: bool,
    create: bool,
) -> Result<Stream<FdPairTransport>> {
    let read_fd = sys::open(read_path, libc::O_RDONLY)?;
    let write_fd = sys::open(write_path, write_flags(append, create))?;
    Ok(Stream::new(FdPairTransport::new(read_fd, write_fd)))
}

fn write_flags(append: bool, create: bool) -> libc::c_int {
    let mut flags = libc::O_WRONLY;
    if append {
        flags |= libc::O_APPEND;
    }
    if create {
        flags |= libc::O_CREAT | libc::O_TRUNC;
    }
    flags
}
