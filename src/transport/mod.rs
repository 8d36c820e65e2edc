//! Transport capability traits.
//!
//! A transport is the lowest-level byte (or datagram) source/sink: it knows
//! how to wait for readiness on its descriptor(s) and how to perform one
//! non-blocking read or write. Everything above it (buffering, delimiter
//! scanning, write-all loops) lives in [`crate::stream`] and is generic
//! over these traits, so a TLS session, a file and a TCP socket all share
//! the same stream operations.
//!
//! The non-blocking convention follows the syscall façade: `read`/`write`
//! return `Ok(0)` for would-block and [`crate::Error::Eof`] once the stream
//! has ended (end of stream is sticky).

use std::future::Future;

use crate::error::Result;

pub mod fd;
pub mod tcp;
pub mod tls;
pub mod udp;

/// A stream-oriented transport.
pub trait ByteTransport {
    /// Whether [`ByteTransport::available_bytes`] reports a meaningful
    /// count. Transports without lookahead are read in fixed-size chunks.
    const LOOKAHEAD: bool = false;

    /// Resolve when the read side is ready.
    fn wait_read(&mut self) -> impl Future<Output = Result<()>>;

    /// Resolve when the write side is ready.
    fn wait_write(&mut self) -> impl Future<Output = Result<()>>;

    /// One non-blocking read into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// One non-blocking write of a prefix of `data`.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Push any transport-level buffering towards the peer.
    fn flush(&mut self) -> impl Future<Output = Result<()>> {
        async { Ok(()) }
    }

    /// Release the underlying descriptor(s).
    fn close(&mut self) -> impl Future<Output = Result<()>>;

    /// Bytes that can be read without blocking. Only meaningful when
    /// [`ByteTransport::LOOKAHEAD`] is set.
    fn available_bytes(&mut self) -> Result<usize> {
        Ok(0)
    }
}

/// A message-oriented transport. One read or write corresponds to exactly
/// one datagram.
pub trait DatagramTransport {
    /// Largest datagram a read can produce.
    fn max_incoming(&self) -> usize;

    /// Largest payload a write may carry.
    fn max_outgoing(&self) -> usize;

    fn wait_read(&mut self) -> impl Future<Output = Result<()>>;

    fn wait_write(&mut self) -> impl Future<Output = Result<()>>;

    /// Receive one datagram into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Send one datagram.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    fn close(&mut self) -> impl Future<Output = Result<()>>;
}
