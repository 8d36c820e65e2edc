//! Buffered byte streams and datagram streams.
//!
//! [`Stream`] layers a FIFO read-ahead buffer and the reusable read/write
//! operations (`read_some`, `read_n`, `read_until`, `read_until_eof`,
//! `write`) over any [`ByteTransport`]. [`MsgStream`] exposes one-datagram
//! reads and writes over any [`DatagramTransport`].
//!
//! Bytes handed to readers never overlap: whatever a `read_until` pulls in
//! beyond its delimiter goes back into the buffer and is the first thing
//! the next read sees.

use log::trace;
use memchr::memmem;

use crate::error::{Error, Result};
use crate::transport::{ByteTransport, DatagramTransport};

/// Read chunk size for transports without lookahead.
const NO_LOOKAHEAD_CHUNK: usize = 1024;

/// FIFO byte queue with a dequeued-prefix offset; compacts once fully
/// drained.
#[derive(Default, Debug)]
struct QueueBuffer {
    raw: Vec<u8>,
    start: usize,
}

impl QueueBuffer {
    fn enqueue(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
    }

    /// Move up to `n` bytes into `out`; returns how many moved.
    fn dequeue(&mut self, n: usize, out: &mut Vec<u8>) -> usize {
        let buf = &self.raw[self.start..];
        let take = n.min(buf.len());
        out.extend_from_slice(&buf[..take]);
        self.start += take;
        if self.start >= self.raw.len() {
            self.raw.clear();
            self.start = 0;
        }
        take
    }

    /// Move everything into `out`; returns how many moved.
    fn dequeue_all(&mut self, out: &mut Vec<u8>) -> usize {
        let n = self.raw.len() - self.start;
        out.extend_from_slice(&self.raw[self.start..]);
        self.raw.clear();
        self.start = 0;
        n
    }

    fn is_empty(&self) -> bool {
        self.raw.len() == self.start
    }
}

/// A buffered byte stream over a [`ByteTransport`].
#[derive(Debug)]
pub struct Stream<T: ByteTransport> {
    transport: T,
    buffer: QueueBuffer,
}

impl<T: ByteTransport> Stream<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            buffer: QueueBuffer::default(),
        }
    }

    /// Deliver whatever is closest at hand: the whole read-ahead buffer if
    /// it is non-empty, otherwise one transport read once the descriptor is
    /// readable. Returns the number of bytes appended to `out`.
    ///
    /// End of stream surfaces as [`Error::Eof`] only when the buffer was
    /// empty; eof is sticky, so later reads keep failing the same way.
    pub async fn read_some(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        if !self.buffer.is_empty() {
            return Ok(self.buffer.dequeue_all(out));
        }
        self.transport.wait_read().await?;
        let chunk = if T::LOOKAHEAD {
            self.transport.available_bytes()?
        } else {
            NO_LOOKAHEAD_CHUNK
        };
        let old = out.len();
        out.resize(old + chunk, 0);
        match self.transport.read(&mut out[old..]) {
            Ok(n) => {
                out.truncate(old + n);
                Ok(n)
            }
            Err(e) => {
                out.truncate(old);
                Err(e)
            }
        }
    }

    /// Append exactly `n` bytes to `out`. On end of stream before `n`
    /// bytes, the partial data stays appended and [`Error::Eof`] is
    /// returned.
    pub async fn read_n(&mut self, n: usize, out: &mut Vec<u8>) -> Result<()> {
        let mut left = n - self.buffer.dequeue(n, out);
        let total = out.len() + left;
        out.resize(total, 0);
        while left > 0 {
            if let Err(e) = self.transport.wait_read().await {
                out.truncate(total - left);
                return Err(e);
            }
            let start = total - left;
            match self.transport.read(&mut out[start..]) {
                Ok(n_read) => left -= n_read,
                Err(e) => {
                    out.truncate(total - left);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Append everything up to end of stream to `out`. The eof itself is
    /// swallowed; the stream stays at eof afterwards.
    pub async fn read_until_eof(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.buffer.dequeue_all(out);
        loop {
            match self.read_some(out).await {
                Ok(_) => {}
                Err(Error::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Append bytes to `out` up to and including the first occurrence of
    /// `delim`; whatever arrived beyond the delimiter goes back into the
    /// buffer for the next read.
    ///
    /// Each round only scans the newly read tail plus `|delim| - 1` bytes
    /// of overlap, so delimiters straddling two reads are found without
    /// rescanning.
    pub async fn read_until(&mut self, delim: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if delim.is_empty() {
            return Err(Error::Usage("read_until with an empty delimiter".into()));
        }
        loop {
            let n_read = self.read_some(out).await?;
            let window = (n_read + delim.len() - 1).min(out.len());
            let start = out.len() - window;
            if let Some(pos) = memmem::find(&out[start..], delim) {
                let end = start + pos + delim.len();
                self.buffer.enqueue(&out[end..]);
                out.truncate(end);
                trace!("read_until: hit after {} bytes", out.len());
                return Ok(());
            }
        }
    }

    /// Write all of `data`, waiting for writability whenever the transport
    /// stops accepting bytes, then flush the transport.
    pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        let n = self.transport.write(data)?;
        data = &data[n..];
        while !data.is_empty() {
            self.transport.wait_write().await?;
            let n = self.transport.write(data)?;
            data = &data[n..];
        }
        self.transport.flush().await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    /// The wrapped transport.
    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// A datagram stream over a [`DatagramTransport`]. No buffering across
/// calls; each operation maps to at most one datagram.
pub struct MsgStream<T: DatagramTransport> {
    transport: T,
}

impl<T: DatagramTransport> MsgStream<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Receive one datagram.
    pub async fn read(&mut self) -> Result<Vec<u8>> {
        self.transport.wait_read().await?;
        let mut buf = vec![0; self.transport.max_incoming()];
        let n = self.transport.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Send one datagram. Payloads over the transport's outgoing maximum
    /// fail locally without touching the descriptor.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.transport.max_outgoing() {
            return Err(Error::Usage(format!(
                "datagram of {} bytes exceeds the {}-byte maximum",
                data.len(),
                self.transport.max_outgoing()
            )));
        }
        self.transport.wait_write().await?;
        let n = self.transport.write(data)?;
        assert_eq!(n, data.len(), "datagram transport accepted a partial packet");
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}
