//! TLS client transport.
//!
//! Wraps any byte transport in a TLS 1.2 session driven by a rustls
//! [`ClientConnection`]. The adapter exposes the same transport capability
//! set as everything else, so a [`crate::stream::Stream`] over it behaves
//! exactly like one over a bare socket.
//!
//! The record engine is observable as a four-bit readiness mask
//! ([`EngineState`]); every loop iteration does one bit of work (push
//! pending records, feed the engine ciphertext, or suspend on the wrapped
//! transport) until the wanted application-level state is reached. The
//! handshake needs no special casing: the first wait on a fresh session
//! walks the same loops through hello/key-exchange/finished.

use std::io;
use std::sync::Arc;

use async_lock::OnceCell;
use bitflags::bitflags;
use log::{debug, trace};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{CertificateError, ClientConnection, RootCertStore};

use crate::error::{Error, Result};
use crate::pem;
use crate::stream::Stream;
use crate::transport::fd::open_read;
use crate::transport::tcp::{self, TcpTransport};

use super::ByteTransport;

bitflags! {
    /// Readiness mask of the record engine. At least one bit is set while
    /// the session is open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EngineState: u8 {
        /// The engine accepts application bytes for encryption.
        const SEND_APP = 1 << 0;
        /// Decrypted application bytes are ready to be taken out.
        const RECV_APP = 1 << 1;
        /// Encrypted records are waiting to be pushed to the transport.
        const SEND_REC = 1 << 2;
        /// The engine wants ciphertext from the transport.
        const RECV_REC = 1 << 3;
    }
}

fn translate(err: rustls::Error) -> Error {
    match err {
        rustls::Error::InvalidCertificate(CertificateError::Expired) => {
            Error::Tls("server certificate expired".into())
        }
        rustls::Error::InvalidCertificate(_) => {
            Error::Tls("server certificate not trusted".into())
        }
        rustls::Error::PeerIncompatible(_) => {
            Error::Tls("server tls version unsupported".into())
        }
        other => Error::Tls(format!("record-layer error ({other})")),
    }
}

/// Presents the transport's read side as `io::Read` for the record
/// engine: would-block surfaces as `WouldBlock`, transport eof as a clean
/// zero-byte read, and any other failure is parked in `err` for the
/// caller.
struct RecordSource<'a, T: ByteTransport> {
    transport: &'a mut T,
    err: Option<Error>,
}

impl<T: ByteTransport> io::Read for RecordSource<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.transport.read(buf) {
            Ok(0) => Err(io::ErrorKind::WouldBlock.into()),
            Ok(n) => Ok(n),
            Err(Error::Eof) => Ok(0),
            Err(e) => {
                self.err = Some(e);
                Err(io::Error::other("transport failure"))
            }
        }
    }
}

/// The write-side counterpart of [`RecordSource`].
struct RecordSink<'a, T: ByteTransport> {
    transport: &'a mut T,
    err: Option<Error>,
}

impl<T: ByteTransport> io::Write for RecordSink<'_, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.transport.write(buf) {
            Ok(0) => Err(io::ErrorKind::WouldBlock.into()),
            Ok(n) => Ok(n),
            Err(e) => {
                self.err = Some(e);
                Err(io::Error::other("transport failure"))
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A TLS 1.2 client session over `T`.
pub struct TlsTransport<T: ByteTransport> {
    // Boxed so the engine's address survives moves of the adapter.
    conn: Box<ClientConnection>,
    transport: T,
    /// Decrypted bytes currently sitting in the engine.
    plain_in: usize,
    /// The peer's record stream has ended.
    peer_closed: bool,
    /// The session is finished; sticky.
    eof: bool,
}

impl<T: ByteTransport> TlsTransport<T> {
    /// Configure a session for `host` (used for SNI and certificate
    /// validation) against the given trust anchors, wrapping `transport`.
    pub fn new(host: &str, roots: Arc<RootCertStore>, transport: T) -> Result<Self> {
        let config = rustls::ClientConfig::builder_with_protocol_versions(&[
            &rustls::version::TLS12,
        ])
        .with_root_certificates(roots)
        .with_no_client_auth();
        let name = ServerName::try_from(host.to_owned())
            .map_err(|_| Error::Tls(format!("invalid server name: {host}")))?;
        let conn =
            ClientConnection::new(Arc::new(config), name).map_err(translate)?;
        debug!("tls: session configured for {host}");
        Ok(Self {
            conn: Box::new(conn),
            transport,
            plain_in: 0,
            peer_closed: false,
            eof: false,
        })
    }

    /// The engine's current readiness mask.
    pub fn state(&self) -> EngineState {
        let mut st = EngineState::empty();
        if !self.conn.is_handshaking() && !self.eof {
            st |= EngineState::SEND_APP;
        }
        if self.plain_in > 0 {
            st |= EngineState::RECV_APP;
        }
        if self.conn.wants_write() {
            st |= EngineState::SEND_REC;
        }
        if self.conn.wants_read() && !self.peer_closed {
            st |= EngineState::RECV_REC;
        }
        st
    }

    fn check_open(&self) -> Result<()> {
        if self.eof {
            return Err(Error::Eof);
        }
        Ok(())
    }

    /// Let the engine digest whatever ciphertext it just received.
    fn process(&mut self) -> Result<()> {
        let state = self.conn.process_new_packets().map_err(|e| {
            self.eof = true;
            translate(e)
        })?;
        self.plain_in = state.plaintext_bytes_to_read();
        if state.peer_has_closed() {
            self.peer_closed = true;
        }
        Ok(())
    }

    /// One non-blocking pull of ciphertext from the transport into the
    /// engine.
    fn read_records(&mut self) -> Result<()> {
        if !self.conn.wants_read() {
            return Ok(());
        }
        let mut source = RecordSource {
            transport: &mut self.transport,
            err: None,
        };
        match self.conn.read_tls(&mut source) {
            Ok(0) => self.peer_closed = true,
            Ok(n) => trace!("tls: took {n} record bytes"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => {
                return Err(source
                    .err
                    .take()
                    .unwrap_or_else(|| Error::Tls(format!("record-layer error ({e})"))))
            }
        }
        self.process()
    }

    /// One non-blocking push of pending records to the transport; true if
    /// anything moved.
    fn write_records(&mut self) -> Result<bool> {
        if !self.conn.wants_write() {
            return Ok(false);
        }
        let mut sink = RecordSink {
            transport: &mut self.transport,
            err: None,
        };
        match self.conn.write_tls(&mut sink) {
            Ok(n) => {
                trace!("tls: pushed {n} record bytes");
                Ok(n > 0)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(sink
                .err
                .take()
                .unwrap_or_else(|| Error::Tls(format!("record-layer error ({e})")))),
        }
    }

    /// The record flush loop: push pending records until the engine has
    /// none left, then flush the transport once.
    async fn flush_records(&mut self) -> Result<()> {
        let mut wrote = false;
        while self.conn.wants_write() {
            self.transport.wait_write().await?;
            wrote |= self.write_records()?;
        }
        if wrote {
            self.transport.flush().await?;
        }
        Ok(())
    }

    /// Fail with a sticky eof if the peer is gone and nothing decrypted
    /// remains.
    fn ended(&mut self) -> Result<()> {
        if self.peer_closed && self.plain_in == 0 {
            self.eof = true;
            return Err(Error::Eof);
        }
        Ok(())
    }
}

impl<T: ByteTransport> ByteTransport for TlsTransport<T> {
    const LOOKAHEAD: bool = true;

    /// Loop until decrypted bytes are available, pushing pending records
    /// out first and feeding the engine from the transport otherwise.
    async fn wait_read(&mut self) -> Result<()> {
        loop {
            self.check_open()?;
            let st = self.state();
            if st.contains(EngineState::RECV_APP) {
                return Ok(());
            }
            self.ended()?;
            if st.contains(EngineState::SEND_REC) {
                self.flush_records().await?;
            } else if st.contains(EngineState::RECV_REC) {
                self.transport.wait_read().await?;
                self.read_records()?;
            } else {
                return Err(Error::Tls("record engine stalled".into()));
            }
        }
    }

    /// Loop until the engine accepts application bytes. On a fresh
    /// session this is what drives the whole handshake.
    async fn wait_write(&mut self) -> Result<()> {
        loop {
            self.check_open()?;
            let st = self.state();
            if st.contains(EngineState::SEND_APP) {
                // Drain pending records too, so a saturated write buffer
                // frees up and the caller's next write makes progress.
                if st.contains(EngineState::SEND_REC) {
                    self.flush_records().await?;
                }
                return Ok(());
            }
            self.ended()?;
            if st.contains(EngineState::SEND_REC) {
                self.flush_records().await?;
            } else if st.contains(EngineState::RECV_REC) {
                self.transport.wait_read().await?;
                self.read_records()?;
            } else {
                return Err(Error::Tls("record engine stalled".into()));
            }
        }
    }

    /// Copy decrypted bytes out of the engine; zero when none are ready.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.check_open()?;
        self.read_records()?;
        if self.plain_in == 0 {
            if self.peer_closed {
                self.eof = true;
                return Err(Error::Eof);
            }
            return Ok(0);
        }
        match io::Read::read(&mut self.conn.reader(), buf) {
            Ok(0) => {
                self.eof = true;
                Err(Error::Eof)
            }
            Ok(n) => {
                self.plain_in = self.plain_in.saturating_sub(n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(_) => {
                self.eof = true;
                Err(Error::Eof)
            }
        }
    }

    /// Hand application bytes to the engine; zero while the handshake is
    /// still running.
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.check_open()?;
        self.write_records()?;
        if self.conn.is_handshaking() {
            return Ok(0);
        }
        io::Write::write(&mut self.conn.writer(), data)
            .map_err(|e| Error::Tls(format!("record-layer error ({e})")))
    }

    /// Drive the engine until everything handed to it is on the wire.
    async fn flush(&mut self) -> Result<()> {
        loop {
            if self.eof {
                return Ok(());
            }
            let st = self.state();
            if st.contains(EngineState::SEND_REC) {
                self.flush_records().await?;
            } else if st.contains(EngineState::SEND_APP) || self.peer_closed {
                return Ok(());
            } else if st.contains(EngineState::RECV_REC) {
                self.transport.wait_read().await?;
                self.read_records()?;
            } else {
                return Err(Error::Tls("record engine stalled".into()));
            }
        }
    }

    /// Send the closing alert, drain the engine, then close the wrapped
    /// transport.
    async fn close(&mut self) -> Result<()> {
        if !self.eof {
            self.conn.send_close_notify();
            self.flush_records().await?;
            self.eof = true;
        }
        self.transport.close().await
    }

    /// Decrypted bytes ready to be read without suspending.
    fn available_bytes(&mut self) -> Result<usize> {
        Ok(self.plain_in)
    }
}

/// Build a trust-anchor store from a PEM bundle. A certificate that fails
/// to decode is fatal.
pub fn root_store_from_pem(pem_data: &[u8]) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for der in pem::parse_certs(pem_data)? {
        store
            .add(CertificateDer::from(der))
            .map_err(|e| Error::Tls(format!("certificate decoding failed ({e})")))?;
    }
    Ok(store)
}

const DEFAULT_CERT_PATHS: [&str; 2] = ["/etc/ssl/cert.pem", "/etc/ssl/certs.pem"];

async fn read_default_certs() -> Result<Vec<u8>> {
    let path = DEFAULT_CERT_PATHS
        .iter()
        .find(|p| std::path::Path::new(p).exists())
        .ok_or_else(|| Error::Tls("could not find default certificates".into()))?;
    let mut stream = open_read(path).await?;
    let mut pem_data = Vec::new();
    stream.read_until_eof(&mut pem_data).await?;
    if pem_data.last() != Some(&b'\n') {
        pem_data.push(b'\n');
    }
    Ok(pem_data)
}

static DEFAULT_ROOTS: OnceCell<Arc<RootCertStore>> = OnceCell::new();

/// The process-wide trust anchors, read lazily from the first existing of
/// `/etc/ssl/cert.pem` and `/etc/ssl/certs.pem`.
pub async fn default_root_store() -> Result<Arc<RootCertStore>> {
    DEFAULT_ROOTS
        .get_or_try_init(|| async {
            let pem_data = read_default_certs().await?;
            let store = root_store_from_pem(&pem_data)?;
            debug!("tls: loaded {} default trust anchors", store.len());
            Ok(Arc::new(store))
        })
        .await
        .map(Arc::clone)
}

/// Connect to `host:port` and complete a TLS handshake.
///
/// `certs` may carry a PEM bundle to trust instead of the system default
/// anchors.
pub async fn connect(
    host: &str,
    port: u16,
    certs: Option<&[u8]>,
) -> Result<Stream<TlsTransport<TcpTransport>>> {
    let roots = match certs {
        Some(pem_data) => Arc::new(root_store_from_pem(pem_data)?),
        None => default_root_store().await?,
    };
    let tcp = tcp::connect_transport(host, port).await?;
    let mut tls = TlsTransport::new(host, roots, tcp)?;
    // Complete the handshake.
    tls.wait_write().await?;
    Ok(Stream::new(tls))
}
