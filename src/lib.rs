//! # `rivulet`: single-threaded cooperative async I/O for Linux
//!
//! This crate implements a small asynchronous I/O library around one
//! `poll(2)` event loop. Application code is written as ordinary `async fn`s
//! over buffered [streams](stream) and datagram streams; whenever an
//! operation would block, its future parks itself in a thread-local
//! [reactor] and the driver loop resumes exactly the computations whose
//! descriptors became ready. Everything runs on the calling thread: there
//! is no work stealing, no synchronization, and no cancellation.
//!
//! The transport stack is pluggable: files, file pairs, TCP and UDP
//! sockets, and a TLS 1.2 session over any of them all expose the same
//! capability set, so the stream operations compose with each of them.
//! Name resolution is built in ([dns]), including `/etc/hosts` and
//! `/etc/resolv.conf` handling with a thread-local cache, and [`slurp`]
//! ties the pieces together behind one URI-shaped front door.
//!
//! ## Example
//!
//! Two timers running concurrently on one thread:
//!
//! ```
//! use rivulet::task::Executor;
//! use rivulet::sleep;
//! use std::time::Duration;
//!
//! Executor::block_on(async {
//!     rivulet::gather_void!(
//!         sleep(Duration::from_millis(20)),
//!         sleep(Duration::from_millis(30)),
//!     )
//!     .await
//! })
//! .unwrap();
//! ```
//!
//! Fetching a URL, redirects and TLS included:
//!
//! ```no_run
//! use rivulet::task::Executor;
//!
//! let body = Executor::block_on(rivulet::slurp("https://example.com/")).unwrap();
//! ```

pub mod dns;
pub mod error;
pub mod http;
pub mod pem;
pub(crate) mod reactor;
pub mod slurp;
pub mod stream;
pub(crate) mod sys;
pub mod task;
pub mod timer;
pub mod transport;

pub use error::{Error, Result};
pub use slurp::slurp;
pub use stream::{MsgStream, Stream};
pub use task::{zip, Executor};
pub use timer::sleep;
pub use transport::fd::{open_read, open_rw, open_write};
pub use transport::{tcp, tls, udp};
