//! The crate-wide failure type.
//!
//! Every fallible operation in this crate returns [`Result`]. Failures are
//! plain values that unwind through `.await` points; the reactor itself
//! never observes them.

use nix::errno::Errno;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The peer is gone: a read observed end of stream, a write hit a
    /// broken pipe, or a TLS session closed cleanly. Sticky; retrying the
    /// operation fails the same way.
    #[error("end of stream")]
    Eof,

    /// An OS call failed with an errno other than would-block.
    #[error("{call} failed: {errno}")]
    Sys { call: &'static str, errno: Errno },

    /// Malformed data on the wire or in a consumed file.
    #[error("{0}")]
    Protocol(String),

    /// The TLS engine refused to continue.
    #[error("{0}")]
    Tls(String),

    /// The caller broke an API contract.
    #[error("{0}")]
    Usage(String),

    /// A DNS server answered with a non-zero response code.
    #[error("DNS server error: {0}")]
    Rcode(&'static str),

    /// An HTTP server answered with a status this client does not handle.
    #[error("server returned error status ({0})")]
    Status(u16),

    #[error("http redirect recursion too deep")]
    RedirectLoop,
}

impl Error {
    /// Wrap the current `errno` under the name of the failing call.
    pub(crate) fn last_sys(call: &'static str) -> Error {
        Error::Sys {
            call,
            errno: Errno::last(),
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Error {
        Error::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_call_name() {
        let err = Error::Sys {
            call: "connect()",
            errno: Errno::ECONNREFUSED,
        };
        assert!(err.to_string().starts_with("connect() failed"));
    }

    #[test]
    fn rcode_message() {
        assert_eq!(
            Error::Rcode("Name error").to_string(),
            "DNS server error: Name error"
        );
    }
}
