//! A zero-copy view over a raw HTTP response.

use memchr::memmem;

use crate::error::{Error, Result};

/// Borrowed slices into one received HTTP response: the status line split
/// into its parts, the header block, and the body following the blank
/// line.
#[derive(Debug)]
pub struct ResponseView<'a> {
    pub status_line: &'a str,
    pub version: &'a str,
    pub code: &'a str,
    pub reason: &'a str,
    headers: &'a str,
    pub body: &'a [u8],
}

impl<'a> ResponseView<'a> {
    /// Split `raw` at the header/body boundary and take the status line
    /// apart. Fails if the blank line never comes or the head is not
    /// text.
    pub fn parse(raw: &'a [u8]) -> Result<Self> {
        let split = memmem::find(raw, b"\r\n\r\n")
            .ok_or_else(|| Error::protocol("truncated http message"))?;
        let head = std::str::from_utf8(&raw[..split])
            .map_err(|_| Error::protocol("http head is not valid text"))?;
        let body = &raw[split + 4..];

        let (status_line, headers) = match head.split_once("\r\n") {
            Some((status, rest)) => (status, rest),
            None => (head, ""),
        };

        let (version, status) = status_line
            .split_once(' ')
            .ok_or_else(|| Error::protocol("malformed http status line"))?;
        let (code, reason) = match status.split_once(' ') {
            Some((code, reason)) => (code, reason),
            None => (status, ""),
        };

        Ok(Self {
            status_line,
            version,
            code,
            reason,
            headers,
            body,
        })
    }

    /// The value of `name`, compared case-insensitively; at most one
    /// leading space is stripped from the value.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        for line in self.headers.split("\r\n") {
            if let Some((key, value)) = line.split_once(':') {
                if key.eq_ignore_ascii_case(name) {
                    return Some(value.strip_prefix(' ').unwrap_or(value));
                }
            }
        }
        None
    }
}
