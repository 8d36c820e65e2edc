//! URI-addressable reads.
//!
//! [`slurp`] fetches the whole contents behind a URI: plain paths and
//! `file://` open the file, `http://` and `https://` speak HTTP/1.0 (which
//! keeps replies un-chunked) and follow redirects up to a fixed depth.

use std::future::Future;
use std::pin::Pin;

use log::debug;

use crate::error::{Error, Result};
use crate::http::ResponseView;
use crate::stream::Stream;
use crate::transport::fd::open_read;
use crate::transport::{tcp, tls, ByteTransport};

const MAX_REDIRECTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct UriParts {
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
}

/// Split a URI into scheme, host, port and path. Anything without an
/// alphanumeric scheme before `://` is a bare path.
fn parse_uri(uri: &str) -> Result<UriParts> {
    let Some(scheme_end) = uri.find("://") else {
        return Ok(UriParts {
            path: Some(uri.to_owned()),
            ..UriParts::default()
        });
    };
    let scheme = &uri[..scheme_end];
    if !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
        // `://` buried in an ordinary path.
        return Ok(UriParts {
            path: Some(uri.to_owned()),
            ..UriParts::default()
        });
    }
    let rest = &uri[scheme_end + 3..];
    let host_end = rest.find('/').unwrap_or(rest.len());
    let (host_port, path) = rest.split_at(host_end);
    let (host, port) = match host_port.split_once(':') {
        Some((host, port)) => {
            if port.len() > 5 {
                return Err(Error::protocol("invalid uri port"));
            }
            let port: u16 = port
                .parse()
                .map_err(|_| Error::protocol("invalid uri port"))?;
            (host, Some(port))
        }
        None => (host_port, None),
    };
    Ok(UriParts {
        scheme: Some(scheme.to_owned()),
        host: Some(host.to_owned()),
        port,
        path: (!path.is_empty()).then(|| path.to_owned()),
    })
}

/// Issue the GET and interpret the response; 3xx recurses through
/// [`fetch_http`].
async fn fetch_over<T: ByteTransport>(
    mut stream: Stream<T>,
    parts: &UriParts,
    level: usize,
) -> Result<Vec<u8>> {
    let host = parts
        .host
        .as_deref()
        .ok_or_else(|| Error::protocol("uri has no host"))?;
    let path = parts.path.as_deref().unwrap_or("/");
    let request = format!("GET {path} HTTP/1.0\r\nHost: {host}\r\n\r\n");
    stream.write(request.as_bytes()).await?;

    let mut raw = Vec::new();
    stream.read_until_eof(&mut raw).await?;
    let resp = ResponseView::parse(&raw)?;
    if resp.code.len() != 3 || !resp.code.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::protocol("server returned malformed status"));
    }

    if resp.code == "200" {
        Ok(resp.body.to_vec())
    } else if resp.code.starts_with("30") {
        let location = resp
            .header("Location")
            .ok_or_else(|| Error::protocol("redirect without a Location header"))?;
        debug!("slurp: following redirect to {location}");
        let next = parse_uri(location)?;
        fetch_http(next, level + 1).await
    } else {
        let code = resp
            .code
            .parse()
            .map_err(|_| Error::protocol("server returned malformed status"))?;
        Err(Error::Status(code))
    }
}

/// Boxed so redirects can recurse.
fn fetch_http(
    parts: UriParts,
    level: usize,
) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>>>> {
    Box::pin(async move {
        if level >= MAX_REDIRECTS {
            return Err(Error::RedirectLoop);
        }
        let host = parts
            .host
            .clone()
            .ok_or_else(|| Error::protocol("uri has no host"))?;
        if parts.scheme.as_deref() == Some("https") {
            let stream = tls::connect(&host, parts.port.unwrap_or(443), None).await?;
            fetch_over(stream, &parts, level).await
        } else {
            let stream = tcp::connect(&host, parts.port.unwrap_or(80)).await?;
            fetch_over(stream, &parts, level).await
        }
    })
}

/// Fetch everything behind `uri`.
pub async fn slurp(uri: &str) -> Result<Vec<u8>> {
    let parts = parse_uri(uri)?;
    match parts.scheme.as_deref() {
        Some("http") | Some("https") => fetch_http(parts, 0).await,
        None | Some("") | Some("file") => {
            let path = parts
                .path
                .as_deref()
                .ok_or_else(|| Error::protocol("uri has no path"))?;
            let mut stream = open_read(path).await?;
            let mut out = Vec::new();
            stream.read_until_eof(&mut out).await?;
            Ok(out)
        }
        Some(_) => Err(Error::protocol("slurp protocol not supported")),
    }
}
