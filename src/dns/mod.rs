//! DNS client: forward and reverse lookups over UDP with a thread-local
//! cache.
//!
//! Lookups consult, in order: the IPv4-literal short circuit, the cache
//! (seeded from `/etc/hosts` on first use), and finally the resolver named
//! by `/etc/resolv.conf` (falling back to `127.0.0.1`). Resolved addresses
//! stay cached for the life of the thread; there is no TTL handling.
//!
//! Everything here is plain query/response over a connected UDP socket on
//! port 53: no retransmission, no timeouts, first answer with the right id
//! wins.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::Ipv4Addr;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::stream::Stream;
use crate::transport::fd::{open_read, FdTransport};
use crate::transport::udp;

pub mod packet;

pub use packet::{
    from_a_rr, from_ptr_rr, is_a_rr, is_ptr_rr, reverse_query, standard_query, to_a_rr,
    to_ptr_rr, Flags, Packet, Question, Rcode, ResourceRecord,
};

const ETC_HOSTS: &str = "/etc/hosts";
const ETC_RESOLV_CONF: &str = "/etc/resolv.conf";
const DEFAULT_RESOLVER: &str = "127.0.0.1";

#[derive(Default)]
struct Cache {
    host_to_ip: HashMap<String, String>,
    hosts_merged: bool,
    resolver: Option<String>,
}

thread_local! {
    static CACHE: RefCell<Cache> = RefCell::new(Cache::default());
}

/// Whitespace-separated words of one line, up to a `#` comment or the end
/// of the line.
fn split_words(line: &[u8]) -> Vec<&[u8]> {
    let mut words = Vec::new();
    let mut i = 0;
    loop {
        while i < line.len() && (line[i] == b' ' || line[i] == b'\t') {
            i += 1;
        }
        if i >= line.len() || line[i] == b'#' || line[i] == b'\n' || line[i] == b'\r' {
            return words;
        }
        let start = i;
        while i < line.len()
            && !matches!(line[i], b' ' | b'\t' | b'#' | b'\n' | b'\r')
        {
            i += 1;
        }
        words.push(&line[start..i]);
    }
}

async fn for_each_line<F>(path: &str, mut f: F) -> Result<()>
where
    F: FnMut(&[u8]),
{
    let mut stream: Stream<FdTransport> = open_read(path).await?;
    let mut at_eof = false;
    while !at_eof {
        let mut line = Vec::new();
        match stream.read_until(b"\n", &mut line).await {
            Ok(()) => {}
            Err(Error::Eof) => at_eof = true,
            Err(e) => return Err(e),
        }
        if !line.is_empty() {
            f(&line);
        }
    }
    Ok(())
}

/// First `nameserver` directive of a resolv.conf-format file, lowercased;
/// `127.0.0.1` when the file is missing or names no server (what libc
/// does).
pub async fn parse_resolv_conf(path: &str) -> Result<String> {
    let mut servers: Vec<String> = Vec::new();
    let res = for_each_line(path, |line| {
        let words = split_words(line);
        if words.len() == 2 && words[0] == b"nameserver" {
            servers.push(String::from_utf8_lossy(words[1]).to_ascii_lowercase());
        }
    })
    .await;
    match res {
        Ok(()) => {}
        Err(Error::Sys { call: "open()", .. }) => {}
        Err(e) => return Err(e),
    }
    Ok(servers
        .into_iter()
        .next()
        .unwrap_or_else(|| DEFAULT_RESOLVER.to_owned()))
}

/// Name → ip mapping of a hosts-format file: the first word of each line
/// is the address, every further word a name for it (lowercased). Lines
/// without at least two words are skipped; a missing file yields an empty
/// map.
pub async fn parse_hosts(path: &str) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    let res = for_each_line(path, |line| {
        let words = split_words(line);
        if words.len() > 1 {
            let ip = String::from_utf8_lossy(words[0]).into_owned();
            for name in &words[1..] {
                let name = String::from_utf8_lossy(name).to_ascii_lowercase();
                map.entry(name).or_insert_with(|| ip.clone());
            }
        }
    })
    .await;
    match res {
        Ok(()) | Err(Error::Sys { call: "open()", .. }) => Ok(map),
        Err(e) => Err(e),
    }
}

/// Send `req` to a resolver and return the first response whose id
/// matches; responses without the response bit or with a foreign id are
/// discarded.
pub async fn query_server(server_ip: &str, port: u16, req: &Packet) -> Result<Packet> {
    let ip: Ipv4Addr = server_ip
        .parse()
        .map_err(|_| Error::protocol(format!("invalid resolver address: {server_ip}")))?;
    let mut stream = udp::connect_ip(ip, port).await?;
    stream.write(&req.to_bytes()?).await?;
    loop {
        let datagram = stream.read().await?;
        let resp = Packet::parse(&datagram)?;
        if !resp.flags.qr {
            trace!("dns: discarding non-response packet");
            continue;
        }
        if resp.id != req.id {
            trace!("dns: discarding response for foreign id {}", resp.id);
            continue;
        }
        return Ok(resp);
    }
}

/// [`query_server`] on the standard DNS port.
pub async fn query(server_ip: &str, req: &Packet) -> Result<Packet> {
    query_server(server_ip, 53, req).await
}

async fn resolver_ip() -> Result<String> {
    if let Some(ip) = CACHE.with(|c| c.borrow().resolver.clone()) {
        return Ok(ip);
    }
    let ip = parse_resolv_conf(ETC_RESOLV_CONF).await?;
    debug!("dns: using resolver {ip}");
    CACHE.with(|c| c.borrow_mut().resolver = Some(ip.clone()));
    Ok(ip)
}

/// Resolve `host` to a dotted-quad IPv4 address.
///
/// IPv4 literals are returned as given without consulting anything.
/// Otherwise the thread-local cache (seeded from `/etc/hosts` the first
/// time) is checked before a standard A query goes out; the first A answer
/// owned by the queried name wins and is cached.
pub async fn host_to_ip(host: &str) -> Result<String> {
    if host.parse::<Ipv4Addr>().is_ok() {
        return Ok(host.to_owned());
    }
    let key = host.to_ascii_lowercase();

    if !CACHE.with(|c| c.borrow().hosts_merged) {
        let parsed = parse_hosts(ETC_HOSTS).await.unwrap_or_default();
        CACHE.with(|c| {
            let mut cache = c.borrow_mut();
            for (name, ip) in parsed {
                cache.host_to_ip.entry(name).or_insert(ip);
            }
            cache.hosts_merged = true;
        });
    }

    if let Some(ip) = CACHE.with(|c| c.borrow().host_to_ip.get(&key).cloned()) {
        debug!("dns: cache hit {key} -> {ip}");
        return Ok(ip);
    }

    let server = resolver_ip().await?;
    let req = standard_query(&key);
    let resp = query(&server, &req).await?;
    resp.check_rcode()?;

    let mut addr = None;
    for ans in &resp.answers {
        if ans.rname == key && is_a_rr(ans) {
            addr = Some(from_a_rr(ans)?);
            break;
        }
    }
    let addr = addr.ok_or_else(|| Error::protocol("no valid answers in DNS response"))?;
    let ip = Ipv4Addr::from(addr).to_string();
    debug!("dns: resolved {key} -> {ip}");
    CACHE.with(|c| c.borrow_mut().host_to_ip.insert(key, ip.clone()));
    Ok(ip)
}

/// Probe the reverse mapping of a dotted-quad `ip`.
///
/// Distinguishes three outcomes: `None` when the resolver reports
/// name-error, a failure for any other non-zero response code, and `None`
/// for a successful reply as well. The PTR target of a successful reply
/// is not surfaced.
pub async fn ip_to_host(ip: &str) -> Result<Option<String>> {
    let server = resolver_ip().await?;
    ip_to_host_via(&server, 53, ip).await
}

/// [`ip_to_host`] against a specific resolver.
pub async fn ip_to_host_via(server_ip: &str, port: u16, ip: &str) -> Result<Option<String>> {
    let req = reverse_query(ip);
    let resp = query_server(server_ip, port, &req).await?;
    if resp.flags.rcode == Rcode::NAME_ERROR {
        return Ok(None);
    }
    resp.check_rcode()?;
    // TODO return the PTR target from successful replies.
    Ok(None)
}
