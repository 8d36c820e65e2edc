//! DNS packet codec (RFC 1035).
//!
//! Strict bitwise serializer and parser for the 12-byte header, the four
//! sections, and length-prefixed label names with pointer compression.
//! The parser is defensive about adversarial input: pointers must land
//! inside the packet, compression chains are capped at 16 levels and a
//! name at 32 label iterations; label lengths are 6 bits by construction.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub rname: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

pub const OPCODE_QUERY: u8 = 0;
pub const OPCODE_IQUERY: u8 = 1;
pub const OPCODE_STATUS: u8 = 2;

/// A response code, kept raw so reserved values survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rcode(pub u8);

impl Rcode {
    pub const NO_ERROR: Rcode = Rcode(0);
    pub const FORMAT_ERROR: Rcode = Rcode(1);
    pub const SERVER_FAILURE: Rcode = Rcode(2);
    pub const NAME_ERROR: Rcode = Rcode(3);
    pub const NOT_IMPLEMENTED: Rcode = Rcode(4);
    pub const REFUSED: Rcode = Rcode(5);

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "No error",
            1 => "Format error",
            2 => "Server failure",
            3 => "Name error",
            4 => "Not implemented",
            5 => "Refused",
            _ => "Reserved",
        }
    }
}

/// The 16-bit flags word, split into its named fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: Rcode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u16,
    pub flags: Flags,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Packet {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut s = Serializer::default();
        s.push_packet(self)?;
        Ok(s.buf)
    }

    pub fn parse(bytes: &[u8]) -> Result<Packet> {
        Parser::new(bytes).packet()
    }

    /// Fail with the textual rcode name unless the server reported
    /// success.
    pub fn check_rcode(&self) -> Result<()> {
        if self.flags.rcode != Rcode::NO_ERROR {
            return Err(Error::Rcode(self.flags.rcode.name()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    fn push_byte(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn push_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    fn push_word(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn push_dword(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn push_label(&mut self, v: &[u8]) -> Result<()> {
        // https://www.rfc-editor.org/rfc/rfc1035#section-2.3.4
        if v.len() > 63 {
            return Err(Error::protocol("bad domain name"));
        }
        self.push_byte(v.len() as u8);
        self.push_bytes(v);
        Ok(())
    }

    fn push_name(&mut self, v: &str) -> Result<()> {
        let v = v.as_bytes();
        let mut i0 = 0;
        while i0 < v.len() {
            let i1 = v[i0..]
                .iter()
                .position(|&b| b == b'.')
                .map_or(v.len(), |p| i0 + p);
            self.push_label(&v[i0..i1])?;
            i0 = i1 + 1;
        }
        self.push_byte(0);
        Ok(())
    }

    fn push_question(&mut self, v: &Question) -> Result<()> {
        self.push_name(&v.qname)?;
        self.push_word(v.qtype);
        self.push_word(v.qclass);
        Ok(())
    }

    fn push_resource_record(&mut self, v: &ResourceRecord) -> Result<()> {
        self.push_name(&v.rname)?;
        self.push_word(v.rtype);
        self.push_word(v.rclass);
        self.push_dword(v.ttl);
        self.push_word(v.rdata.len() as u16);
        self.push_bytes(&v.rdata);
        Ok(())
    }

    fn push_flags(&mut self, v: &Flags) {
        let mut w = 0u16;
        w |= (v.qr as u16) << 15;
        w |= ((v.opcode & 0b1111) as u16) << 11;
        w |= (v.aa as u16) << 10;
        w |= (v.tc as u16) << 9;
        w |= (v.rd as u16) << 8;
        w |= (v.ra as u16) << 7;
        w |= ((v.z & 0b111) as u16) << 4;
        w |= (v.rcode.0 & 0b1111) as u16;
        self.push_word(w);
    }

    fn push_packet(&mut self, packet: &Packet) -> Result<()> {
        self.push_word(packet.id);
        self.push_flags(&packet.flags);
        self.push_word(packet.questions.len() as u16);
        self.push_word(packet.answers.len() as u16);
        self.push_word(packet.authority.len() as u16);
        self.push_word(packet.additional.len() as u16);
        for q in &packet.questions {
            self.push_question(q)?;
        }
        for rr in packet
            .answers
            .iter()
            .chain(&packet.authority)
            .chain(&packet.additional)
        {
            self.push_resource_record(rr)?;
        }
        Ok(())
    }
}

struct Parser<'a> {
    cur: &'a [u8],
    full: &'a [u8],
}

impl<'a> Parser<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { cur: buf, full: buf }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.cur.len() {
            return Err(Error::protocol("unexpected DNS response end"));
        }
        let (head, tail) = self.cur.split_at(len);
        self.cur = tail;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn word(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn dword(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn label(&mut self) -> Result<&'a [u8]> {
        let len = (self.byte()? & 0b0011_1111) as usize;
        self.take(len)
    }

    fn name(&mut self, level: usize) -> Result<String> {
        if level > 16 {
            return Err(Error::protocol(
                "recursion too deep in DNS response domain name",
            ));
        }
        let mut ret = String::new();
        for _ in 0..32 {
            let next = *self
                .cur
                .first()
                .ok_or_else(|| Error::protocol("unexpected DNS response end"))?;
            if next == 0 {
                self.byte()?;
                if ret.ends_with('.') {
                    ret.pop();
                }
                return Ok(ret);
            } else if next & 0b1100_0000 == 0b1100_0000 {
                let offset = (self.word()? & 0b0011_1111_1111_1111) as usize;
                if offset >= self.full.len() {
                    return Err(Error::protocol(
                        "invalid pointer in DNS response domain name",
                    ));
                }
                let mut target = Parser {
                    cur: &self.full[offset..],
                    full: self.full,
                };
                ret.push_str(&target.name(level + 1)?);
                return Ok(ret);
            } else {
                let label = self.label()?;
                ret.push_str(&String::from_utf8_lossy(label));
                ret.push('.');
            }
        }
        Err(Error::protocol("record name too long in DNS response"))
    }

    fn question(&mut self) -> Result<Question> {
        Ok(Question {
            qname: self.name(0)?,
            qtype: self.word()?,
            qclass: self.word()?,
        })
    }

    fn resource_record(&mut self) -> Result<ResourceRecord> {
        let rname = self.name(0)?;
        let rtype = self.word()?;
        let rclass = self.word()?;
        let ttl = self.dword()?;
        let rdata_len = self.word()? as usize;
        Ok(ResourceRecord {
            rname,
            rtype,
            rclass,
            ttl,
            rdata: self.take(rdata_len)?.to_vec(),
        })
    }

    fn flags(&mut self) -> Result<Flags> {
        let w = self.word()?;
        Ok(Flags {
            qr: (w >> 15) & 1 == 1,
            opcode: ((w >> 11) & 0b1111) as u8,
            aa: (w >> 10) & 1 == 1,
            tc: (w >> 9) & 1 == 1,
            rd: (w >> 8) & 1 == 1,
            ra: (w >> 7) & 1 == 1,
            z: ((w >> 4) & 0b111) as u8,
            rcode: Rcode((w & 0b1111) as u8),
        })
    }

    fn packet(&mut self) -> Result<Packet> {
        let id = self.word()?;
        let flags = self.flags()?;
        let n_questions = self.word()?;
        let n_answers = self.word()?;
        let n_authority = self.word()?;
        let n_additional = self.word()?;
        let mut packet = Packet {
            id,
            flags,
            questions: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        };
        for _ in 0..n_questions {
            packet.questions.push(self.question()?);
        }
        for _ in 0..n_answers {
            packet.answers.push(self.resource_record()?);
        }
        for _ in 0..n_authority {
            packet.authority.push(self.resource_record()?);
        }
        for _ in 0..n_additional {
            packet.additional.push(self.resource_record()?);
        }
        Ok(packet)
    }
}

/// A recursion-desired query with one IN question and a random id.
pub fn standard_question(question: Question) -> Packet {
    Packet {
        id: rand::random(),
        flags: Flags {
            qr: false,
            opcode: OPCODE_QUERY,
            aa: false,
            tc: false,
            rd: true,
            ra: false,
            z: 0,
            rcode: Rcode::NO_ERROR,
        },
        questions: vec![question],
        answers: Vec::new(),
        authority: Vec::new(),
        additional: Vec::new(),
    }
}

/// An IN/A query for `host`.
pub fn standard_query(host: &str) -> Packet {
    standard_question(Question {
        qname: host.to_owned(),
        qtype: 1, // Type: A
        qclass: 1, // Class: IN
    })
}

/// An IN/PTR query for the reverse name of a dotted-quad `ip`.
pub fn reverse_query(ip: &str) -> Packet {
    standard_question(Question {
        qname: ip_to_inaddr_arpa(ip),
        qtype: 12, // Type: PTR
        qclass: 1, // Class: IN
    })
}

/// `a.b.c.d` → `d.c.b.a.in-addr.arpa`.
fn ip_to_inaddr_arpa(ip: &str) -> String {
    let mut host = String::new();
    for part in ip.rsplit('.') {
        host.push_str(part);
        host.push('.');
    }
    host.push_str("in-addr.arpa");
    host
}

pub fn is_a_rr(rr: &ResourceRecord) -> bool {
    rr.rtype == 1 && rr.rclass == 1
}

/// The IPv4 address of an A record, in host byte order.
pub fn from_a_rr(rr: &ResourceRecord) -> Result<u32> {
    Parser::new(&rr.rdata).dword()
}

pub fn to_a_rr(ip: u32) -> Vec<u8> {
    ip.to_be_bytes().to_vec()
}

pub fn is_ptr_rr(rr: &ResourceRecord) -> bool {
    rr.rtype == 12 && rr.rclass == 1
}

/// The target name of a PTR record.
pub fn from_ptr_rr(rr: &ResourceRecord) -> Result<String> {
    Parser::new(&rr.rdata).name(0)
}

pub fn to_ptr_rr(host: &str) -> Result<Vec<u8>> {
    let mut s = Serializer::default();
    s.push_name(host)?;
    Ok(s.buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn standard_query_wire_format() {
        let packet = standard_query("example.com");
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), 29);
        // Header: one question, recursion desired.
        assert_eq!(&bytes[2..12], &[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
        // Question: 7"example" 3"com" 0, qtype A, qclass IN.
        assert_eq!(&bytes[12..25], b"\x07example\x03com\x00");
        assert_eq!(&bytes[25..29], &[0, 1, 0, 1]);
    }

    fn a_response(id: u16, owner: &str, ip: u32) -> Packet {
        Packet {
            id,
            flags: Flags {
                qr: true,
                opcode: OPCODE_QUERY,
                aa: false,
                tc: false,
                rd: true,
                ra: true,
                z: 0,
                rcode: Rcode::NO_ERROR,
            },
            questions: vec![Question {
                qname: owner.to_owned(),
                qtype: 1,
                qclass: 1,
            }],
            answers: vec![ResourceRecord {
                rname: owner.to_owned(),
                rtype: 1,
                rclass: 1,
                ttl: 300,
                rdata: to_a_rr(ip),
            }],
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    #[test]
    fn a_record_extraction() {
        let resp = a_response(7, "example.com", 0x5DB8D822);
        let parsed = Packet::parse(&resp.to_bytes().unwrap()).unwrap();
        let rr = &parsed.answers[0];
        assert!(is_a_rr(rr));
        let ip = from_a_rr(rr).unwrap();
        assert_eq!(ip, 0x5DB8D822);
        assert_eq!(Ipv4Addr::from(ip).to_string(), "93.184.216.34");
    }

    #[test]
    fn roundtrip_preserves_packets() {
        let packet = a_response(0xbeef, "a.very.deep.example.com", 0x01020304);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(Packet::parse(&bytes).unwrap(), packet);
        // And byte-exact the other way, since nothing is compressed.
        assert_eq!(Packet::parse(&bytes).unwrap().to_bytes().unwrap(), bytes);
    }

    #[test]
    fn compressed_name_resolves_through_pointer() {
        let packet = a_response(1, "example.com", 0x7F000001);
        let mut bytes = packet.to_bytes().unwrap();
        // Rewrite the answer's owner name (right after the 29-byte
        // question) as a pointer to the question name at offset 12.
        bytes.splice(29..42, [0xC0, 12]);
        let parsed = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.answers[0].rname, "example.com");
    }

    #[test]
    fn pointer_outside_packet_is_rejected() {
        let packet = a_response(1, "example.com", 0x7F000001);
        let mut bytes = packet.to_bytes().unwrap();
        bytes.splice(29..42, [0xC3, 0xFF]);
        assert!(matches!(Packet::parse(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn pointer_chain_deeper_than_16_is_rejected() {
        // Header claiming one question, then 18 pointers each aimed at the
        // next, ending in a real name.
        let mut bytes = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        for i in 0..18u16 {
            let target = 12 + (i + 1) * 2;
            bytes.extend_from_slice(&(0xC000 | target).to_be_bytes());
        }
        bytes.extend_from_slice(b"\x01a\x00");
        let mut deep = Parser {
            cur: &bytes[12..],
            full: &bytes,
        };
        let err = deep.name(0).unwrap_err();
        assert!(err.to_string().contains("recursion too deep"));

        let mut shallow = Parser {
            cur: &bytes[12 + 2 * 4..],
            full: &bytes,
        };
        // A 14-deep chain is still fine.
        assert_eq!(shallow.name(0).unwrap(), "a");
    }

    #[test]
    fn name_with_too_many_labels_is_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..33 {
            bytes.extend_from_slice(b"\x01a");
        }
        bytes.push(0);
        let err = Parser::new(&bytes).name(0).unwrap_err();
        assert!(err.to_string().contains("name too long"));
    }

    #[test]
    fn serializer_rejects_long_labels() {
        let label = "x".repeat(64);
        let packet = standard_query(&label);
        assert!(matches!(packet.to_bytes(), Err(Error::Protocol(_))));
        // 63 is the limit, not over it.
        assert!(standard_query(&"x".repeat(63)).to_bytes().is_ok());
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let bytes = standard_query("example.com").to_bytes().unwrap();
        assert!(matches!(
            Packet::parse(&bytes[..bytes.len() - 3]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn reverse_query_builds_inaddr_arpa_name() {
        let packet = reverse_query("93.184.216.34");
        assert_eq!(packet.questions[0].qname, "34.216.184.93.in-addr.arpa");
        assert_eq!(packet.questions[0].qtype, 12);
    }

    #[test]
    fn ptr_rdata_roundtrip() {
        let rdata = to_ptr_rr("host.example.com").unwrap();
        let rr = ResourceRecord {
            rname: "34.216.184.93.in-addr.arpa".into(),
            rtype: 12,
            rclass: 1,
            ttl: 60,
            rdata,
        };
        assert!(is_ptr_rr(&rr));
        assert_eq!(from_ptr_rr(&rr).unwrap(), "host.example.com");
    }

    #[test]
    fn rcode_names() {
        assert_eq!(Rcode::NAME_ERROR.name(), "Name error");
        assert_eq!(Rcode(11).name(), "Reserved");
    }
}
