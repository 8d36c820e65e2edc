use std::net::UdpSocket;
use std::thread;

use rivulet::dns::{self, Flags, Packet, Rcode, ResourceRecord};
use rivulet::task::Executor;

/// An A answer for the request's question.
fn a_response(req: &Packet, ip: u32) -> Packet {
    Packet {
        id: req.id,
        flags: Flags {
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: req.flags.rd,
            ra: true,
            z: 0,
            rcode: Rcode::NO_ERROR,
        },
        questions: req.questions.clone(),
        answers: vec![ResourceRecord {
            rname: req.questions[0].qname.clone(),
            rtype: 1,
            rclass: 1,
            ttl: 60,
            rdata: dns::to_a_rr(ip),
        }],
        authority: Vec::new(),
        additional: Vec::new(),
    }
}

#[test]
fn query_discards_foreign_and_non_response_packets() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();

    let resolver = thread::spawn(move || {
        let mut buf = [0u8; 512];
        let (n, peer) = server.recv_from(&mut buf).unwrap();
        let req = Packet::parse(&buf[..n]).unwrap();
        assert_eq!(req.questions[0].qname, "example.com");
        assert!(req.flags.rd, "standard queries must ask for recursion");

        // A response under the wrong id: must be ignored.
        let mut foreign = a_response(&req, 0x01020304);
        foreign.id = req.id.wrapping_add(1);
        server.send_to(&foreign.to_bytes().unwrap(), peer).unwrap();

        // The request echoed back (qr = 0): must be ignored.
        server.send_to(&req.to_bytes().unwrap(), peer).unwrap();

        // The genuine answer.
        let real = a_response(&req, 0x5DB8D822);
        server.send_to(&real.to_bytes().unwrap(), peer).unwrap();
    });

    let req = dns::standard_query("example.com");
    let resp = Executor::block_on(dns::query_server("127.0.0.1", port, &req)).unwrap();
    resolver.join().unwrap();

    assert_eq!(resp.id, req.id);
    assert!(resp.flags.qr);
    let rr = &resp.answers[0];
    assert!(dns::is_a_rr(rr));
    assert_eq!(dns::from_a_rr(rr).unwrap(), 0x5DB8D822);
}

/// Run one canned reverse-lookup exchange: assert the query shape, apply
/// `doctor` to a success-shaped reply, send it back.
fn reverse_resolver(
    server: UdpSocket,
    doctor: impl FnOnce(&mut Packet) + Send + 'static,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 512];
        let (n, peer) = server.recv_from(&mut buf).unwrap();
        let req = Packet::parse(&buf[..n]).unwrap();
        assert_eq!(req.questions[0].qname, "34.216.184.93.in-addr.arpa");
        assert_eq!(req.questions[0].qtype, 12);

        let mut resp = req.clone();
        resp.flags.qr = true;
        resp.flags.ra = true;
        doctor(&mut resp);
        server.send_to(&resp.to_bytes().unwrap(), peer).unwrap();
    })
}

#[test]
fn reverse_lookup_name_error_is_not_found() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();
    let resolver = reverse_resolver(server, |resp| {
        resp.flags.rcode = Rcode::NAME_ERROR;
    });

    let host =
        Executor::block_on(dns::ip_to_host_via("127.0.0.1", port, "93.184.216.34")).unwrap();
    resolver.join().unwrap();
    assert_eq!(host, None);
}

#[test]
fn reverse_lookup_success_still_reports_not_found() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();
    // Even a reply carrying a matching PTR answer resolves to "not
    // found"; the lookup never extracts the name.
    let resolver = reverse_resolver(server, |resp| {
        resp.answers.push(ResourceRecord {
            rname: resp.questions[0].qname.clone(),
            rtype: 12,
            rclass: 1,
            ttl: 60,
            rdata: dns::to_ptr_rr("duck.example.com").unwrap(),
        });
    });

    let host =
        Executor::block_on(dns::ip_to_host_via("127.0.0.1", port, "93.184.216.34")).unwrap();
    resolver.join().unwrap();
    assert_eq!(host, None);
}

#[test]
fn reverse_lookup_failure_rcodes_surface() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();
    let resolver = reverse_resolver(server, |resp| {
        resp.flags.rcode = Rcode::REFUSED;
    });

    let err = Executor::block_on(dns::ip_to_host_via("127.0.0.1", port, "93.184.216.34"))
        .unwrap_err();
    resolver.join().unwrap();
    assert_eq!(err.to_string(), "DNS server error: Refused");
}

#[test]
fn rcode_failures_surface_by_name() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();

    let resolver = thread::spawn(move || {
        let mut buf = [0u8; 512];
        let (n, peer) = server.recv_from(&mut buf).unwrap();
        let req = Packet::parse(&buf[..n]).unwrap();
        let mut resp = a_response(&req, 0);
        resp.answers.clear();
        resp.flags.rcode = Rcode::SERVER_FAILURE;
        server.send_to(&resp.to_bytes().unwrap(), peer).unwrap();
    });

    let req = dns::standard_query("example.com");
    let resp = Executor::block_on(dns::query_server("127.0.0.1", port, &req)).unwrap();
    resolver.join().unwrap();

    let err = resp.check_rcode().unwrap_err();
    assert_eq!(err.to_string(), "DNS server error: Server failure");
}
