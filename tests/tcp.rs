use rivulet::task::Executor;
use rivulet::{gather, tcp, Error};

#[test]
fn accept_and_echo() {
    Executor::block_on(async {
        let mut server = tcp::listen("0.0.0.0", 0).await.unwrap();
        let port = server.local_port().unwrap();

        let serve = async {
            let mut conn = server.accept().await?;
            let mut line = Vec::new();
            conn.read_until(b"\n", &mut line).await?;
            conn.write(&line).await?;
            conn.close().await?;
            Ok::<_, Error>(line)
        };

        let client = async {
            let mut conn = tcp::connect("127.0.0.1", port).await?;
            conn.write(b"ping\n").await?;
            let mut reply = Vec::new();
            conn.read_until_eof(&mut reply).await?;
            Ok::<_, Error>(reply)
        };

        let (line, reply) = gather!(serve, client).await.unwrap();
        assert_eq!(line, b"ping\n");
        assert_eq!(reply, b"ping\n");
    });
}

#[test]
fn large_transfer_interleaves_both_sides() {
    Executor::block_on(async {
        let mut server = tcp::listen("0.0.0.0", 0).await.unwrap();
        let port = server.local_port().unwrap();

        let payload: Vec<u8> = (0..512 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let len = payload.len();

        let serve = async {
            let mut conn = server.accept().await?;
            let mut got = Vec::new();
            conn.read_n(len, &mut got).await?;
            Ok::<_, Error>(got)
        };

        let client = async move {
            let mut conn = tcp::connect("127.0.0.1", port).await?;
            conn.write(&payload).await?;
            conn.close().await?;
            Ok::<_, Error>(())
        };

        let (got, ()) = gather!(serve, client).await.unwrap();
        assert_eq!(got.len(), expected.len());
        assert_eq!(got, expected);
    });
}

#[test]
fn connect_to_closed_port_fails() {
    Executor::block_on(async {
        // Bind and drop a listener to find a port nothing listens on.
        let server = tcp::listen("0.0.0.0", 0).await.unwrap();
        let port = server.local_port().unwrap();
        drop(server);

        let err = tcp::connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, Error::Sys { call: "connect()", .. }), "{err}");
    });
}

#[test]
fn sequential_accepts_serve_multiple_clients() {
    Executor::block_on(async {
        let mut server = tcp::listen("0.0.0.0", 0).await.unwrap();
        let port = server.local_port().unwrap();

        let serve = async {
            for _ in 0..3 {
                let mut conn = server.accept().await?;
                conn.write(b"hi").await?;
                conn.close().await?;
            }
            Ok::<_, Error>(())
        };

        let clients = async {
            for _ in 0..3 {
                let mut conn = tcp::connect("127.0.0.1", port).await?;
                let mut reply = Vec::new();
                conn.read_until_eof(&mut reply).await?;
                assert_eq!(reply, b"hi");
            }
            Ok::<_, Error>(())
        };

        gather!(serve, clients).await.unwrap();
    });
}
