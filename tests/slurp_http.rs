use assert_fs::prelude::*;
use assert_fs::TempDir;
use rivulet::task::Executor;
use rivulet::transport::tcp::Server;
use rivulet::{gather, slurp, tcp, Error};

/// Answer one incoming HTTP request with a canned response.
async fn serve_one(server: &mut Server, response: String) -> Result<(), Error> {
    let mut conn = server.accept().await?;
    let mut request = Vec::new();
    conn.read_until(b"\r\n\r\n", &mut request).await?;
    conn.write(response.as_bytes()).await?;
    conn.close().await
}

#[test]
fn slurp_reads_files_with_and_without_scheme() {
    let dir = TempDir::new().unwrap();
    let child = dir.child("page.html");
    child.write_str("<html></html>\n").unwrap();
    let path = child.to_path_buf();

    let (plain, with_scheme) = Executor::block_on(async move {
        let path = path.to_str().unwrap();
        let plain = slurp(path).await.unwrap();
        let with_scheme = slurp(&format!("file://{path}")).await.unwrap();
        (plain, with_scheme)
    });
    assert_eq!(plain, b"<html></html>\n");
    assert_eq!(with_scheme, b"<html></html>\n");
}

#[test]
fn slurp_rejects_unknown_schemes() {
    let err = Executor::block_on(slurp("gopher://example.com/")).unwrap_err();
    assert_eq!(err.to_string(), "slurp protocol not supported");
}

#[test]
fn redirect_chain_is_followed() {
    Executor::block_on(async {
        let mut first = tcp::listen("0.0.0.0", 0).await.unwrap();
        let mut second = tcp::listen("0.0.0.0", 0).await.unwrap();
        let first_port = first.local_port().unwrap();
        let second_port = second.local_port().unwrap();

        let serve_first = async {
            serve_one(
                &mut first,
                format!(
                    "HTTP/1.0 302 Found\r\nLocation: http://127.0.0.1:{second_port}/\r\n\r\n"
                ),
            )
            .await
        };

        let serve_second = async {
            serve_one(
                &mut second,
                format!(
                    "HTTP/1.0 302 Found\r\nLocation: http://127.0.0.1:{second_port}/final\r\n\r\n"
                ),
            )
            .await?;
            serve_one(
                &mut second,
                "HTTP/1.0 200 OK\r\n\r\n</html>\n".to_owned(),
            )
            .await
        };

        let fetch = async { slurp(&format!("http://127.0.0.1:{first_port}/")).await };

        let (_, _, body) = gather!(serve_first, serve_second, fetch).await.unwrap();
        assert!(body.ends_with(b"</html>\n"));
    });
}

#[test]
fn seventeen_redirects_are_too_deep() {
    Executor::block_on(async {
        let mut server = tcp::listen("0.0.0.0", 0).await.unwrap();
        let port = server.local_port().unwrap();

        let serve = async {
            // The client gives up before opening a 17th connection.
            for _ in 0..16 {
                serve_one(
                    &mut server,
                    format!(
                        "HTTP/1.0 302 Found\r\nLocation: http://127.0.0.1:{port}/\r\n\r\n"
                    ),
                )
                .await?;
            }
            Ok::<_, Error>(())
        };

        let fetch = async { slurp(&format!("http://127.0.0.1:{port}/")).await };

        let (_, res) = rivulet::zip(serve, fetch).await;
        assert!(matches!(res, Err(Error::RedirectLoop)));
    });
}

#[test]
fn error_statuses_carry_their_code() {
    Executor::block_on(async {
        let mut server = tcp::listen("0.0.0.0", 0).await.unwrap();
        let port = server.local_port().unwrap();

        let serve = async {
            serve_one(
                &mut server,
                "HTTP/1.0 404 Not Found\r\n\r\ngone\n".to_owned(),
            )
            .await
        };
        let fetch = async { slurp(&format!("http://127.0.0.1:{port}/missing")).await };

        let (served, res) = rivulet::zip(serve, fetch).await;
        served.unwrap();
        assert!(matches!(res, Err(Error::Status(404))));
    });
}
