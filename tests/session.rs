//! End-to-end session tests: the real session loop against an in-process
//! HTTP/2 server over an in-memory duplex pipe.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use bytes::Bytes;
use h2::server;
use http::Response;
use tokio::io::DuplexStream;
use tokio::task::LocalSet;

use h2fetch::client;
use h2fetch::config::{parse_header, Config};
use h2fetch::stats::Summary;

/// Clonable sink standing in for stdout.
#[derive(Clone, Default)]
struct SharedOut(Rc<RefCell<Vec<u8>>>);

impl SharedOut {
    fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedOut {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// What the test server should answer for a path.
struct Reply {
    status: u16,
    headers: Vec<(&'static str, Vec<u8>)>,
    body: Bytes,
}

impl Reply {
    fn ok(body: impl Into<Bytes>) -> Reply {
        Reply {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<Vec<u8>>) -> Reply {
        self.headers.push((name, value.into()));
        self
    }
}

/// One request as the server observed it.
struct Served {
    stream_id: String,
    method: String,
    path: String,
    authority: String,
    headers: http::HeaderMap,
    body: Vec<u8>,
}

/// Accepts requests until the client goes away, answering each from
/// `route` and recording what arrived.
async fn serve<F>(io: DuplexStream, route: F) -> Vec<Served>
where
    F: Fn(&str) -> Reply + 'static,
{
    let mut connection = server::handshake(io).await.expect("server handshake");
    let mut served = Vec::new();
    while let Some(incoming) = connection.accept().await {
        let (request, mut respond) = match incoming {
            Ok(pair) => pair,
            // The client's GOAWAY or close ends the loop.
            Err(err) if err.reason() == Some(h2::Reason::NO_ERROR) => break,
            Err(err) if err.is_io() => break,
            Err(err) => panic!("server error: {:?}", err),
        };
        let (parts, mut body) = request.into_parts();
        let stream_id = format!("{:?}", body.stream_id());
        let mut data = Vec::new();
        while let Some(chunk) = body.data().await {
            let chunk = chunk.expect("request body");
            let _ = body.flow_control().release_capacity(chunk.len());
            data.extend_from_slice(&chunk);
        }

        let reply = route(parts.uri.path());
        served.push(Served {
            stream_id,
            method: parts.method.to_string(),
            path: parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_default(),
            authority: parts
                .uri
                .authority()
                .map(|authority| authority.to_string())
                .unwrap_or_default(),
            headers: parts.headers,
            body: data,
        });

        let mut response = Response::builder().status(reply.status);
        for (name, value) in &reply.headers {
            response = response.header(*name, value.clone());
        }
        let response = response.body(()).expect("response");
        let end = reply.body.is_empty();
        let mut tx = respond.send_response(response, end).expect("send response");
        if !end {
            tx.send_data(reply.body.clone(), true).expect("send body");
        }
    }
    served
}

fn cleartext_config() -> Config {
    Config {
        no_tls: true,
        ..Config::default()
    }
}

async fn run_client(
    config: Config,
    io: DuplexStream,
    uris: &[&str],
    upload: Option<Bytes>,
    out: SharedOut,
) -> Summary {
    let uris: Vec<String> = uris.iter().map(|uri| uri.to_string()).collect();
    client::run_session(Rc::new(config), io, uris, upload, Box::new(out))
        .await
        .expect("session setup")
}

fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn single_get_fetches_and_prints_the_body() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server =
                tokio::task::spawn_local(serve(server_io, |_| Reply::ok("hello world")));
            let out = SharedOut::default();
            let summary = run_client(
                cleartext_config(),
                client_io,
                &["http://example.com/index.html"],
                None,
                out.clone(),
            )
            .await;

            assert!(summary.all_done());
            assert!(!summary.failed());
            assert_eq!(summary.requests.len(), 1);
            assert_eq!(summary.requests[0].status.as_deref(), Some("200"));
            assert!(summary.requests[0].timings.headers_sent.is_some());
            assert!(summary.requests[0].timings.headers_received.is_some());
            assert!(summary.requests[0].timings.closed.is_some());
            assert_eq!(out.contents(), b"hello world");

            let served = server.await.unwrap();
            assert_eq!(served.len(), 1);
            assert_eq!(served[0].method, "GET");
            assert_eq!(served[0].path, "/index.html");
            assert_eq!(served[0].authority, "example.com");
            assert_eq!(served[0].headers.get("accept").unwrap(), "*/*");
            assert_eq!(
                served[0].headers.get("accept-encoding").unwrap(),
                "gzip, deflate"
            );
            assert!(served[0]
                .headers
                .get("user-agent")
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("h2fetch/"));
        })
        .await;
}

#[tokio::test]
async fn post_uploads_the_body_with_content_length() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(serve(server_io, |_| Reply::ok("done")));
            let payload = Bytes::from_static(b"field=value&key=123");
            let out = SharedOut::default();
            let summary = run_client(
                cleartext_config(),
                client_io,
                &["http://example.com/submit"],
                Some(payload.clone()),
                out.clone(),
            )
            .await;

            assert!(summary.all_done());
            let served = server.await.unwrap();
            assert_eq!(served.len(), 1);
            assert_eq!(served[0].method, "POST");
            assert_eq!(
                served[0].headers.get("content-length").unwrap(),
                &payload.len().to_string()
            );
            assert_eq!(served[0].body, payload);
        })
        .await;
}

#[tokio::test]
async fn duplicate_uris_are_submitted_once() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(serve(server_io, |_| Reply::ok("x")));
            let out = SharedOut::default();
            let summary = run_client(
                cleartext_config(),
                client_io,
                &[
                    "http://example.com/a",
                    "http://example.com/a",
                    "http://example.com/b",
                ],
                None,
                out.clone(),
            )
            .await;

            assert_eq!(summary.requests.len(), 2);
            assert!(summary.all_done());
            let served = server.await.unwrap();
            assert_eq!(served.len(), 2);
        })
        .await;
}

#[tokio::test]
async fn multiply_submits_each_uri_on_its_own_stream() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(serve(server_io, |_| Reply::ok("x")));
            let config = Config {
                multiply: 3,
                ..cleartext_config()
            };
            let out = SharedOut::default();
            let summary = run_client(
                config,
                client_io,
                &["http://example.com/a"],
                None,
                out.clone(),
            )
            .await;

            assert_eq!(summary.requests.len(), 3);
            assert!(summary.all_done());

            let served = server.await.unwrap();
            assert_eq!(served.len(), 3);
            let mut ids: Vec<&str> = served
                .iter()
                .map(|request| request.stream_id.as_str())
                .collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), 3, "every submission must open its own stream");
        })
        .await;
}

#[tokio::test]
async fn same_origin_assets_are_fetched_at_level_one() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(serve(server_io, |path| match path {
                "/" => Reply::ok(concat!(
                    "<html><head>",
                    "<link rel=\"stylesheet\" href=\"http://example.com/s.css\">",
                    "</head><body>",
                    "<img src=\"i.png\">",
                    "<script src=\"https://other.example/x.js\"></script>",
                    "</body></html>"
                ))
                .with_header("content-type", "text/html"),
                "/s.css" => Reply::ok("body{}"),
                "/i.png" => Reply::ok("PNG"),
                other => panic!("unexpected request for {}", other),
            }));
            let config = Config {
                get_assets: true,
                ..cleartext_config()
            };
            let out = SharedOut::default();
            let summary = run_client(
                config,
                client_io,
                &["http://example.com/"],
                None,
                out.clone(),
            )
            .await;

            assert_eq!(summary.requests.len(), 3);
            assert!(summary.all_done());
            let mut levels: Vec<u32> =
                summary.requests.iter().map(|request| request.level).collect();
            levels.sort_unstable();
            assert_eq!(levels, [0, 1, 1]);

            let served = server.await.unwrap();
            let mut paths: Vec<&str> =
                served.iter().map(|request| request.path.as_str()).collect();
            paths.sort_unstable();
            assert_eq!(paths, ["/", "/i.png", "/s.css"]);
        })
        .await;
}

#[tokio::test]
async fn user_agent_override_is_emitted_exactly_once() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(serve(server_io, |_| Reply::ok("x")));
            let mut config = cleartext_config();
            config.headers.push(parse_header("User-Agent: probe").unwrap());
            let out = SharedOut::default();
            let summary = run_client(
                config,
                client_io,
                &["http://example.com/"],
                None,
                out.clone(),
            )
            .await;
            assert!(summary.all_done());

            let served = server.await.unwrap();
            let agents: Vec<_> = served[0].headers.get_all("user-agent").iter().collect();
            assert_eq!(agents.len(), 1);
            assert_eq!(agents[0], "probe");
        })
        .await;
}

#[tokio::test]
async fn gzip_response_bodies_are_decoded() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(serve(server_io, |_| {
                Reply::ok(gzip(b"the plain text payload"))
                    .with_header("content-encoding", "gzip")
            }));
            let out = SharedOut::default();
            let summary = run_client(
                cleartext_config(),
                client_io,
                &["http://example.com/z"],
                None,
                out.clone(),
            )
            .await;

            assert!(summary.all_done());
            assert!(!summary.failed());
            assert_eq!(out.contents(), b"the plain text payload");
        })
        .await;
}

#[tokio::test]
async fn corrupt_gzip_aborts_only_that_stream() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(serve(server_io, |path| match path {
                "/good" => Reply::ok("good data"),
                _ => Reply::ok(&b"not gzip at all"[..])
                    .with_header("content-encoding", "gzip"),
            }));
            let out = SharedOut::default();
            let summary = run_client(
                cleartext_config(),
                client_io,
                &["http://example.com/good", "http://example.com/bad"],
                None,
                out.clone(),
            )
            .await;

            // The broken stream was reset, but both requests completed and
            // the session ended cleanly.
            assert!(summary.all_done());
            assert!(!summary.failed());
            let printed = out.contents();
            assert_eq!(printed, b"good data");

            let served = server.await.unwrap();
            assert_eq!(served.len(), 2);
        })
        .await;
}

#[tokio::test]
async fn null_out_discards_response_bodies() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(serve(server_io, |_| Reply::ok("secret")));
            let config = Config {
                null_out: true,
                ..cleartext_config()
            };
            let out = SharedOut::default();
            let summary = run_client(
                config,
                client_io,
                &["http://example.com/"],
                None,
                out.clone(),
            )
            .await;

            assert!(summary.all_done());
            assert!(out.contents().is_empty());
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn server_abort_reports_the_session_as_incomplete() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let local = LocalSet::new();
    local
        .run_until(async move {
            let server = tokio::task::spawn_local(async move {
                let mut connection = server::handshake(server_io).await.expect("handshake");
                // accept one stream, answer nothing, drop the connection
                let _ = connection.accept().await;
            });
            let out = SharedOut::default();
            let summary = run_client(
                cleartext_config(),
                client_io,
                &["http://example.com/a", "http://example.com/b"],
                None,
                out.clone(),
            )
            .await;

            assert!(summary.failed());
            assert!(summary
                .requests
                .iter()
                .all(|request| request.status.is_none()));
            server.await.unwrap();
        })
        .await;
}
