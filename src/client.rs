//! The per-origin session loop.
//!
//! One session owns one transport connection and multiplexes every request
//! for its origin over it. The framing engine's connection future is the
//! receive/send pump; request tasks feed it and consume its per-stream
//! events. Everything runs on the current thread: the caller drives
//! [`communicate`] (or [`run_session`] in tests) inside a
//! `tokio::task::LocalSet`.

use std::cell::RefCell;
use std::future::poll_fn;
use std::io::Write;
use std::rc::Rc;
use std::time::Instant;

use bytes::Bytes;
use futures_channel::oneshot;
use futures_util::future::LocalBoxFuture;
use h2::client::SendRequest;
use h2::{Reason, SendStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::spawn_local;
use tracing::{debug, trace};

use crate::config::{Config, OUTPUT_UPPER_THRES};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::stats::{RequestStats, Summary};
use crate::timeout::IdleTimeout;
use crate::{headers, transport, uri};

/// Shared state of one running session.
struct Session {
    config: Rc<Config>,
    registry: RefCell<Registry>,
    /// `:authority` for every request in this session.
    authority: String,
    out: RefCell<Box<dyn Write>>,
    /// Handle used to open new streams; taken (and thereby dropped) once
    /// every request has completed, which makes the engine send
    /// GOAWAY(NO_ERROR) and wind the connection down.
    sender: RefCell<Option<SendRequest<Bytes>>>,
    /// Fires once when the registry first reports all requests complete.
    done: RefCell<Option<oneshot::Sender<()>>>,
}

impl Session {
    /// Called after a request is finalized; triggers shutdown when it was
    /// the last one.
    fn finish_request(&self, handle: usize) {
        let all_done = {
            let mut registry = self.registry.borrow_mut();
            registry.finish(handle);
            registry.all_done()
        };
        if all_done {
            self.shutdown();
        }
    }

    fn shutdown(&self) {
        if let Some(done) = self.done.borrow_mut().take() {
            let _ = done.send(());
        }
        self.sender.borrow_mut().take();
    }
}

/// Runs one complete session against `host:port`: connect, submit every
/// URI, pump until done, and report.
///
/// Returns `Err` only when the session failed before the event loop could
/// start (TLS setup, DNS, connect, handshake, negotiation). Failures after
/// that point are reported inside the returned [`Summary`] so that
/// statistics and completion totals survive them.
pub async fn communicate(
    config: Rc<Config>,
    host: String,
    port: u16,
    uris: Vec<String>,
    upload: Option<Bytes>,
) -> Result<Summary> {
    let tls = if config.no_tls {
        None
    } else {
        Some(crate::tls::client_config(&config)?)
    };

    // A user Host header substitutes for the connect host in the SNI
    // extension, exactly as it substitutes for the authority.
    let server_name = config
        .host_override()
        .unwrap_or(host.as_str())
        .to_owned();

    let io = transport::connect(&host, port, &server_name, tls.as_ref()).await?;
    run_session(config, io, uris, upload, Box::new(std::io::stdout())).await
}

/// Drives a session over an already-connected transport.
///
/// Must be polled from inside a `tokio::task::LocalSet`. Response bodies
/// are written to `out` in arrival order.
pub async fn run_session<T>(
    config: Rc<Config>,
    io: T,
    uris: Vec<String>,
    upload: Option<Bytes>,
    out: Box<dyn Write>,
) -> Result<Summary>
where
    T: AsyncRead + AsyncWrite + Unpin + 'static,
{
    match config.timeout {
        Some(timeout) => {
            run_inner(config, Box::pin(IdleTimeout::new(io, timeout)), uris, upload, out).await
        }
        None => run_inner(config, io, uris, upload, out).await,
    }
}

async fn run_inner<T>(
    config: Rc<Config>,
    io: T,
    uris: Vec<String>,
    upload: Option<Bytes>,
    out: Box<dyn Write>,
) -> Result<Summary>
where
    T: AsyncRead + AsyncWrite + Unpin + 'static,
{
    let handshake_at = Instant::now();

    let mut registry = Registry::new(config.multiply == 1);
    for raw in &uris {
        for _ in 0..config.multiply {
            registry.admit(raw, upload.clone(), 0);
        }
    }

    let authority = match registry.requests().first() {
        Some(first) => config
            .host_override()
            .map(str::to_owned)
            .unwrap_or_else(|| uri::host_port(&first.parsed)),
        None => return Err(Error::new_uri()),
    };

    let mut builder = h2::client::Builder::new();
    builder
        .enable_push(false)
        // Every request is handed over before the pump runs, so stream
        // admission must not block on the peer's SETTINGS.
        .initial_max_send_streams(usize::MAX)
        .max_send_buffer_size(OUTPUT_UPPER_THRES);
    if let Some(bits) = config.window_bits {
        builder.initial_window_size(1u32 << bits);
    }
    let (sender, connection) = builder
        .handshake::<_, Bytes>(io)
        .await
        .map_err(Error::new_h2)?;
    trace!("connection preface sent");

    let (done_tx, mut done_rx) = oneshot::channel();
    let session = Rc::new(Session {
        config,
        registry: RefCell::new(registry),
        authority,
        out: RefCell::new(out),
        sender: RefCell::new(Some(sender)),
        done: RefCell::new(Some(done_tx)),
    });

    let mut connection = connection;

    // Initial submissions, in admission order. A failed submission is
    // finalized inside submit_request; the engine-level cause resurfaces
    // from the connection future if it matters. The engine buffers the
    // HEADERS handoffs, so nothing here needs the pump yet.
    let count = session.registry.borrow().len();
    for handle in 0..count {
        if let Err(err) = submit_request(&session, handle).await {
            debug!("request #{} failed to start: {}", handle + 1, err);
        }
    }

    // The connection future is the receive/send pump; it is polled here
    // alongside the completion signal rather than spawned off. Once every
    // request has completed, the stream-opening handle is already gone;
    // continuing to poll the pump makes the engine notice, emit
    // GOAWAY(NO_ERROR), and drain before it resolves.
    let mut done = false;
    let error = loop {
        tokio::select! {
            _ = &mut done_rx, if !done => {
                done = true;
            }
            pumped = &mut connection => {
                let all_done = session.registry.borrow().all_done();
                break match pumped {
                    Ok(()) if all_done => None,
                    Ok(()) => Some(Error::new_incomplete()),
                    Err(err) if err.reason() == Some(Reason::NO_ERROR) && all_done => None,
                    Err(err) => Some(Error::new_h2(err)),
                };
            }
        }
    };

    let registry = session.registry.borrow();
    Ok(Summary {
        handshake_at,
        completed: registry.completed(),
        error,
        requests: registry
            .requests()
            .iter()
            .map(|request| RequestStats {
                uri: request.uri.clone(),
                status: request.status.clone(),
                level: request.level,
                timings: request.timings,
            })
            .collect(),
    })
}

/// Opens the stream for one admitted request and spawns the task that sees
/// it through. Submission order is the caller's admission order because
/// this function completes the HEADERS handoff before returning.
///
/// Boxed: asset discovery makes streams submit further streams, so the
/// future type would otherwise be recursive.
fn submit_request<'a>(
    session: &'a Rc<Session>,
    handle: usize,
) -> LocalBoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let result = try_submit(session, handle).await;
        if result.is_err() {
            // The stream never opened; the request is still accounted for.
            session.finish_request(handle);
        }
        result
    })
}

async fn try_submit(session: &Rc<Session>, handle: usize) -> Result<()> {
    let sender = match session.sender.borrow().as_ref() {
        Some(sender) => sender.clone(),
        None => return Ok(()),
    };
    let mut sender = sender.ready().await.map_err(Error::new_h2)?;

    let (request, body) = {
        let registry = session.registry.borrow();
        let req = registry.get(handle);
        let body = req.upload.as_ref().map(|upload| upload.data.clone());
        let request = headers::build_request(
            &session.config,
            req.parsed.scheme_str().unwrap_or("https"),
            &session.authority,
            &uri::request_path(&req.parsed),
            body.as_ref().map(|data| data.len() as u64),
        )?;
        (request, body)
    };

    let end_of_stream = body.is_none();
    let (response, send_stream) = sender
        .send_request(request, end_of_stream)
        .map_err(Error::new_h2)?;
    drop(sender);

    let stream_id = send_stream.stream_id();
    {
        let mut registry = session.registry.borrow_mut();
        registry.bind_stream(stream_id, handle);
        registry.get_mut(handle).timings.headers_sent = Some(Instant::now());
    }
    trace!("request #{} opened stream {:?}", handle + 1, stream_id);

    let session = session.clone();
    spawn_local(async move {
        if let Err(err) = run_stream(&session, handle, response, send_stream, body).await {
            debug!("request #{} failed: {}", handle + 1, err);
        }
        // Final extractor tick runs on every close path, then the request
        // is finalized.
        let links = {
            let mut registry = session.registry.borrow_mut();
            let mut out = session.out.borrow_mut();
            registry.end_of_stream(handle, &mut **out, session.config.null_out)
        };
        follow_links(&session, handle, links).await;
        session.finish_request(handle);
    });
    Ok(())
}

/// Consumes one stream: uploads the body, receives response headers and
/// DATA, and feeds decoding and asset discovery.
async fn run_stream(
    session: &Rc<Session>,
    handle: usize,
    response: h2::client::ResponseFuture,
    mut send_stream: SendStream<Bytes>,
    body: Option<Bytes>,
) -> Result<()> {
    if let Some(data) = body {
        send_body(session, handle, &mut send_stream, data).await?;
    }

    let response = response.await.map_err(Error::new_h2)?;
    {
        let mut registry = session.registry.borrow_mut();
        registry.on_response_headers(
            handle,
            response.status(),
            response.headers(),
            session.config.get_assets,
        );
    }
    trace!("request #{} got {}", handle + 1, response.status());

    let mut body = response.into_body();
    let mut flow = body.flow_control().clone();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(Error::new_h2)?;
        let _ = flow.release_capacity(chunk.len());

        let processed = {
            let mut registry = session.registry.borrow_mut();
            let mut out = session.out.borrow_mut();
            registry.process_chunk(handle, &chunk, &mut **out, session.config.null_out)
        };
        match processed {
            Ok(links) => follow_links(session, handle, links).await,
            Err(err) => {
                // Abort only this stream; its siblings keep going.
                debug!("request #{}: {}", handle + 1, err);
                send_stream.send_reset(Reason::INTERNAL_ERROR);
                return Ok(());
            }
        }
    }
    let _ = body.trailers().await;
    Ok(())
}

/// Sends the upload body, chunk by chunk, as the engine grants send
/// capacity. The engine pauses this loop whenever the transport-side
/// buffer is above the high-water mark.
async fn send_body(
    session: &Rc<Session>,
    handle: usize,
    stream: &mut SendStream<Bytes>,
    mut data: Bytes,
) -> Result<()> {
    if data.is_empty() {
        return stream
            .send_data(Bytes::new(), true)
            .map_err(Error::new_h2);
    }
    while !data.is_empty() {
        stream.reserve_capacity(data.len());
        let available = if stream.capacity() == 0 {
            loop {
                match poll_fn(|cx| stream.poll_capacity(cx)).await {
                    Some(Ok(0)) => continue,
                    Some(Ok(n)) => break n,
                    Some(Err(err)) => return Err(Error::new_h2(err)),
                    None => {
                        return Err(Error::new_upload(
                            "stream closed before the request body was sent",
                        ))
                    }
                }
            }
        } else {
            stream.capacity()
        };

        let n = available.min(data.len());
        let chunk = data.split_to(n);
        let end_of_stream = data.is_empty();
        stream
            .send_data(chunk, end_of_stream)
            .map_err(Error::new_h2)?;
        session
            .registry
            .borrow_mut()
            .get_mut(handle)
            .advance_upload(n);
        trace!(
            "request #{} sent {} body bytes, eos={}",
            handle + 1,
            n,
            end_of_stream
        );
    }
    Ok(())
}

/// Admits discovered links that share the parent's origin and submits them
/// at the next discovery level, in the order the extractor produced them.
async fn follow_links(session: &Rc<Session>, parent: usize, links: Vec<String>) {
    if links.is_empty() {
        return;
    }
    let admitted: Vec<usize> = {
        let mut registry = session.registry.borrow_mut();
        let (parent_uri, level) = {
            let parent = registry.get(parent);
            (parent.parsed.clone(), parent.level)
        };
        links
            .iter()
            .filter_map(|raw| {
                let stripped = uri::strip_fragment(raw);
                let child = uri::parse(stripped).ok()?;
                if !uri::same_origin(&parent_uri, &child) {
                    return None;
                }
                // Assets never carry an upload body.
                registry.admit(stripped, None, level + 1)
            })
            .collect()
    };
    for handle in admitted {
        if let Err(err) = submit_request(session, handle).await {
            debug!("asset request #{} failed to start: {}", handle + 1, err);
        }
    }
}
