//! Per-origin bookkeeping: the set of requests a session will perform,
//! their stream bindings, and the policies applied to response events.

use std::collections::HashSet;
use std::io::Write;
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use tracing::{debug, warn};

use crate::assets::LinkExtractor;
use crate::decode::ContentDecoder;
use crate::error::{Error, Result};

/// Wall-clock marks recorded over a request's lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    /// HEADERS handed to the framing engine, opening the stream.
    pub headers_sent: Option<Instant>,
    /// Response HEADERS arrived.
    pub headers_received: Option<Instant>,
    /// Stream closed, successfully or not.
    pub closed: Option<Instant>,
}

/// Upload body state for one request. Each request uploads the full buffer
/// independently; `offset` only ever grows.
#[derive(Debug)]
pub struct UploadBody {
    pub data: Bytes,
    pub offset: usize,
}

/// One intended resource fetch.
pub struct Request {
    /// Absolute URI, fragment already stripped.
    pub uri: String,
    pub parsed: Uri,
    /// Discovery depth: 0 for user-supplied URIs, parent + 1 for assets.
    pub level: u32,
    pub upload: Option<UploadBody>,
    /// `:status` of the response, once headers arrive. Never overwritten.
    pub status: Option<String>,
    pub timings: Timings,
    decoder: Option<ContentDecoder>,
    decoder_failed: bool,
    extractor: Option<LinkExtractor>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("uri", &self.uri)
            .field("level", &self.level)
            .field("status", &self.status)
            .finish()
    }
}

impl Request {
    fn new(uri: String, parsed: Uri, upload: Option<Bytes>, level: u32) -> Request {
        Request {
            uri,
            parsed,
            level,
            upload: upload.map(|data| UploadBody { data, offset: 0 }),
            status: None,
            timings: Timings::default(),
            decoder: None,
            decoder_failed: false,
            extractor: None,
        }
    }

    /// Records that `n` more upload bytes were handed to the framing engine.
    pub(crate) fn advance_upload(&mut self, n: usize) {
        if let Some(upload) = self.upload.as_mut() {
            upload.offset += n;
            debug_assert!(upload.offset <= upload.data.len());
        }
    }
}

/// The set of requests multiplexed over one session, indexed by insertion
/// order (which is also submission order) and by stream identifier.
pub struct Registry {
    requests: Vec<Request>,
    /// URIs already admitted, consulted only while de-duplication is on.
    seen: HashSet<String>,
    /// Stream-to-request bindings, in the order streams were opened.
    streams: Vec<(h2::StreamId, usize)>,
    complete: usize,
    dedup: bool,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("requests", &self.requests.len())
            .field("complete", &self.complete)
            .field("dedup", &self.dedup)
            .finish()
    }
}

impl Registry {
    pub fn new(dedup: bool) -> Registry {
        Registry {
            requests: Vec::new(),
            seen: HashSet::new(),
            streams: Vec::new(),
            complete: 0,
            dedup,
        }
    }

    /// Admits a URI, returning the new request's handle, or `None` when the
    /// URI does not parse as absolute or is a duplicate while
    /// de-duplication is on.
    pub fn admit(&mut self, raw: &str, upload: Option<Bytes>, level: u32) -> Option<usize> {
        let stripped = crate::uri::strip_fragment(raw);
        let parsed = crate::uri::parse(stripped).ok()?;
        if self.dedup && !self.seen.insert(stripped.to_owned()) {
            return None;
        }
        self.requests
            .push(Request::new(stripped.to_owned(), parsed, upload, level));
        Some(self.requests.len() - 1)
    }

    /// Records which stream the engine opened for a request. Idempotent for
    /// the same pair; a stream never maps to two requests.
    pub fn bind_stream(&mut self, id: h2::StreamId, handle: usize) {
        match self.lookup(id) {
            Some(bound) => debug_assert_eq!(bound, handle),
            None => self.streams.push((id, handle)),
        }
    }

    pub fn lookup(&self, id: h2::StreamId) -> Option<usize> {
        self.streams
            .iter()
            .find(|(stream, _)| *stream == id)
            .map(|(_, handle)| *handle)
    }

    pub fn get(&self, handle: usize) -> &Request {
        &self.requests[handle]
    }

    pub fn get_mut(&mut self, handle: usize) -> &mut Request {
        &mut self.requests[handle]
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.complete
    }

    pub fn all_done(&self) -> bool {
        self.complete == self.requests.len()
    }

    pub(crate) fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Applies the response-header policy: store `:status`, set up a content
    /// decoder on the first `gzip`/`deflate` content-encoding, and attach a
    /// link extractor to level-0 requests when asset discovery is on.
    pub(crate) fn on_response_headers(
        &mut self,
        handle: usize,
        status: StatusCode,
        headers: &HeaderMap,
        get_assets: bool,
    ) {
        let request = &mut self.requests[handle];
        request.timings.headers_received.get_or_insert_with(Instant::now);
        if request.status.is_none() {
            request.status = Some(status.as_str().to_owned());
        }
        if request.decoder.is_none() {
            for value in headers.get_all(http::header::CONTENT_ENCODING) {
                if let Some(decoder) = value
                    .to_str()
                    .ok()
                    .and_then(ContentDecoder::for_encoding)
                {
                    request.decoder = Some(decoder);
                    break;
                }
            }
        }
        if get_assets && request.level == 0 && request.extractor.is_none() {
            request.extractor = Some(LinkExtractor::new(&request.parsed));
        }
    }

    /// Applies the data-chunk policy: decode if a decoder is attached, emit
    /// the bytes to `out` unless suppressed, and feed the link extractor.
    /// Returns raw link references discovered in this chunk; a decode
    /// failure is an error and the caller resets the stream.
    pub(crate) fn process_chunk(
        &mut self,
        handle: usize,
        data: &[u8],
        out: &mut dyn Write,
        null_out: bool,
    ) -> Result<Vec<String>> {
        let request = &mut self.requests[handle];
        if request.decoder.is_some() {
            let fed = request.decoder.as_mut().expect("decoder present").feed(data);
            match fed {
                Ok(decoded) => Ok(emit(request, &decoded, out, null_out)),
                Err(err) => {
                    request.decoder_failed = true;
                    Err(Error::new_decode(err))
                }
            }
        } else {
            Ok(emit(request, data, out, null_out))
        }
    }

    /// End-of-stream tick: drain the decoder's tail and flush the link
    /// extractor. Returns the last batch of discovered references.
    pub(crate) fn end_of_stream(
        &mut self,
        handle: usize,
        out: &mut dyn Write,
        null_out: bool,
    ) -> Vec<String> {
        let request = &mut self.requests[handle];
        let mut links = Vec::new();
        if let Some(decoder) = request.decoder.take() {
            if !request.decoder_failed {
                match decoder.finish() {
                    Ok(tail) if !tail.is_empty() => {
                        links.extend(emit(request, &tail, out, null_out));
                    }
                    Ok(_) => {}
                    Err(err) => debug!("discarding truncated response body: {}", err),
                }
            }
        }
        if let Some(extractor) = request.extractor.as_mut() {
            links.extend(extractor.push(&[], true));
        }
        links
    }

    /// Finalizes a request: records the close time and counts it complete.
    /// Safe to call more than once; only the first call counts.
    pub(crate) fn finish(&mut self, handle: usize) {
        let request = &mut self.requests[handle];
        if request.timings.closed.is_none() {
            request.timings.closed = Some(Instant::now());
            self.complete += 1;
        }
    }

    /// Stream-closed dispatch by identifier. Unknown identifiers (pushed
    /// streams the client never asked for) are ignored.
    pub fn mark_complete(&mut self, id: h2::StreamId) {
        if let Some(handle) = self.lookup(id) {
            self.finish(handle);
        }
    }
}

fn emit(request: &mut Request, bytes: &[u8], out: &mut dyn Write, null_out: bool) -> Vec<String> {
    if !null_out && !bytes.is_empty() {
        if let Err(err) = out.write_all(bytes) {
            warn!("writing response data failed: {}", err);
        }
    }
    match request.extractor.as_mut() {
        Some(extractor) => extractor.push(bytes, false),
        None => Vec::new(),
    }
}
