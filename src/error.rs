//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can fail with `h2fetch::Error`.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while fetching over HTTP/2.
///
/// The error is an opaque struct: callers match on the broad class with the
/// `is_*` methods, and the underlying cause (if any) is reachable through
/// `std::error::Error::source`.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    /// A URI was missing its scheme or host, or did not parse at all.
    Uri,
    /// Building the TLS context failed, including certificate or key loading.
    TlsSetup,
    /// DNS resolution or the TCP connect failed.
    Connect,
    /// The TLS handshake failed.
    Handshake,
    /// The peer did not select the HTTP/2 protocol identifier.
    Negotiation,
    /// The framing engine reported a connection-level protocol error.
    Http2,
    /// Transport I/O failed mid-session.
    Io,
    /// A read or write sat idle past the configured timeout.
    Timeout,
    /// The request body could not be handed to the framing engine.
    Upload,
    /// A compressed response body failed to decode.
    Decode,
    /// The connection ended before every request completed.
    Incomplete,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn new_uri() -> Error {
        Error::new(Kind::Uri)
    }

    pub(crate) fn new_tls_setup<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::TlsSetup).with(cause)
    }

    pub(crate) fn new_connect(cause: std::io::Error) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(crate) fn new_handshake<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Handshake).with(cause)
    }

    pub(crate) fn new_negotiation() -> Error {
        Error::new(Kind::Negotiation)
    }

    pub(crate) fn new_upload<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Upload).with(cause)
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::Incomplete)
    }

    pub(crate) fn new_decode(cause: std::io::Error) -> Error {
        Error::new(Kind::Decode).with(cause)
    }

    /// Classifies a framing-engine error: timeouts and plain I/O faults are
    /// separated out from genuine protocol errors so the caller's report
    /// matches what actually happened on the wire.
    pub(crate) fn new_h2(cause: h2::Error) -> Error {
        let kind = match cause.get_io() {
            Some(io) if io.kind() == std::io::ErrorKind::TimedOut => Kind::Timeout,
            Some(_) => Kind::Io,
            None => Kind::Http2,
        };
        Error::new(kind).with(cause)
    }

    /// Returns true if the session ended before all requests completed.
    pub fn is_incomplete(&self) -> bool {
        matches!(self.inner.kind, Kind::Incomplete)
    }

    /// Returns true if a configured idle timeout expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Uri => "invalid URI",
            Kind::TlsSetup => "TLS context setup failed",
            Kind::Connect => "could not connect to the host",
            Kind::Handshake => "TLS handshake failed",
            Kind::Negotiation => "server did not advertise the HTTP/2 protocol",
            Kind::Http2 => "HTTP/2 protocol error",
            Kind::Io => "network error",
            Kind::Timeout => "timeout",
            Kind::Upload => "request body error",
            Kind::Decode => "response body decode failed",
            Kind::Incomplete => "connection closed before all requests completed",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("h2fetch::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
