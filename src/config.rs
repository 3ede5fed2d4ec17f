//! Runtime configuration shared by every session.
//!
//! A `Config` is built once from the command line and then passed by
//! reference into each per-origin session; nothing in here is mutated after
//! startup.

use std::path::PathBuf;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, HOST};

/// Product token sent as the default `user-agent` header.
pub const USER_AGENT: &str = concat!("h2fetch/", env!("CARGO_PKG_VERSION"));

/// High-water mark for bytes queued toward the transport, in bytes.
///
/// The framing engine stops producing output while more than this is
/// buffered and resumes once the transport drains.
pub(crate) const OUTPUT_UPPER_THRES: usize = 1024 * 1024;

/// Immutable per-process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Emit frame-level diagnostics and the TLS protocol-selection trace.
    pub verbose: bool,
    /// Discard response bodies instead of writing them to standard output.
    pub null_out: bool,
    /// Accepted for compatibility; saving under a derived filename is not
    /// implemented.
    pub remote_name: bool,
    /// Per-read and per-write idle timeout.
    pub timeout: Option<Duration>,
    /// When set, SETTINGS_INITIAL_WINDOW_SIZE is announced as `2^n`.
    pub window_bits: Option<u8>,
    /// Follow same-origin asset links found in level-0 HTML responses.
    pub get_assets: bool,
    /// Print per-request statistics once a session completes.
    pub stat: bool,
    /// Use a cleartext connection instead of TLS.
    pub no_tls: bool,
    /// Submit each URI this many times; any value above 1 also disables
    /// de-duplication of repeated URIs.
    pub multiply: usize,
    /// Extra request headers in command-line order.
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Client certificate chain, PEM.
    pub certfile: Option<PathBuf>,
    /// Client private key, PEM.
    pub keyfile: Option<PathBuf>,
    /// Upload body source; `-` on the command line maps to standard input.
    pub datafile: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            verbose: false,
            null_out: false,
            remote_name: false,
            timeout: None,
            window_bits: None,
            get_assets: false,
            stat: false,
            no_tls: false,
            multiply: 1,
            headers: Vec::new(),
            certfile: None,
            keyfile: None,
            datafile: None,
        }
    }
}

impl Config {
    /// The value of a user-supplied `Host` header, if any.
    ///
    /// It replaces both the authority component of every request and the TLS
    /// server name sent during the handshake.
    pub(crate) fn host_override(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| *name == HOST)
            .and_then(|(_, value)| value.to_str().ok())
    }
}

/// Parses a `-H "Name: value"` argument.
///
/// The name must be non-empty and a valid header name; the value is taken
/// after the first colon with leading whitespace removed and must be
/// non-empty.
pub fn parse_header(raw: &str) -> std::result::Result<(HeaderName, HeaderValue), String> {
    let colon = raw
        .find(':')
        .ok_or_else(|| format!("invalid header: {}", raw))?;
    let (name, value) = raw.split_at(colon);
    if name.is_empty() {
        return Err(format!("invalid header: {}", raw));
    }
    let value = value[1..].trim_start();
    if value.is_empty() {
        return Err(format!("invalid header - value missing: {}", raw));
    }
    let name = name
        .parse::<HeaderName>()
        .map_err(|err| format!("invalid header name {:?}: {}", name, err))?;
    let value = HeaderValue::from_str(value)
        .map_err(|err| format!("invalid header value {:?}: {}", value, err))?;
    Ok((name, value))
}
