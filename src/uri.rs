//! URI helpers: fragment stripping, origin comparison and authority
//! formatting.

use http::Uri;

use crate::error::{Error, Result};

/// Truncates a URI reference at the first `#`.
///
/// Fragments are client-side only and are stripped before a URI is stored or
/// compared anywhere in the crate. Idempotent.
pub fn strip_fragment(raw: &str) -> &str {
    match raw.find('#') {
        Some(at) => &raw[..at],
        None => raw,
    }
}

/// Parses an absolute URI, after stripping any fragment.
///
/// References without a scheme or host are rejected; the command line skips
/// those silently and asset discovery resolves relative links before they
/// get here.
pub fn parse(raw: &str) -> Result<Uri> {
    let uri: Uri = strip_fragment(raw)
        .parse()
        .map_err(|err: http::uri::InvalidUri| Error::new_uri().with(err))?;
    if uri.scheme_str().is_none() || uri.host().is_none() {
        return Err(Error::new_uri());
    }
    Ok(uri)
}

/// Default port for a scheme: 443 for `https`, 80 for `http`, 443 otherwise.
pub fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" => 443,
        "http" => 80,
        _ => 443,
    }
}

/// The port a connection to this URI actually targets.
pub fn effective_port(uri: &Uri) -> u16 {
    uri.port_u16()
        .unwrap_or_else(|| default_port(uri.scheme_str().unwrap_or("")))
}

/// Host component without IPv6 brackets, suitable for DNS lookup and
/// comparison.
pub fn bare_host(uri: &Uri) -> &str {
    trim_brackets(uri.host().unwrap_or(""))
}

fn trim_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Formats the `host[:port]` string used as the authority of every request
/// in a session.
///
/// The host is wrapped in `[` `]` iff it contains a `:` (the IPv6-literal
/// heuristic); the port is appended only when the URI spells one out and it
/// differs from the scheme default.
pub fn host_port(uri: &Uri) -> String {
    let host = bare_host(uri);
    let mut out = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_owned()
    };
    if let Some(port) = uri.port_u16() {
        if port != default_port(uri.scheme_str().unwrap_or("")) {
            out.push(':');
            out.push_str(&port.to_string());
        }
    }
    out
}

/// Path plus query for the `:path` pseudo-header; `/` when the URI has no
/// path.
pub fn request_path(uri: &Uri) -> String {
    match uri.path_and_query() {
        Some(pq) => {
            let mut out = if pq.path().is_empty() {
                String::from("/")
            } else {
                pq.path().to_owned()
            };
            if let Some(query) = pq.query() {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        None => String::from("/"),
    }
}

/// Whether two URIs share a scheme, host, and effective port.
///
/// Asset links are only followed when they pass this check against the
/// request they were discovered in.
pub fn same_origin(a: &Uri, b: &Uri) -> bool {
    a.scheme_str() == b.scheme_str()
        && bare_host(a) == bare_host(b)
        && effective_port(a) == effective_port(b)
}
