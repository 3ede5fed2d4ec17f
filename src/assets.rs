//! Discovery of linked assets in HTML responses.
//!
//! A small streaming tag scanner stands in for a full HTML engine: it
//! recognizes `<link href>`, `<img src>` and `<script src>` wherever they
//! appear, tolerates tags split across DATA-frame boundaries, and resolves
//! relative references against the response's own URI. The caller applies
//! the same-origin filter; this module only reports what the page links to.

use http::Uri;

/// Longest tag the scanner will buffer while waiting for its closing `>`.
/// Anything longer is treated as stray text (an unclosed `<` in a script
/// body, for example) and dropped.
const MAX_TAG: usize = 8 * 1024;

pub(crate) struct LinkExtractor {
    base_scheme: String,
    base_authority: String,
    /// Directory of the base path, always ending in `/`.
    base_dir: String,
    /// Unconsumed bytes carried between pushes: at most one partial tag.
    pending: Vec<u8>,
}

impl LinkExtractor {
    pub(crate) fn new(base: &Uri) -> LinkExtractor {
        let path = base.path();
        let base_dir = match path.rfind('/') {
            Some(at) => path[..=at].to_owned(),
            None => String::from("/"),
        };
        LinkExtractor {
            base_scheme: base.scheme_str().unwrap_or("https").to_owned(),
            base_authority: base
                .authority()
                .map(|a| a.as_str().to_owned())
                .unwrap_or_default(),
            base_dir,
            pending: Vec::new(),
        }
    }

    /// Feeds one chunk of response bytes and returns the URIs of any links
    /// completed by it. `is_final` marks end of stream; whatever is still
    /// buffered then cannot become a tag and is discarded.
    pub(crate) fn push(&mut self, chunk: &[u8], is_final: bool) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut links = Vec::new();
        let mut pos = 0;
        loop {
            let open = match find(&self.pending, pos, b'<') {
                Some(at) => at,
                None => {
                    pos = self.pending.len();
                    break;
                }
            };
            let close = match find(&self.pending, open + 1, b'>') {
                Some(at) => at,
                None => {
                    pos = open;
                    break;
                }
            };
            if let Some(link) = self.scan_tag(&self.pending[open + 1..close]) {
                links.push(link);
            }
            pos = close + 1;
        }
        self.pending.drain(..pos);

        if is_final || self.pending.len() > MAX_TAG {
            self.pending.clear();
        }
        links
    }

    /// Inspects one tag body (the bytes between `<` and `>`) and returns the
    /// resolved link target if it is an asset reference.
    fn scan_tag(&self, tag: &[u8]) -> Option<String> {
        let (name, rest) = split_name(tag)?;
        let wanted: &[u8] = if name.eq_ignore_ascii_case(b"link") {
            b"href"
        } else if name.eq_ignore_ascii_case(b"img") || name.eq_ignore_ascii_case(b"script") {
            b"src"
        } else {
            return None;
        };
        let value = attribute(rest, wanted)?;
        let value = String::from_utf8_lossy(value);
        self.resolve(value.trim())
    }

    /// Resolves a reference against the base URI. Non-HTTP schemes
    /// (`mailto:`, `data:`, `javascript:` and friends) resolve to nothing.
    fn resolve(&self, reference: &str) -> Option<String> {
        if reference.is_empty() {
            return None;
        }
        if let Some(scheme_len) = scheme_prefix(reference) {
            let scheme = &reference[..scheme_len];
            if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
                return Some(reference.to_owned());
            }
            return None;
        }
        if let Some(rest) = reference.strip_prefix("//") {
            return Some(format!("{}://{}", self.base_scheme, rest));
        }
        let origin = format!("{}://{}", self.base_scheme, self.base_authority);
        if reference.starts_with('/') {
            Some(format!("{}{}", origin, reference))
        } else {
            Some(format!("{}{}{}", origin, self.base_dir, reference))
        }
    }
}

fn find(haystack: &[u8], from: usize, needle: u8) -> Option<usize> {
    haystack[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|at| from + at)
}

/// Splits a tag body into its name and the attribute region. Tags whose
/// name does not start with an ASCII letter (comments, doctypes, closing
/// tags) yield nothing.
fn split_name(tag: &[u8]) -> Option<(&[u8], &[u8])> {
    let first = *tag.first()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    let end = tag
        .iter()
        .position(|b| !b.is_ascii_alphanumeric())
        .unwrap_or(tag.len());
    Some((&tag[..end], &tag[end..]))
}

/// Finds `name=value` in a tag's attribute region, handling double-quoted,
/// single-quoted and bare values.
fn attribute<'a>(mut rest: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    loop {
        // skip whitespace and stray slashes between attributes
        let start = rest
            .iter()
            .position(|b| !b.is_ascii_whitespace() && *b != b'/')?;
        rest = &rest[start..];

        let name_end = rest
            .iter()
            .position(|b| b.is_ascii_whitespace() || *b == b'=')
            .unwrap_or(rest.len());
        let (attr, after) = rest.split_at(name_end);

        let mut after = skip_whitespace(after);
        let value = if let Some(b'=') = after.first() {
            after = skip_whitespace(&after[1..]);
            match after.first()? {
                b'"' | b'\'' => {
                    let quote = after[0];
                    let end = find(after, 1, quote)?;
                    let value = &after[1..end];
                    after = &after[end + 1..];
                    value
                }
                _ => {
                    let end = after
                        .iter()
                        .position(|b| b.is_ascii_whitespace())
                        .unwrap_or(after.len());
                    let value = &after[..end];
                    after = &after[end..];
                    value
                }
            }
        } else {
            // boolean attribute, no value
            &[]
        };

        if attr.eq_ignore_ascii_case(name) && !value.is_empty() {
            return Some(value);
        }
        if after.is_empty() {
            return None;
        }
        rest = after;
    }
}

fn skip_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

/// Length of a leading URI scheme (`letter (letter|digit|+|-|.)*` before a
/// `:`), if the reference starts with one.
fn scheme_prefix(reference: &str) -> Option<usize> {
    let bytes = reference.as_bytes();
    if !bytes.first()?.is_ascii_alphabetic() {
        return None;
    }
    for (at, &b) in bytes.iter().enumerate().skip(1) {
        match b {
            b':' => return Some(at),
            b if b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.' => {}
            _ => return None,
        }
    }
    None
}
