//! Request construction: pseudo-header components and the ordered
//! regular-header block.

use http::header::{HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONTENT_LENGTH, HOST, USER_AGENT};
use http::{Method, Request, Uri, Version};

use crate::config::Config;
use crate::error::{Error, Result};

/// Builds the ordered regular-header list for one request.
///
/// The defaults (`accept`, `accept-encoding`, `user-agent`, and
/// `content-length` when a body is attached) come first, followed by user
/// headers in their configured order. A user header named `accept` or `user-agent`
/// replaces the default in place, so exactly one header with that name is
/// emitted; `host` is carried by the `:authority` pseudo-header instead and
/// never appears as a regular header.
pub(crate) fn request_headers(
    config: &Config,
    body_len: Option<u64>,
) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers: Vec<(HeaderName, HeaderValue)> = vec![
        (ACCEPT, HeaderValue::from_static("*/*")),
        (ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate")),
        (USER_AGENT, HeaderValue::from_static(crate::config::USER_AGENT)),
    ];
    if let Some(len) = body_len {
        headers.push((CONTENT_LENGTH, HeaderValue::from(len)));
    }
    for (name, value) in &config.headers {
        if *name == HOST {
            continue;
        }
        if *name == ACCEPT || *name == USER_AGENT {
            if let Some(slot) = headers.iter_mut().find(|(n, _)| *n == *name) {
                slot.1 = value.clone();
                continue;
            }
        }
        headers.push((name.clone(), value.clone()));
    }
    headers
}

/// Assembles the `http::Request` handed to the framing engine.
///
/// The engine derives `:method`, `:scheme`, `:authority` and `:path` from
/// the request line and serializes them ahead of every regular header.
pub(crate) fn build_request(
    config: &Config,
    scheme: &str,
    authority: &str,
    path: &str,
    body_len: Option<u64>,
) -> Result<Request<()>> {
    let uri = Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path)
        .build()
        .map_err(|err| Error::new_uri().with(err))?;

    let method = if body_len.is_some() {
        Method::POST
    } else {
        Method::GET
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .version(Version::HTTP_2)
        .body(())
        .map_err(|err| Error::new_uri().with(err))?;

    let map = request.headers_mut();
    for (name, value) in request_headers(config, body_len) {
        map.append(name, value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_header;

    fn names(headers: &[(HeaderName, HeaderValue)]) -> Vec<&str> {
        headers.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn default_header_order() {
        let config = Config::default();
        let headers = request_headers(&config, None);
        assert_eq!(names(&headers), ["accept", "accept-encoding", "user-agent"]);
        assert_eq!(headers[0].1, "*/*");
        assert_eq!(headers[1].1, "gzip, deflate");
        assert!(headers[2].1.to_str().unwrap().starts_with("h2fetch/"));
    }

    #[test]
    fn content_length_follows_defaults() {
        let config = Config::default();
        let headers = request_headers(&config, Some(42));
        assert_eq!(
            names(&headers),
            ["accept", "accept-encoding", "user-agent", "content-length"]
        );
        assert_eq!(headers[3].1, "42");
    }

    #[test]
    fn user_agent_override_replaces_in_place() {
        let mut config = Config::default();
        config.headers.push(parse_header("User-Agent: probe").unwrap());
        let headers = request_headers(&config, None);
        assert_eq!(names(&headers), ["accept", "accept-encoding", "user-agent"]);
        assert_eq!(headers[2].1, "probe");
    }

    #[test]
    fn accept_override_replaces_in_place() {
        let mut config = Config::default();
        config.headers.push(parse_header("Accept: text/html").unwrap());
        let headers = request_headers(&config, None);
        let count = headers.iter().filter(|(n, _)| *n == ACCEPT).count();
        assert_eq!(count, 1);
        assert_eq!(headers[0].1, "text/html");
    }

    #[test]
    fn extra_headers_append_in_order() {
        let mut config = Config::default();
        config.headers.push(parse_header("x-first: 1").unwrap());
        config.headers.push(parse_header("x-second: 2").unwrap());
        let headers = request_headers(&config, None);
        assert_eq!(
            names(&headers),
            ["accept", "accept-encoding", "user-agent", "x-first", "x-second"]
        );
    }

    #[test]
    fn host_header_is_not_a_regular_header() {
        let mut config = Config::default();
        config.headers.push(parse_header("Host: elsewhere").unwrap());
        let headers = request_headers(&config, None);
        assert!(!headers.iter().any(|(n, _)| *n == HOST));
    }

    #[test]
    fn build_request_sets_pseudo_components() {
        let config = Config::default();
        let request =
            build_request(&config, "https", "example.test", "/a?x=1", None).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.uri().scheme_str(), Some("https"));
        assert_eq!(request.uri().authority().unwrap().as_str(), "example.test");
        assert_eq!(request.uri().path_and_query().unwrap().as_str(), "/a?x=1");
        assert_eq!(request.version(), Version::HTTP_2);
    }

    #[test]
    fn build_request_post_when_uploading() {
        let config = Config::default();
        let request = build_request(&config, "https", "h", "/submit", Some(3)).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.headers().get(CONTENT_LENGTH).unwrap(), "3");
    }
}
