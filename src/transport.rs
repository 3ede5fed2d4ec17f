//! Transport establishment: DNS, TCP, optional TLS, and next-protocol
//! enforcement.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::tls::ALPN_H2;

/// The session's byte pipe: a bare TCP stream, or one wrapped in TLS.
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Connects to `host:port` with Nagle disabled. When a TLS config is
/// given, also performs the handshake and requires the peer to have
/// selected the HTTP/2 protocol identifier.
///
/// `server_name` is the SNI value; it follows a user-supplied `Host` header
/// when one is configured, and the connect host otherwise.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    server_name: &str,
    tls: Option<&Arc<rustls::ClientConfig>>,
) -> Result<Stream> {
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(Error::new_connect)?;
    tcp.set_nodelay(true).map_err(Error::new_connect)?;
    trace!("connected to {}:{}", host, port);

    let tls = match tls {
        Some(tls) => tls,
        None => return Ok(Stream::Plain(tcp)),
    };

    let name = ServerName::try_from(server_name.to_owned())
        .map_err(Error::new_handshake)?;
    let stream = TlsConnector::from(tls.clone())
        .connect(name, tcp)
        .await
        .map_err(Error::new_handshake)?;

    let (_, session) = stream.get_ref();
    match session.alpn_protocol() {
        Some(proto) if proto == ALPN_H2 => {
            debug!("next protocol negotiated: h2");
            Ok(Stream::Tls(Box::new(stream)))
        }
        selected => {
            debug!(
                "server selected {:?} instead of h2",
                selected.map(String::from_utf8_lossy)
            );
            Err(Error::new_negotiation())
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Stream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Stream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Stream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Stream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
