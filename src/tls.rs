//! TLS client configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::config::Config;
use crate::error::{Error, Result};

/// Protocol identifier the server must select during next-protocol
/// negotiation.
pub(crate) const ALPN_H2: &[u8] = b"h2";

/// Builds the per-session rustls client configuration: webpki trust
/// anchors, optional client authentication from PEM files, and an ALPN list
/// containing only the HTTP/2 identifier.
pub(crate) fn client_config(config: &Config) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let mut tls = match (&config.certfile, &config.keyfile) {
        (Some(certfile), Some(keyfile)) => {
            let certs = load_certs(certfile)?;
            let key = load_key(keyfile)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(Error::new_tls_setup)?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(Error::new_tls_setup(
                "client authentication needs both --cert and --key",
            ))
        }
    };
    tls.alpn_protocols = vec![ALPN_H2.to_vec()];
    Ok(Arc::new(tls))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(Error::new_tls_setup)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(Error::new_tls_setup)?;
    if certs.is_empty() {
        return Err(Error::new_tls_setup(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(Error::new_tls_setup)?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(Error::new_tls_setup)?
        .ok_or_else(|| {
            Error::new_tls_setup(format!("no private key found in {}", path.display()))
        })
}
