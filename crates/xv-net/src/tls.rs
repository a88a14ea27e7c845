//! TLS policy and the rustls connector.

use crate::url::FetchUrl;
use crate::url::Scheme;
use std::net::TcpStream;
use xv_core::XvError;
use xv_core::XvResult;

#[cfg(feature = "tls-rustls")]
use rustls::ClientConfig;
#[cfg(feature = "tls-rustls")]
use rustls::ClientConnection;
#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use rustls::StreamOwned;
#[cfg(feature = "tls-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

/// Trust anchors used to verify server certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustStoreMode {
    /// Embedded Mozilla roots only.
    #[default]
    WebPkiOnly,
    /// Embedded roots merged with the operating-system store.
    WebPkiAndOs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    pub allow_plain_http: bool,
    pub require_sni: bool,
    pub trust_store_mode: TrustStoreMode,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            allow_plain_http: true,
            require_sni: true,
            trust_store_mode: TrustStoreMode::WebPkiOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsHandshake {
    pub server_name: String,
    pub enable_sni: bool,
}

impl TlsPolicy {
    /// Local development endpoints often run over plain HTTP or on raw IPs.
    pub fn effective_for(&self, url: &FetchUrl) -> Self {
        let mut out = self.clone();
        if url.is_local_network() {
            out.allow_plain_http = true;
            out.require_sni = false;
        }
        out
    }

    pub fn handshake_for(&self, url: &FetchUrl) -> XvResult<Option<TlsHandshake>> {
        match url.scheme() {
            Scheme::Http if self.allow_plain_http => Ok(None),
            Scheme::Http => Err(XvError::new(
                "net.tls.https_only",
                format!("plain HTTP is disabled, refusing `{}`", url.as_str()),
            )),
            Scheme::Https => {
                let is_ip = url.host().parse::<std::net::IpAddr>().is_ok();
                if self.require_sni && is_ip {
                    return Err(XvError::new(
                        "net.tls.sni_host_invalid",
                        "SNI requires a DNS host, not a raw IP address",
                    ));
                }
                Ok(Some(TlsHandshake {
                    server_name: url.host().to_owned(),
                    enable_sni: !is_ip,
                }))
            }
        }
    }
}

pub trait IoStream: std::io::Read + std::io::Write + Send {}
impl<T> IoStream for T where T: std::io::Read + std::io::Write + Send {}

pub type BoxedIoStream = Box<dyn IoStream>;

#[cfg(feature = "tls-rustls")]
pub fn connect_tls(
    mut stream: TcpStream,
    handshake: &TlsHandshake,
    policy: &TlsPolicy,
) -> XvResult<BoxedIoStream> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|error| {
            XvError::new(
                "net.tls.config_versions_invalid",
                format!("failed to configure TLS protocol versions: {error}"),
            )
        })?
        .with_root_certificates(root_store(policy.trust_store_mode)?)
        .with_no_client_auth();
    config.enable_sni = handshake.enable_sni;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let server_name = ServerName::try_from(handshake.server_name.clone()).map_err(|error| {
        XvError::new(
            "net.tls.server_name_invalid",
            format!("invalid TLS server name `{}`: {error}", handshake.server_name),
        )
    })?;

    let mut connection = ClientConnection::new(Arc::new(config), server_name).map_err(|error| {
        XvError::new(
            "net.tls.connection_init_failed",
            format!(
                "failed to initialize TLS connection for `{}`: {error}",
                handshake.server_name
            ),
        )
    })?;

    connection.complete_io(&mut stream).map_err(|error| {
        XvError::new(
            "net.tls.handshake_failed",
            format!("TLS handshake failed for `{}`: {error}", handshake.server_name),
        )
    })?;

    Ok(Box::new(StreamOwned::new(connection, stream)))
}

#[cfg(feature = "tls-rustls")]
fn root_store(mode: TrustStoreMode) -> XvResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if mode == TrustStoreMode::WebPkiAndOs {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            tracing::warn!(%error, "skipping unreadable operating-system root");
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!(added, ignored, "merged operating-system roots");
    }

    if roots.is_empty() {
        return Err(XvError::new(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }

    Ok(roots)
}

#[cfg(not(feature = "tls-rustls"))]
pub fn connect_tls(
    _stream: TcpStream,
    _handshake: &TlsHandshake,
    _policy: &TlsPolicy,
) -> XvResult<BoxedIoStream> {
    Err(XvError::new(
        "net.tls.backend_unavailable",
        "rustls backend is disabled for this build; enable `xv-net/tls-rustls`",
    ))
}

#[cfg(test)]
mod tests {
    use super::TlsPolicy;
    use crate::url::FetchUrl;

    fn url(raw: &str) -> FetchUrl {
        match FetchUrl::parse(raw) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn https_gets_handshake_plain_http_does_not() {
        let policy = TlsPolicy::default();
        let secure = policy.handshake_for(&url("https://example.com/"));
        assert!(matches!(secure, Ok(Some(_))));
        let plain = policy.handshake_for(&url("http://example.com/"));
        assert!(matches!(plain, Ok(None)));
    }

    #[test]
    fn https_only_blocks_public_http_but_not_localhost() {
        let policy = TlsPolicy {
            allow_plain_http: false,
            ..TlsPolicy::default()
        };
        let public = url("http://example.com/");
        assert!(policy.effective_for(&public).handshake_for(&public).is_err());

        let local = url("http://127.0.0.1:8000/jobs.xml");
        assert!(policy.effective_for(&local).handshake_for(&local).is_ok());
    }

    #[test]
    fn raw_ip_requires_relaxed_sni() {
        let policy = TlsPolicy::default();
        let ip = url("https://93.184.216.34/");
        assert!(policy.handshake_for(&ip).is_err());
    }
}
