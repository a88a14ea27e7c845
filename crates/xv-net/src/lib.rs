//! Networking: URL validation, HTTP/1.1 messages and client, TLS, text decoding.

pub mod charset;
pub mod client;
pub mod http;
pub mod tls;
pub mod url;

use client::Http11Client;
use http::HttpMethod;
use http::HttpRequest;
use std::time::Duration;
use tls::TlsHandshake;
use tls::TlsPolicy;
use crate::url::FetchUrl;
use xv_core::XvError;
use xv_core::XvResult;

pub use charset::decode_text;
pub use http::Header;
pub use http::HttpResponse;
pub use http::HttpStatusCode;
pub use tls::TrustStoreMode;

const USER_AGENT: &str = concat!("xslview/", env!("CARGO_PKG_VERSION"));
pub const XML_ACCEPT_HEADER: &str =
    "application/xml, text/xml, application/xslt+xml, */*;q=0.8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub request: HttpRequest,
    pub tls: Option<TlsHandshake>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    pub allow_plain_http: bool,
    pub max_redirects: usize,
    pub connect_timeout: Duration,
    pub trust_store_mode: TrustStoreMode,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            allow_plain_http: true,
            max_redirects: 5,
            connect_timeout: Duration::from_secs(10),
            trust_store_mode: TrustStoreMode::WebPkiOnly,
        }
    }
}

/// Final response of a fetch after redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub final_url: FetchUrl,
    pub status: HttpStatusCode,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NetStack {
    config: NetConfig,
    tls_policy: TlsPolicy,
}

impl Default for NetStack {
    fn default() -> Self {
        Self::new(NetConfig::default())
    }
}

impl NetStack {
    pub fn new(config: NetConfig) -> Self {
        let tls_policy = TlsPolicy {
            allow_plain_http: config.allow_plain_http,
            trust_store_mode: config.trust_store_mode,
            ..TlsPolicy::default()
        };
        Self { config, tls_policy }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn prepare_get(&self, url: &FetchUrl, accept: &str) -> XvResult<PreparedRequest> {
        let tls = self.tls_policy.effective_for(url).handshake_for(url)?;
        let request = HttpRequest::builder(HttpMethod::Get, url.clone())
            .header("User-Agent", USER_AGENT)?
            .header("Accept", accept)?
            .header("Accept-Encoding", "gzip, deflate, br")?
            .build()?;
        Ok(PreparedRequest { request, tls })
    }

    /// Blocking GET that follows redirects up to `max_redirects`.
    pub fn fetch(&self, url: &FetchUrl, accept: &str) -> XvResult<Fetched> {
        let client = Http11Client::new(self.tls_policy.clone(), self.config.connect_timeout);
        let mut current = url.clone();
        let mut redirects = 0_usize;

        loop {
            let prepared = self.prepare_get(&current, accept)?;
            let response = client.execute(&prepared)?;
            tracing::debug!(
                url = current.as_str(),
                status = response.status.as_u16(),
                bytes = response.body.len(),
                "http response"
            );

            if response.status.is_redirect() {
                if let Some(location) = response.header("location") {
                    if redirects >= self.config.max_redirects {
                        return Err(XvError::new(
                            "net.http.too_many_redirects",
                            format!(
                                "too many redirects (>{}) while fetching {}",
                                self.config.max_redirects,
                                url.as_str()
                            ),
                        ));
                    }
                    current = current.join(location)?;
                    redirects += 1;
                    continue;
                }
            }

            return Ok(Fetched {
                content_type: response.content_type().to_owned(),
                status: response.status,
                body: response.body,
                final_url: current,
            });
        }
    }
}
