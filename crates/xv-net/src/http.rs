//! HTTP request/response messages.

use crate::url::FetchUrl;
use xv_core::XvError;
use xv_core::XvResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

/// Header with a wire-safe name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> XvResult<Self> {
        if name.is_empty() || !name.bytes().all(is_token_char) {
            return Err(XvError::new(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(XvError::new(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

pub(crate) fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: FetchUrl,
    pub version: HttpVersion,
    pub headers: Vec<Header>,
}

impl HttpRequest {
    pub fn builder(method: HttpMethod, url: FetchUrl) -> HttpRequestBuilder {
        HttpRequestBuilder {
            method,
            url,
            headers: Vec::new(),
        }
    }

    pub fn request_target(&self) -> String {
        self.url.path_and_query()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoded = format!(
            "{} {} {}\r\n",
            self.method.as_str(),
            self.request_target(),
            self.version.as_str()
        )
        .into_bytes();
        for header in &self.headers {
            encoded.extend_from_slice(header.name.as_bytes());
            encoded.extend_from_slice(b": ");
            encoded.extend_from_slice(header.value.as_bytes());
            encoded.extend_from_slice(b"\r\n");
        }
        encoded.extend_from_slice(b"\r\n");
        encoded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestBuilder {
    method: HttpMethod,
    url: FetchUrl,
    headers: Vec<Header>,
}

impl HttpRequestBuilder {
    pub fn header(mut self, name: &str, value: &str) -> XvResult<Self> {
        if find_header(&self.headers, name).is_some() {
            return Err(XvError::new(
                "net.http.duplicate_header",
                format!("header `{name}` must appear at most once"),
            ));
        }
        self.headers.push(Header::new(name, value)?);
        Ok(self)
    }

    pub fn build(mut self) -> XvResult<HttpRequest> {
        if find_header(&self.headers, "host").is_none() {
            let host = self.url.authority();
            self.headers.insert(0, Header::new("Host", &host)?);
        }
        if find_header(&self.headers, "connection").is_none() {
            self.headers.push(Header::new("Connection", "close")?);
        }

        Ok(HttpRequest {
            method: self.method,
            url: self.url,
            version: HttpVersion::Http11,
            headers: self.headers,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub fn new(code: u16) -> XvResult<Self> {
        if (100..=599).contains(&code) {
            return Ok(Self(code));
        }

        Err(XvError::new(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..=299).contains(&self.0)
    }

    pub fn is_redirect(self) -> bool {
        matches!(self.0, 301 | 302 | 303 | 307 | 308)
    }

    pub fn disallows_body(self) -> bool {
        (100..200).contains(&self.0) || self.0 == 204 || self.0 == 304
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: HttpVersion,
    pub status: HttpStatusCode,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("application/octet-stream")
    }
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}

#[cfg(test)]
mod tests {
    use super::HttpMethod;
    use super::HttpRequest;
    use super::HttpStatusCode;
    use crate::url::FetchUrl;

    fn url(raw: &str) -> FetchUrl {
        match FetchUrl::parse(raw) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn build_adds_host_and_connection_headers() {
        let request = match HttpRequest::builder(HttpMethod::Get, url("http://example.com/a.xml"))
            .header("Accept", "application/xml")
            .and_then(|builder| builder.build())
        {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(request.header("host"), Some("example.com"));
        assert_eq!(request.header("Connection"), Some("close"));
        let wire = String::from_utf8_lossy(&request.encode()).into_owned();
        assert!(wire.starts_with("GET /a.xml HTTP/1.1\r\nHost: example.com\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn rejects_header_injection() {
        let builder = HttpRequest::builder(HttpMethod::Get, url("http://example.com/"))
            .header("X-Test", "a\r\nInjected: yes");
        assert!(builder.is_err());
        if let Err(error) = builder {
            assert_eq!(error.code, "net.http.header_value_invalid");
        }
    }

    #[test]
    fn classifies_status_codes() {
        assert!(HttpStatusCode::new(99).is_err());
        assert!(HttpStatusCode::new(600).is_err());
        let moved = match HttpStatusCode::new(308) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(moved.is_redirect());
        assert!(!moved.is_success());
        let no_content = match HttpStatusCode::new(204) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(no_content.disallows_body());
    }
}
