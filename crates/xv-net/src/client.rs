//! Blocking HTTP/1.1 client: connect, write, read, decode.

use crate::PreparedRequest;
use crate::http::Header;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::http::HttpVersion;
use crate::http::find_header;
use crate::tls::BoxedIoStream;
use crate::tls::TlsPolicy;
use crate::tls::connect_tls;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;
use xv_core::XvError;
use xv_core::XvResult;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;

/// One request per connection; every request carries `Connection: close`.
#[derive(Debug, Clone)]
pub struct Http11Client {
    tls_policy: TlsPolicy,
    connect_timeout: Duration,
}

impl Http11Client {
    pub fn new(tls_policy: TlsPolicy, connect_timeout: Duration) -> Self {
        Self {
            tls_policy,
            connect_timeout,
        }
    }

    pub fn execute(&self, prepared: &PreparedRequest) -> XvResult<HttpResponse> {
        let url = &prepared.request.url;
        if url.is_secure() != prepared.tls.is_some() {
            return Err(XvError::new(
                "net.http.tls_mismatch",
                format!("TLS configuration does not match scheme of `{}`", url.as_str()),
            ));
        }

        let addresses = resolve(url.host(), url.port())?;
        let tcp = connect_first_available(&addresses, self.connect_timeout)?;
        let mut stream: BoxedIoStream = match &prepared.tls {
            Some(handshake) => {
                connect_tls(tcp, handshake, &self.tls_policy.effective_for(url))?
            }
            None => Box::new(tcp),
        };

        write_request(&mut stream, &prepared.request)?;
        read_response(&mut stream, &prepared.request)
    }
}

fn resolve(host: &str, port: u16) -> XvResult<Vec<SocketAddr>> {
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|error| {
            XvError::new(
                "net.dns.resolve_failed",
                format!("failed to resolve `{host}:{port}`: {error}"),
            )
        })?
        .collect();

    if addresses.is_empty() {
        return Err(XvError::new(
            "net.dns.no_results",
            format!("resolver returned no addresses for `{host}:{port}`"),
        ));
    }
    Ok(addresses)
}

fn connect_first_available(addresses: &[SocketAddr], timeout: Duration) -> XvResult<TcpStream> {
    let mut last_error: Option<XvError> = None;

    for address in addresses {
        match connect(*address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                tracing::debug!(%address, %error, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        XvError::new(
            "net.transport.no_addresses",
            "no addresses available to open a connection",
        )
    }))
}

fn connect(address: SocketAddr, timeout: Duration) -> XvResult<TcpStream> {
    let stream = TcpStream::connect_timeout(&address, timeout).map_err(|error| {
        XvError::new(
            "net.transport.connect_failed",
            format!("failed to connect to `{address}`: {error}"),
        )
    })?;

    stream
        .set_nodelay(true)
        .and_then(|()| stream.set_read_timeout(Some(timeout)))
        .and_then(|()| stream.set_write_timeout(Some(timeout)))
        .map_err(|error| {
            XvError::new(
                "net.transport.configure_failed",
                format!("failed to configure socket for `{address}`: {error}"),
            )
        })?;

    Ok(stream)
}

fn write_request(stream: &mut dyn Write, request: &HttpRequest) -> XvResult<()> {
    stream
        .write_all(&request.encode())
        .and_then(|()| stream.flush())
        .map_err(|error| {
            XvError::new(
                "net.http.write_failed",
                format!("failed to write HTTP request: {error}"),
            )
        })
}

pub(crate) fn read_response(stream: &mut dyn Read, request: &HttpRequest) -> XvResult<HttpResponse> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }

        let read = stream.read(&mut chunk).map_err(|error| {
            XvError::new(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;
        if read == 0 {
            return Err(XvError::new(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(XvError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }
    };

    let head_text = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let prefetched = buffer[header_end..].to_vec();

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let (version, status) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            XvError::new(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    if request.method.as_str() == "HEAD" || status.disallows_body() {
        return Ok(HttpResponse {
            version,
            status,
            headers,
            body: Vec::new(),
        });
    }

    let body = match find_header(&headers, "transfer-encoding") {
        Some(value) if header_value_has(value, "chunked") => read_chunked_body(stream, prefetched)?,
        Some(other) => {
            return Err(XvError::new(
                "net.http.transfer_encoding_unsupported",
                format!("unsupported transfer encoding `{other}`"),
            ));
        }
        None => match parse_content_length(&headers)? {
            Some(length) => read_exact_body(stream, prefetched, length)?,
            None => read_to_close(stream, prefetched)?,
        },
    };

    let body = decode_content_encoding(&headers, body)?;
    Ok(HttpResponse {
        version,
        status,
        headers,
        body,
    })
}

fn read_exact_body(stream: &mut dyn Read, mut body: Vec<u8>, length: usize) -> XvResult<Vec<u8>> {
    if body.len() >= length {
        body.truncate(length);
        return Ok(body);
    }

    let start = body.len();
    body.resize(length, 0);
    stream.read_exact(&mut body[start..]).map_err(|error| {
        XvError::new(
            "net.http.read_body_failed",
            format!("failed to read HTTP body bytes: {error}"),
        )
    })?;
    Ok(body)
}

fn read_to_close(stream: &mut dyn Read, mut body: Vec<u8>) -> XvResult<Vec<u8>> {
    stream.read_to_end(&mut body).map_err(|error| {
        XvError::new(
            "net.http.read_body_failed",
            format!("failed while draining connection-close response body: {error}"),
        )
    })?;
    Ok(body)
}

/// Reads prefetched bytes first, then the socket.
struct PrefixedReader<'a> {
    prefetched: Cursor<Vec<u8>>,
    stream: &'a mut dyn Read,
}

impl Read for PrefixedReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let read = self.prefetched.read(out)?;
        if read > 0 {
            return Ok(read);
        }
        self.stream.read(out)
    }
}

fn read_chunked_body(stream: &mut dyn Read, prefetched: Vec<u8>) -> XvResult<Vec<u8>> {
    let mut reader = PrefixedReader {
        prefetched: Cursor::new(prefetched),
        stream,
    };
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            XvError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            // Trailers are read and dropped.
            while !read_crlf_line(&mut reader)?.is_empty() {}
            break;
        }

        let start = decoded.len();
        decoded.resize(start + chunk_size, 0);
        let mut terminator = [0_u8; 2];
        reader
            .read_exact(&mut decoded[start..])
            .and_then(|()| reader.read_exact(&mut terminator))
            .map_err(|error| {
                XvError::new(
                    "net.http.read_body_failed",
                    format!("failed while reading chunked HTTP body: {error}"),
                )
            })?;
        if terminator != *b"\r\n" {
            return Err(XvError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }

    Ok(decoded)
}

fn read_crlf_line(reader: &mut PrefixedReader<'_>) -> XvResult<String> {
    let mut line = Vec::new();
    let mut byte = [0_u8; 1];

    loop {
        reader.read_exact(&mut byte).map_err(|error| {
            XvError::new(
                "net.http.read_body_failed",
                format!("failed while reading chunked transfer line: {error}"),
            )
        })?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(XvError::new(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }

        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> XvResult<(HttpVersion, HttpStatusCode)> {
    let mut parts = line.splitn(3, ' ');
    let version = match parts.next() {
        Some("HTTP/1.0") => HttpVersion::Http10,
        Some("HTTP/1.1") => HttpVersion::Http11,
        other => {
            return Err(XvError::new(
                "net.http.version_unsupported",
                format!("unsupported response version `{}`", other.unwrap_or_default()),
            ));
        }
    };

    let code_text = parts.next().unwrap_or_default();
    let code = code_text.parse::<u16>().map_err(|error| {
        XvError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}` in `{line}`: {error}"),
        )
    })?;

    Ok((version, HttpStatusCode::new(code)?))
}

fn parse_content_length(headers: &[Header]) -> XvResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-length"))
    {
        let parsed = header.value.trim().parse::<usize>().map_err(|error| {
            XvError::new(
                "net.http.content_length_invalid",
                format!("invalid Content-Length `{}`: {error}", header.value),
            )
        })?;
        if value.is_some_and(|existing| existing != parsed) {
            return Err(XvError::new(
                "net.http.content_length_conflict",
                "conflicting Content-Length headers in response",
            ));
        }
        value = Some(parsed);
    }
    Ok(value)
}

fn header_value_has(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

fn decode_content_encoding(headers: &[Header], body: Vec<u8>) -> XvResult<Vec<u8>> {
    let encodings: Vec<String> = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut decoded = body;
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(Cursor::new(decoded)), "gzip")?,
            "deflate" => decode_deflate(decoded)?,
            "br" => read_all(Decompressor::new(Cursor::new(decoded), 4096), "brotli")?,
            _ => {
                return Err(XvError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn decode_deflate(body: Vec<u8>) -> XvResult<Vec<u8>> {
    // Servers disagree on whether "deflate" means zlib-wrapped or raw.
    let mut zlib = Vec::new();
    if ZlibDecoder::new(Cursor::new(&body))
        .read_to_end(&mut zlib)
        .is_ok()
    {
        return Ok(zlib);
    }
    read_all(DeflateDecoder::new(Cursor::new(body)), "deflate")
}

fn read_all(mut reader: impl Read, label: &str) -> XvResult<Vec<u8>> {
    let mut decoded = Vec::new();
    reader.read_to_end(&mut decoded).map_err(|error| {
        XvError::new(
            "net.http.decode_failed",
            format!("{label} decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}
