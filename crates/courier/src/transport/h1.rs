//! HTTP/1.1 transport.
//!
//! One connection per exchange, no pooling. The request head is serialized
//! here; body bytes are written exactly as they arrive from the sink. The
//! response head is parsed with `httparse` and the body is delivered as
//! `Data` events, de-framed according to the response headers.

use super::connector::{Connector, Target, TcpConnector, TlsConnector};
use super::dns::DnsResolver;
use super::{
    exchange, EventEmitter, Exchange, ExchangeIo, RequestHead, ResponseHead, SinkMessage,
    SinkReceiver, Transport, TransportEvent, DEFAULT_CHANNEL_CAPACITY,
};
use crate::headers::{names, HeaderMap};
use bytes::Bytes;
use http::{Method, StatusCode, Version};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

/// Maximum number of response headers accepted.
const MAX_HEADERS: usize = 100;

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 4096;

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Upper bound on establishing a connection (including TLS).
    pub connect_timeout: Duration,
    /// Capacity of the per-exchange channels.
    pub channel_capacity: usize,
    /// Largest accepted response head in bytes.
    pub max_head_size: usize,
    /// Read buffer size; also the largest `Data` event emitted.
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_head_size: 64 * 1024,
            read_buffer_size: 16 * 1024,
        }
    }
}

/// HTTP/1.1 transport over pluggable connectors.
#[derive(Clone)]
pub struct H1Transport {
    http: Arc<dyn Connector>,
    https: Arc<dyn Connector>,
    config: TransportConfig,
}

impl H1Transport {
    /// TCP with the default caching resolver, TLS with webpki roots.
    pub fn new() -> io::Result<Self> {
        Self::with_resolver(Arc::new(DnsResolver::new()))
    }

    /// Like [`H1Transport::new`], resolving names through `resolver`.
    pub fn with_resolver(resolver: Arc<DnsResolver>) -> io::Result<Self> {
        let tcp: Arc<dyn Connector> = Arc::new(TcpConnector::with_resolver(resolver));
        Self::with_connectors(tcp, None)
    }

    /// Use caller-supplied connectors. Without a secure connector, TLS is
    /// layered over `connector`.
    pub fn with_connectors(
        connector: Arc<dyn Connector>,
        secure: Option<Arc<dyn Connector>>,
    ) -> io::Result<Self> {
        let https = match secure {
            Some(secure) => secure,
            None => Arc::new(TlsConnector::new(connector.clone())?),
        };
        Ok(Self {
            http: connector,
            https,
            config: TransportConfig::default(),
        })
    }

    /// Send every exchange through the Unix socket at `path`. The request
    /// line and `Host` header still carry the URI's host and path.
    #[cfg(unix)]
    pub fn unix(path: impl Into<std::path::PathBuf>) -> Self {
        let connector: Arc<dyn Connector> = Arc::new(super::connector::UnixConnector::new(path));
        Self {
            http: connector.clone(),
            https: connector,
            config: TransportConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Get transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Transport for H1Transport {
    fn open(&self, head: RequestHead) -> Exchange {
        let (exchange, io) = exchange(self.config.channel_capacity.max(1));
        let this = self.clone();
        tokio::spawn(async move { this.run(head, io).await });
        exchange
    }
}

impl H1Transport {
    async fn run(self, head: RequestHead, io: ExchangeIo) {
        let ExchangeIo { body, events } = io;
        if let Err(err) = self.drive(&head, body, &events).await {
            debug!(method = %head.method, uri = %head.uri, error = %err, "exchange failed");
            events.emit(TransportEvent::Error(err)).await;
        }
    }

    async fn drive(
        &self,
        head: &RequestHead,
        mut body: SinkReceiver,
        events: &EventEmitter,
    ) -> io::Result<()> {
        let target = Target::from_uri(&head.uri)?;
        let connector = if target.secure { &self.https } else { &self.http };

        let stream = tokio::time::timeout(self.config.connect_timeout, connector.connect(&target))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

        let (reader, mut writer) = tokio::io::split(stream);
        writer.write_all(&encode_head(head)).await?;

        loop {
            match body.next().await {
                Some(SinkMessage::Write(data)) => writer.write_all(&data).await?,
                Some(SinkMessage::End(data)) => {
                    if let Some(data) = data {
                        writer.write_all(&data).await?;
                    }
                    break;
                }
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "request closed before it was ended",
                    ))
                }
            }
        }
        writer.flush().await?;
        trace!(uri = %head.uri, "request written");

        let mut reader = BufReader::with_capacity(self.config.read_buffer_size.max(1), reader);
        let response = read_response_head(&mut reader, self.config.max_head_size).await?;
        let framing = Framing::for_response(&head.method, &response);
        debug!(status = %response.status, ?framing, "response head received");

        emit(events, TransportEvent::Response(response)).await?;

        match framing {
            Framing::Empty => {}
            Framing::Length(len) => {
                // A short body still ends cleanly; the sender compares
                // against Content-Length.
                forward(&mut reader, Some(len), events).await?;
            }
            Framing::Chunked => read_chunked(&mut reader, events, self.config.max_head_size).await?,
            Framing::UntilClose => {
                forward(&mut reader, None, events).await?;
            }
        }

        emit(events, TransportEvent::End).await
    }
}

/// How the response body is delimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

impl Framing {
    fn for_response(method: &Method, head: &ResponseHead) -> Self {
        if method == Method::HEAD
            || head.status.is_informational()
            || head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            Framing::Empty
        } else if head.headers.is_chunked() {
            Framing::Chunked
        } else if let Some(len) = head.headers.content_length() {
            Framing::Length(len)
        } else {
            Framing::UntilClose
        }
    }
}

/// Serialize the request line and headers.
fn encode_head(head: &RequestHead) -> Vec<u8> {
    let path = head
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");
    let version = if head.version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    };

    let mut req = Vec::with_capacity(256);
    req.extend_from_slice(head.method.as_str().as_bytes());
    req.push(b' ');
    if !path.starts_with('/') {
        req.push(b'/');
    }
    req.extend_from_slice(path.as_bytes());
    req.push(b' ');
    req.extend_from_slice(version.as_bytes());
    req.extend_from_slice(b"\r\n");

    if head.header(names::HOST).is_none() {
        if let Some(host) = head.uri.host() {
            req.extend_from_slice(b"Host: ");
            req.extend_from_slice(host.as_bytes());
            if let Some(port) = head.uri.port_u16() {
                req.extend_from_slice(format!(":{}", port).as_bytes());
            }
            req.extend_from_slice(b"\r\n");
        }
    }

    for (name, value) in &head.headers {
        req.extend_from_slice(name.as_bytes());
        req.extend_from_slice(b": ");
        req.extend_from_slice(value.as_bytes());
        req.extend_from_slice(b"\r\n");
    }

    req.extend_from_slice(b"\r\n");
    req
}

/// Read and parse a response head, skipping interim 1xx responses.
async fn read_response_head<R>(reader: &mut R, max_size: usize) -> io::Result<ResponseHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    loop {
        let n = read_line_within(reader, &mut buf, max_size, "response head").await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response head",
            ));
        }
        if !(buf.ends_with(b"\r\n\r\n") || buf.ends_with(b"\n\n")) {
            continue;
        }

        let head = parse_response_head(&buf)?;
        if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
            trace!(status = %head.status, "skipping interim response");
            buf.clear();
            continue;
        }
        return Ok(head);
    }
}

fn parse_response_head(buf: &[u8]) -> io::Result<ResponseHead> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(invalid_data("incomplete response head")),
        Err(err) => return Err(invalid_data(format!("malformed response head: {}", err))),
    }

    let version = match response.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let status = StatusCode::from_u16(response.code.unwrap_or(0))
        .map_err(|e| invalid_data(e.to_string()))?;
    let reason = response.reason.unwrap_or("").to_string();

    let mut map = HeaderMap::new();
    for header in response.headers.iter() {
        map.append(header.name, String::from_utf8_lossy(header.value).into_owned());
    }

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers: map,
    })
}

/// Forward body bytes until `limit` is reached or the peer closes.
/// Returns the number of bytes forwarded.
async fn forward<R>(reader: &mut R, limit: Option<u64>, events: &EventEmitter) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut sent = 0u64;
    while limit.map_or(true, |limit| sent < limit) {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        let take = match limit {
            Some(limit) => buf.len().min(usize::try_from(limit - sent).unwrap_or(usize::MAX)),
            None => buf.len(),
        };
        let chunk = Bytes::copy_from_slice(&buf[..take]);
        reader.consume(take);
        sent += take as u64;
        emit(events, TransportEvent::Data(chunk)).await?;
    }
    Ok(sent)
}

/// Append one line to `buf`, reading at most one byte past `max_len` in
/// total. Fails once `buf` outgrows `max_len`.
async fn read_line_within<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
    what: &str,
) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let budget = (max_len + 1).saturating_sub(buf.len()) as u64;
    let n = (&mut *reader).take(budget).read_until(b'\n', buf).await?;
    if buf.len() > max_len {
        return Err(invalid_data(format!("{} too large", what)));
    }
    Ok(n)
}

/// Decode a chunked body, forwarding each chunk's payload. Trailers are
/// read and discarded, up to `max_trailer_size` bytes in total.
async fn read_chunked<R>(reader: &mut R, events: &EventEmitter, max_trailer_size: usize) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        if read_line_within(reader, &mut line, MAX_CHUNK_LINE, "chunk size line").await? == 0 {
            return Err(truncated());
        }
        let line = std::str::from_utf8(&line).map_err(|_| invalid_data("invalid chunk size line"))?;
        // Strip chunk extensions (;key=value).
        let size_hex = line.trim_end().split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_hex, 16)
            .map_err(|_| invalid_data(format!("invalid chunk size: {:?}", size_hex)))?;

        if size == 0 {
            let mut trailers = Vec::new();
            loop {
                let start = trailers.len();
                let n = read_line_within(reader, &mut trailers, max_trailer_size, "chunked trailer").await?;
                if n == 0 || trailers[start..].iter().all(u8::is_ascii_whitespace) {
                    return Ok(());
                }
            }
        }

        if forward(reader, Some(size), events).await? < size {
            return Err(truncated());
        }

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(invalid_data("missing CRLF after chunk"));
        }
    }
}

async fn emit(events: &EventEmitter, event: TransportEvent) -> io::Result<()> {
    if events.emit(event).await {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "exchange events dropped",
        ))
    }
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn truncated() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed inside chunked body",
    )
}
