//! Request execution.
//!
//! [`Sender`] turns a [`Request`] into one transport exchange:
//!
//! 1. The request is validated and its headers normalized
//!    (`Content-Length` when the body size is known, `Transfer-Encoding:
//!    chunked` for live sources of unknown size). Caller-set
//!    `Content-Length` always wins.
//! 2. The body is uploaded in one of four ways: closed immediately, written
//!    in one piece, piped verbatim, or chunk-framed.
//! 3. The response is assembled from the exchange's events by a small state
//!    machine, either fully buffered or handed out as soon as its head
//!    arrives with a live body stream.
//!
//! Each exchange runs in its own tasks and owns its own channels, so one
//! `Sender` can serve any number of concurrent requests.

use crate::body::{Body, ByteStream};
use crate::error::{Error, Result};
use crate::headers::names;
use crate::pending::{deferred, Deferred, PendingResult, Progress};
use crate::request::Request;
use crate::response::{BodyStream, Response, ResponseBody};
use crate::transport::{
    DnsResolver, EventStream, H1Transport, RequestHead, RequestSink, ResponseHead, Transport,
    TransportEvent,
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::{debug, trace, warn};

/// Terminator of a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Frame one chunk as `<lowercase-hex-len>\r\n<data>\r\n`.
pub fn encode_chunk(data: &[u8]) -> Bytes {
    let size = format!("{:x}\r\n", data.len());
    let mut buf = BytesMut::with_capacity(size.len() + data.len() + 2);
    buf.extend_from_slice(size.as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf.freeze()
}

/// How the response is handed to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Resolve once the whole body has arrived.
    #[default]
    Buffered,
    /// Resolve on the response head; the body streams afterwards.
    Streaming,
}

/// How the request body goes out, decided once per send.
enum Upload {
    /// Nothing to send; end the request right away.
    Close,
    /// Whole payload in the call that ends the request.
    Buffered(Bytes),
    /// Source chunks forwarded verbatim.
    Pipe(ByteStream),
    /// Source chunks chunk-framed, then the terminator.
    Chunked(ByteStream),
}

impl Upload {
    fn name(&self) -> &'static str {
        match self {
            Upload::Close => "close",
            Upload::Buffered(_) => "buffered",
            Upload::Pipe(_) => "pipe",
            Upload::Chunked(_) => "chunked",
        }
    }
}

/// Executes requests over a transport.
#[derive(Clone)]
pub struct Sender {
    transport: Arc<dyn Transport>,
}

impl Sender {
    /// Create a sender over the given transport.
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// HTTP/1.1 over TCP/TLS with the default caching resolver.
    pub fn with_default_transport() -> Result<Self> {
        Ok(Self::new(H1Transport::new().map_err(Error::Transport)?))
    }

    /// HTTP/1.1 over TCP/TLS resolving names through `resolver`.
    pub fn with_resolver(resolver: Arc<DnsResolver>) -> Result<Self> {
        Ok(Self::new(
            H1Transport::with_resolver(resolver).map_err(Error::Transport)?,
        ))
    }

    /// HTTP/1.1 over caller-supplied connectors. See
    /// [`H1Transport::with_connectors`].
    pub fn with_connectors(
        connector: Arc<dyn crate::transport::Connector>,
        secure: Option<Arc<dyn crate::transport::Connector>>,
    ) -> Result<Self> {
        Ok(Self::new(
            H1Transport::with_connectors(connector, secure).map_err(Error::Transport)?,
        ))
    }

    /// HTTP/1.1 with every exchange going to the Unix socket at `path`.
    #[cfg(unix)]
    pub fn with_unix_socket(path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(H1Transport::unix(path))
    }

    /// Send a request; the result resolves once the whole body is in.
    pub fn send(&self, request: Request) -> PendingResult {
        self.dispatch(request, ResponseMode::Buffered)
    }

    /// Send a request; the result resolves as soon as the response head
    /// arrives, with a streaming body.
    pub fn send_streaming(&self, request: Request) -> PendingResult {
        self.dispatch(request, ResponseMode::Streaming)
    }

    /// Send a request with an explicit response mode.
    pub fn dispatch(&self, request: Request, mode: ResponseMode) -> PendingResult {
        let (head, upload) = match prepare(request) {
            Ok(prepared) => prepared,
            Err(err) => {
                debug!(error = %err, "request rejected before sending");
                return PendingResult::rejected(err);
            }
        };

        debug!(method = %head.method, uri = %head.uri, ?mode, "sending request");
        trace!(strategy = upload.name(), "request body strategy");

        let (deferred, pending) = deferred();
        let method = head.method.clone();
        let exchange = self.transport.open(head.clone());
        deferred.notify(Progress::RequestOpened(head));

        tokio::spawn(send_body(upload, exchange.sink));
        tokio::spawn(assemble(method, exchange.events, mode, deferred));

        pending
    }
}

/// Validate the request, normalize its headers and pick the upload strategy.
fn prepare(request: Request) -> Result<(RequestHead, Upload)> {
    let (method, uri, version, mut headers, body) = request.into_parts();

    if uri.scheme().is_none() || uri.host().map_or(true, str::is_empty) {
        return Err(Error::invalid(format!(
            "sending a request requires an absolute URI with scheme and host, got {:?}",
            uri.to_string()
        )));
    }

    if let Some(size) = body.size() {
        if size != 0 && !headers.contains(names::CONTENT_LENGTH) {
            headers.insert("Content-Length", size.to_string());
        }
    }

    let upload = match body {
        Body::Empty => Upload::Close,
        Body::Bytes(bytes) if bytes.is_empty() => Upload::Close,
        Body::Bytes(bytes) => Upload::Buffered(bytes),
        Body::Stream { source, .. } if headers.contains(names::CONTENT_LENGTH) => Upload::Pipe(source),
        Body::Stream { source, .. } => {
            headers.insert("Transfer-Encoding", "chunked");
            Upload::Chunked(source)
        }
    };

    let headers = headers.to_wire();
    for (name, value) in &headers {
        validate_header(name, value)?;
    }

    let head = RequestHead {
        method,
        uri,
        version,
        headers,
    };
    Ok((head, upload))
}

/// Header names must be tokens; values must not carry control bytes such
/// as CR or LF, which would end the header line on the wire.
fn validate_header(name: &str, value: &str) -> Result<()> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::invalid(format!("invalid header name {:?}", name)))?;
    HeaderValue::from_bytes(value.as_bytes())
        .map_err(|_| Error::invalid(format!("invalid value for header {:?}", name)))?;
    Ok(())
}

async fn send_body(upload: Upload, sink: RequestSink) {
    let result = match upload {
        Upload::Close => sink.end(None).await,
        Upload::Buffered(bytes) => sink.end(Some(bytes)).await,
        Upload::Pipe(source) => stream_body(source, sink, false).await,
        Upload::Chunked(source) => stream_body(source, sink, true).await,
    };

    // The sink is gone by now; the transport reports the failed exchange.
    if let Err(err) = result {
        warn!(error = %err, "request body upload aborted");
    }
}

async fn stream_body(mut source: ByteStream, sink: RequestSink, chunked: bool) -> io::Result<()> {
    while let Some(chunk) = source.next().await {
        let chunk = chunk?;
        // An empty frame would terminate a chunked body early.
        if chunk.is_empty() {
            continue;
        }
        let data = if chunked { encode_chunk(&chunk) } else { chunk };
        sink.write(data).await?;
    }
    sink.end(chunked.then(|| Bytes::from_static(LAST_CHUNK))).await
}

/// Per-exchange assembly state.
enum ExchangeState {
    /// Waiting for the response head.
    Idle,
    /// Head received, accumulating the body.
    Buffering {
        head: ResponseHead,
        expected: Option<u64>,
        body: BytesMut,
    },
}

async fn assemble(method: Method, mut events: EventStream, mode: ResponseMode, mut deferred: Deferred) {
    let mut state = ExchangeState::Idle;

    loop {
        let event = events.next().await;
        state = match (state, event) {
            (ExchangeState::Idle, Some(TransportEvent::Response(head))) => {
                debug!(status = %head.status, "response started");
                deferred.notify(Progress::ResponseStarted(head.clone()));
                let expected = expected_length(&method, &head);

                match mode {
                    ResponseMode::Streaming => {
                        let body = BodyStream::new(EventBody::new(events, expected));
                        deferred.resolve(Response::new(head, ResponseBody::Streaming(body)));
                        return;
                    }
                    ResponseMode::Buffered => ExchangeState::Buffering {
                        head,
                        expected,
                        body: BytesMut::new(),
                    },
                }
            }
            (ExchangeState::Idle, Some(TransportEvent::Error(err))) => {
                return reject(&mut deferred, Error::Transport(err));
            }
            (ExchangeState::Idle, Some(TransportEvent::Data(_))) => {
                return reject(
                    &mut deferred,
                    Error::transport_msg(io::ErrorKind::InvalidData, "body data before response head"),
                );
            }
            (ExchangeState::Idle, Some(TransportEvent::End) | None) => {
                return reject(
                    &mut deferred,
                    Error::transport_msg(
                        io::ErrorKind::UnexpectedEof,
                        "exchange closed before a response was received",
                    ),
                );
            }
            (
                ExchangeState::Buffering {
                    head,
                    expected,
                    mut body,
                },
                Some(TransportEvent::Data(data)),
            ) => {
                body.extend_from_slice(&data);
                ExchangeState::Buffering {
                    head,
                    expected,
                    body,
                }
            }
            (ExchangeState::Buffering { head, expected, body }, Some(TransportEvent::End)) => {
                let received = body.len() as u64;
                if expected.map_or(false, |expected| received < expected) {
                    return reject(&mut deferred, Error::PartialResponse { received, expected });
                }
                trace!(bytes = received, "response body complete");
                deferred.resolve(Response::new(head, ResponseBody::Buffered(body.freeze())));
                return;
            }
            (ExchangeState::Buffering { .. }, Some(TransportEvent::Error(err))) => {
                return reject(&mut deferred, Error::Transport(err));
            }
            (ExchangeState::Buffering { expected, body, .. }, None) => {
                return reject(
                    &mut deferred,
                    Error::PartialResponse {
                        received: body.len() as u64,
                        expected,
                    },
                );
            }
            (ExchangeState::Buffering { .. }, Some(TransportEvent::Response(_))) => {
                return reject(
                    &mut deferred,
                    Error::transport_msg(io::ErrorKind::InvalidData, "second response head"),
                );
            }
        };
    }
}

fn reject(deferred: &mut Deferred, err: Error) {
    debug!(error = %err, "request failed");
    deferred.reject(err);
}

/// Body length the response promises, if any.
fn expected_length(method: &Method, head: &ResponseHead) -> Option<u64> {
    let bodiless = method == Method::HEAD
        || head.status.is_informational()
        || head.status == StatusCode::NO_CONTENT
        || head.status == StatusCode::NOT_MODIFIED;
    if bodiless || head.headers.is_chunked() {
        None
    } else {
        head.headers.content_length()
    }
}

/// Streaming response body fed directly by the exchange's events.
struct EventBody {
    events: EventStream,
    expected: Option<u64>,
    received: u64,
    done: bool,
}

impl EventBody {
    fn new(events: EventStream, expected: Option<u64>) -> Self {
        Self {
            events,
            expected,
            received: 0,
            done: false,
        }
    }

    fn partial(&self) -> Error {
        Error::PartialResponse {
            received: self.received,
            expected: self.expected,
        }
    }
}

impl Stream for EventBody {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let event = ready!(Pin::new(&mut self.events).poll_next(cx));
        if !matches!(event, Some(TransportEvent::Data(_))) {
            self.done = true;
        }

        let item = match event {
            Some(TransportEvent::Data(data)) => {
                self.received += data.len() as u64;
                Some(Ok(data))
            }
            Some(TransportEvent::End) => match self.expected {
                Some(expected) if self.received < expected => Some(Err(self.partial())),
                _ => None,
            },
            Some(TransportEvent::Error(err)) => Some(Err(Error::Transport(err))),
            Some(TransportEvent::Response(_)) => Some(Err(Error::transport_msg(
                io::ErrorKind::InvalidData,
                "second response head",
            ))),
            None => Some(Err(self.partial())),
        };
        Poll::Ready(item)
    }
}
