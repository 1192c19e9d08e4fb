//! Transport seam.
//!
//! A [`Transport`] opens one exchange per request. The exchange is a
//! [`RequestSink`] the sender writes body bytes into, plus an
//! [`EventStream`] carrying the response as typed [`TransportEvent`]s.
//! Transports write body bytes exactly as they receive them; any framing
//! (such as chunked encoding) is already applied by the sender.

pub mod connector;
pub mod dns;
pub mod h1;
#[cfg(test)]
pub(crate) mod mock;

use crate::headers::HeaderMap;
use bytes::Bytes;
use futures::Stream;
use http::{Method, StatusCode, Uri, Version};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

pub use connector::{Connector, TcpConnector, TlsConnector};
#[cfg(unix)]
pub use connector::UnixConnector;
pub use dns::{DnsConfig, DnsResolver};
pub use h1::{H1Transport, TransportConfig};

/// Default capacity of the per-exchange channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Opens exchanges for outgoing requests.
pub trait Transport: Send + Sync + 'static {
    /// Start a new exchange. Must not block; connection work happens in the
    /// background and is reported through the returned event stream.
    fn open(&self, head: RequestHead) -> Exchange;
}

/// Request line and headers as they are handed to the transport.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    /// Header pairs with multiple values already joined.
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// First header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status line and headers of a response.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

/// Something that happened on an exchange.
#[derive(Debug)]
pub enum TransportEvent {
    /// The response head arrived. Always precedes any `Data`.
    Response(ResponseHead),
    /// A piece of the response body, in stream order.
    Data(Bytes),
    /// The response body is complete.
    End,
    /// The exchange failed.
    Error(io::Error),
}

/// Instructions flowing from the sender to the transport.
#[derive(Debug)]
pub enum SinkMessage {
    Write(Bytes),
    End(Option<Bytes>),
}

/// One in-flight exchange, as seen by the sender.
#[derive(Debug)]
pub struct Exchange {
    pub sink: RequestSink,
    pub events: EventStream,
}

/// The transport's side of an exchange.
#[derive(Debug)]
pub struct ExchangeIo {
    pub body: SinkReceiver,
    pub events: EventEmitter,
}

/// Create a connected exchange pair.
pub fn exchange(capacity: usize) -> (Exchange, ExchangeIo) {
    let (sink_tx, sink_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    (
        Exchange {
            sink: RequestSink { tx: sink_tx },
            events: EventStream { rx: event_rx },
        },
        ExchangeIo {
            body: SinkReceiver { rx: sink_rx },
            events: EventEmitter { tx: event_tx },
        },
    )
}

/// Writable end of a request body.
///
/// Dropping the sink without calling [`RequestSink::end`] aborts the
/// exchange.
#[derive(Debug)]
pub struct RequestSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl RequestSink {
    /// Write bytes verbatim.
    pub async fn write(&self, data: Bytes) -> io::Result<()> {
        self.tx
            .send(SinkMessage::Write(data))
            .await
            .map_err(|_| closed())
    }

    /// Finish the request body, optionally with a last piece of data.
    pub async fn end(self, data: Option<Bytes>) -> io::Result<()> {
        self.tx
            .send(SinkMessage::End(data))
            .await
            .map_err(|_| closed())
    }
}

/// Transport-side reader of the request body.
#[derive(Debug)]
pub struct SinkReceiver {
    rx: mpsc::Receiver<SinkMessage>,
}

impl SinkReceiver {
    /// Next instruction, or `None` if the sink was dropped without ending.
    pub async fn next(&mut self) -> Option<SinkMessage> {
        self.rx.recv().await
    }
}

/// Transport-side sender of exchange events.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    tx: mpsc::Sender<TransportEvent>,
}

impl EventEmitter {
    /// Emit an event. Returns false once nobody listens any more.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Sender-side stream of exchange events.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<TransportEvent>,
}

impl EventStream {
    /// Next event, or `None` if the transport went away.
    pub async fn next(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "exchange closed")
}
