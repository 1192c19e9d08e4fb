//! HTTP response handling.

use crate::error::{Error, Result};
use crate::headers::HeaderMap;
use crate::transport::ResponseHead;
use bytes::{Bytes, BytesMut};
use encoding_rs::Encoding;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use http::{StatusCode, Version};
use mime::Mime;
use serde::de::DeserializeOwned;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// An HTTP response.
#[derive(Debug)]
pub struct Response {
    version: Version,
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    body: ResponseBody,
}

/// Response body, either complete or still arriving.
pub enum ResponseBody {
    /// The whole body, received before the response was handed out.
    Buffered(Bytes),
    /// A live, single-pass source of body chunks.
    Streaming(BodyStream),
}

impl ResponseBody {
    /// The body as a stream; a buffered body yields at most one chunk.
    pub fn into_stream(self) -> BodyStream {
        match self {
            ResponseBody::Buffered(bytes) if bytes.is_empty() => BodyStream::new(stream::empty()),
            ResponseBody::Buffered(bytes) => BodyStream::once(bytes),
            ResponseBody::Streaming(body) => body,
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffered(b) => f.debug_tuple("Buffered").field(&b.len()).finish(),
            ResponseBody::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// A live stream of response body chunks.
///
/// Yields `Ok` chunks in order and ends either with `None` (complete) or with
/// a single terminal `Err`.
pub struct BodyStream {
    inner: BoxStream<'static, Result<Bytes>>,
}

impl BodyStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// A stream that yields `bytes` once.
    pub fn once(bytes: Bytes) -> Self {
        Self::new(stream::once(async move { Ok(bytes) }))
    }

    /// Yield the next body chunk, or `None` when the body is complete.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.inner.next().await.transpose()
    }

    /// Drain the stream into one buffer.
    pub async fn collect_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyStream")
    }
}

impl Response {
    /// Create a response from a received head and a body.
    pub fn new(head: ResponseHead, body: ResponseBody) -> Self {
        Self {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
        }
    }

    /// Protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get the response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase as sent by the server.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response was a redirect (3xx).
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    /// Check if the response was a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Check if the response was a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the first value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get the parsed content type.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers.content_type().and_then(|s| s.parse().ok())
    }

    /// Get the content length from headers.
    pub fn content_length(&self) -> Option<u64> {
        self.headers.content_length()
    }

    /// Whether the body is still arriving.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Streaming(_))
    }

    /// Get a reference to buffered body bytes.
    pub fn body_ref(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            ResponseBody::Streaming(_) => None,
        }
    }

    /// Take the body.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Take the body as a stream; buffered bodies yield a single chunk.
    pub fn into_body_stream(self) -> BodyStream {
        self.body.into_stream()
    }

    /// Split into head and body.
    pub fn into_parts(self) -> (ResponseHead, ResponseBody) {
        let head = ResponseHead {
            version: self.version,
            status: self.status,
            reason: self.reason,
            headers: self.headers,
        };
        (head, self.body)
    }

    /// Get the body as bytes, draining a streaming body.
    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming(body) => body.collect_bytes().await,
        }
    }

    /// Get the body as text.
    pub async fn text(self) -> Result<String> {
        let content_type = self.content_type();
        let bytes = self.bytes().await?;

        let encoding = detect_encoding(content_type.as_ref(), &bytes);
        let (text, _, _) = encoding.decode(&bytes);
        Ok(text.into_owned())
    }

    /// Parse the body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::decode(e.to_string()))
    }
}

/// Detect character encoding from the content type charset or a BOM.
fn detect_encoding(content_type: Option<&Mime>, bytes: &[u8]) -> &'static Encoding {
    if let Some(charset) = content_type.and_then(|mime| mime.get_param("charset")) {
        if let Some(encoding) = Encoding::for_label(charset.as_str().as_bytes()) {
            return encoding;
        }
    }

    match Encoding::for_bom(bytes) {
        Some((encoding, _)) => encoding,
        None => encoding_rs::UTF_8,
    }
}
