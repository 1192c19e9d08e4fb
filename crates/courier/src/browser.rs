//! High-level request facade.

use crate::body::Body;
use crate::error::{Error, Result};
use crate::headers::{content_type, names, HeaderMap};
use crate::pending::{deferred, Deferred, PendingResult};
use crate::request::Request;
use crate::response::{BodyStream, Response, ResponseBody};
use crate::sender::{ResponseMode, Sender};
use bytes::Bytes;
use futures::channel::mpsc;
use http::Method;
use std::fmt;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

/// Browser configuration.
#[derive(Clone, Debug)]
pub struct BrowserConfig {
    /// User agent sent unless the request names its own.
    pub user_agent: Option<String>,
    /// Headers added to every request; per-request headers replace them.
    pub default_headers: HeaderMap,
    /// Base that relative request URLs are resolved against.
    pub base_url: Option<Url>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: Some(format!(
                "courier/{} ({})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            )),
            default_headers: HeaderMap::new(),
            base_url: None,
        }
    }
}

impl BrowserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Send no `User-Agent` header by default.
    pub fn no_user_agent(mut self) -> Self {
        self.user_agent = None;
        self
    }

    /// Add a default header.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.append(name, value);
        self
    }

    /// Set the base URL.
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// Where [`Browser::download`] writes the response body.
pub enum DownloadTarget {
    /// A caller-supplied writer.
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    /// A file, created or truncated before the request is sent.
    Path(PathBuf),
}

impl DownloadTarget {
    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        DownloadTarget::Writer(Box::new(writer))
    }

    async fn open(self) -> std::io::Result<Box<dyn AsyncWrite + Send + Unpin>> {
        match self {
            DownloadTarget::Writer(writer) => Ok(writer),
            DownloadTarget::Path(path) => {
                let file = tokio::fs::File::create(&path).await?;
                debug!(path = %path.display(), "download target opened");
                Ok(Box::new(file))
            }
        }
    }
}

impl From<PathBuf> for DownloadTarget {
    fn from(path: PathBuf) -> Self {
        DownloadTarget::Path(path)
    }
}

impl From<&std::path::Path> for DownloadTarget {
    fn from(path: &std::path::Path) -> Self {
        DownloadTarget::Path(path.to_path_buf())
    }
}

impl From<&str> for DownloadTarget {
    fn from(path: &str) -> Self {
        DownloadTarget::Path(PathBuf::from(path))
    }
}

impl fmt::Debug for DownloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadTarget::Writer(_) => f.write_str("Writer"),
            DownloadTarget::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// Verb-level requests over a [`Sender`].
///
/// ```no_run
/// # async fn example() -> courier::Result<()> {
/// use courier::{Browser, HeaderMap, Sender};
///
/// let browser = Browser::new(Sender::with_default_transport()?);
/// let response = browser.get("http://example.com/", HeaderMap::new()).await?;
/// println!("{}", response.text().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Browser {
    sender: Sender,
    config: BrowserConfig,
    mode: ResponseMode,
}

impl Browser {
    /// Create a browser with the default configuration.
    pub fn new(sender: Sender) -> Self {
        Self::with_config(sender, BrowserConfig::default())
    }

    /// Create a browser with custom configuration.
    pub fn with_config(sender: Sender, config: BrowserConfig) -> Self {
        Self {
            sender,
            config,
            mode: ResponseMode::Buffered,
        }
    }

    /// A browser whose requests resolve as soon as the response head
    /// arrives, with a streaming body.
    pub fn streaming(&self) -> Self {
        Self {
            mode: ResponseMode::Streaming,
            ..self.clone()
        }
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Get browser configuration.
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn get(&self, url: &str, headers: HeaderMap) -> PendingResult {
        self.request(Method::GET, url, headers, Body::Empty)
    }

    pub fn head(&self, url: &str, headers: HeaderMap) -> PendingResult {
        self.request(Method::HEAD, url, headers, Body::Empty)
    }

    pub fn post(&self, url: &str, headers: HeaderMap, content: impl Into<Body>) -> PendingResult {
        self.request(Method::POST, url, headers, content)
    }

    pub fn put(&self, url: &str, headers: HeaderMap, content: impl Into<Body>) -> PendingResult {
        self.request(Method::PUT, url, headers, content)
    }

    pub fn patch(&self, url: &str, headers: HeaderMap, content: impl Into<Body>) -> PendingResult {
        self.request(Method::PATCH, url, headers, content)
    }

    pub fn delete(&self, url: &str, headers: HeaderMap, content: impl Into<Body>) -> PendingResult {
        self.request(Method::DELETE, url, headers, content)
    }

    /// Send `fields` URL-encoded as a form.
    ///
    /// Spaces are encoded as `+`. The form content type replaces any
    /// `Content-Type` in `headers`.
    pub fn submit<I, K, V>(&self, url: &str, fields: I, headers: HeaderMap, method: Method) -> PendingResult
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in fields {
            form.append_pair(key.as_ref(), value.as_ref());
        }

        let mut headers = headers;
        headers.insert("Content-Type", content_type::FORM);
        self.request(method, url, headers, form.finish())
    }

    /// Send any request.
    pub fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        content: impl Into<Body>,
    ) -> PendingResult {
        match self.build(method, url, headers, content.into()) {
            Ok(request) => self.sender.dispatch(request, self.mode),
            Err(err) => PendingResult::rejected(err),
        }
    }

    /// Stream the response body into `target` while also handing it to the
    /// caller.
    ///
    /// The result resolves with the response head as soon as it arrives.
    /// Its body yields each chunk after the chunk has been written to the
    /// target, and completes only once the target has been flushed. A
    /// failing target ends the body with [`Error::Io`].
    pub fn download(
        &self,
        url: &str,
        target: impl Into<DownloadTarget>,
        headers: HeaderMap,
        method: Method,
    ) -> PendingResult {
        let request = match self.build(method, url, headers, Body::Empty) {
            Ok(request) => request,
            Err(err) => return PendingResult::rejected(err),
        };
        let target = target.into();
        let sender = self.sender.clone();
        let (deferred, pending) = deferred();

        tokio::spawn(run_download(sender, request, target, deferred));
        pending
    }

    fn build(&self, method: Method, url: &str, headers: HeaderMap, body: Body) -> Result<Request> {
        let url = self.resolve_url(url)?;

        let mut merged = self.config.default_headers.clone();
        if let Some(user_agent) = &self.config.user_agent {
            if !merged.contains(names::USER_AGENT) {
                merged.insert("User-Agent", user_agent.as_str());
            }
        }
        merged.extend(headers);

        Ok(Request::parse(method, &url)?.with_headers(merged).with_body(body))
    }

    fn resolve_url(&self, url: &str) -> Result<String> {
        match &self.config.base_url {
            Some(base) => base
                .join(url)
                .map(|joined| joined.to_string())
                .map_err(|e| Error::invalid(format!("invalid URL {:?}: {}", url, e))),
            None => Ok(url.to_string()),
        }
    }
}

async fn run_download(sender: Sender, request: Request, target: DownloadTarget, mut deferred: Deferred) {
    let mut sink = match target.open().await {
        Ok(sink) => sink,
        Err(err) => {
            deferred.reject(Error::Io(err));
            return;
        }
    };

    let mut upstream = sender.send_streaming(request);
    let result = (&mut upstream).await;
    while let Some(progress) = upstream.try_progress() {
        deferred.notify(progress);
    }

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            deferred.reject(err);
            return;
        }
    };

    let (head, body) = response.into_parts();
    let mut source = body.into_stream();
    let (tx, rx) = mpsc::unbounded::<Result<Bytes>>();
    deferred.resolve(Response::new(head, ResponseBody::Streaming(BodyStream::new(rx))));

    let mut written = 0u64;
    loop {
        match source.next_chunk().await {
            Ok(Some(chunk)) => {
                if let Err(err) = sink.write_all(&chunk).await {
                    warn!(error = %err, "download target write failed");
                    let _ = tx.unbounded_send(Err(Error::Io(err)));
                    return;
                }
                written += chunk.len() as u64;
                // Keep writing the target even if the caller stopped reading.
                let _ = tx.unbounded_send(Ok(chunk));
            }
            Ok(None) => {
                if let Err(err) = sink.flush().await {
                    warn!(error = %err, "download target flush failed");
                    let _ = tx.unbounded_send(Err(Error::Io(err)));
                    return;
                }
                debug!(bytes = written, "download complete");
                return;
            }
            Err(err) => {
                debug!(error = %err, bytes = written, "download failed");
                let _ = tx.unbounded_send(Err(err));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::Progress;
    use crate::transport::mock::{Script, ScriptedTransport};
    use crate::transport::{ResponseHead, SinkMessage, TransportEvent};
    use http::{StatusCode, Version};
    use tokio::io::AsyncReadExt;

    fn browser(config: BrowserConfig) -> (Browser, Script) {
        let (transport, script) = ScriptedTransport::new();
        (Browser::with_config(Sender::new(transport), config), script)
    }

    fn ok_head() -> ResponseHead {
        ResponseHead {
            version: Version::HTTP_11,
            status: StatusCode::OK,
            reason: "OK".to_string(),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_config_builder() {
        let config = BrowserConfig::new()
            .user_agent("test/1.0")
            .default_header("Accept", "text/html")
            .base_url(Url::parse("http://example.com/").unwrap());

        assert_eq!(config.user_agent.as_deref(), Some("test/1.0"));
        assert_eq!(config.default_headers.get("accept"), Some("text/html"));
        assert!(config.base_url.is_some());
        assert!(BrowserConfig::default().user_agent.unwrap().starts_with("courier/"));
    }

    #[tokio::test]
    async fn test_submit_form_encoding() {
        let (browser, mut script) = browser(BrowserConfig::new().no_user_agent());
        let _pending = browser.submit(
            "http://example.com/form",
            [("a", "b c")],
            [("Content-Type", "text/plain")].into_iter().collect(),
            Method::POST,
        );

        let (head, mut io) = script.next_exchange().await;
        assert_eq!(head.method, Method::POST);
        assert_eq!(head.header("Content-Type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(head.header("Content-Length"), Some("5"));
        assert!(matches!(io.body.next().await, Some(SinkMessage::End(Some(b))) if b == "a=b+c"));
    }

    #[tokio::test]
    async fn test_verbs_and_default_headers() {
        let config = BrowserConfig::new()
            .user_agent("test/1.0")
            .default_header("Accept", "*/*")
            .default_header("X-Trace", "default");
        let (browser, mut script) = browser(config);

        let _get = browser.get(
            "http://example.com/",
            [("X-Trace", "override")].into_iter().collect(),
        );
        let (head, _io) = script.next_exchange().await;
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.header("User-Agent"), Some("test/1.0"));
        assert_eq!(head.header("Accept"), Some("*/*"));
        assert_eq!(head.header("X-Trace"), Some("override"));

        let _put = browser.put("http://example.com/item", HeaderMap::new(), "data");
        let (head, _io) = script.next_exchange().await;
        assert_eq!(head.method, Method::PUT);
        assert_eq!(head.header("Content-Length"), Some("4"));

        let _delete = browser.delete("http://example.com/item", HeaderMap::new(), Body::Empty);
        let (head, _io) = script.next_exchange().await;
        assert_eq!(head.method, Method::DELETE);
        assert_eq!(head.header("Content-Length"), None);

        let _head = browser.head("http://example.com/", HeaderMap::new());
        let (head, _io) = script.next_exchange().await;
        assert_eq!(head.method, Method::HEAD);
    }

    #[tokio::test]
    async fn test_base_url_resolution() {
        let config = BrowserConfig::new().base_url(Url::parse("http://example.com/api/").unwrap());
        let (browser, mut script) = browser(config);

        let _pending = browser.get("items?page=2", HeaderMap::new());
        let (head, _io) = script.next_exchange().await;
        assert_eq!(head.uri.to_string(), "http://example.com/api/items?page=2");
    }

    #[tokio::test]
    async fn test_relative_url_without_base_rejected() {
        let (browser, script) = browser(BrowserConfig::new());

        let err = browser.get("/items", HeaderMap::new()).await.unwrap_err();
        assert!(err.is_invalid_request());
        let err = browser.get("http://exa mple.com/", HeaderMap::new()).await.unwrap_err();
        assert!(err.is_invalid_request());
        assert_eq!(script.open_count(), 0);
    }

    #[tokio::test]
    async fn test_header_injection_rejected() {
        let (browser, script) = browser(BrowserConfig::new());

        let err = browser
            .get(
                "http://example.com/",
                [("X-Note", "a\r\nX-Injected: evil")].into_iter().collect(),
            )
            .await
            .unwrap_err();
        assert!(err.is_invalid_request());
        assert_eq!(script.open_count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_browser() {
        let (browser, mut script) = browser(BrowserConfig::new());
        let pending = browser.streaming().get("http://example.com/", HeaderMap::new());

        let (_head, io) = script.next_exchange().await;
        io.events.emit(TransportEvent::Response(ok_head())).await;

        let response = pending.await.unwrap();
        assert!(response.is_streaming());
        io.events.emit(TransportEvent::Data(Bytes::from_static(b"hi"))).await;
        io.events.emit(TransportEvent::End).await;
        assert_eq!(response.bytes().await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_download_tees_into_writer() {
        let (browser, mut script) = browser(BrowserConfig::new());
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let mut pending = browser.download(
            "http://example.com/file",
            DownloadTarget::writer(writer),
            HeaderMap::new(),
            Method::GET,
        );

        let (head, io) = script.next_exchange().await;
        assert_eq!(head.method, Method::GET);
        io.events.emit(TransportEvent::Response(ok_head())).await;
        io.events.emit(TransportEvent::Data(Bytes::from_static(b"ab"))).await;
        io.events.emit(TransportEvent::Data(Bytes::from_static(b"cd"))).await;
        io.events.emit(TransportEvent::End).await;

        let response = (&mut pending).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap(), "abcd");

        let mut written = Vec::new();
        reader.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, b"abcd");

        assert!(matches!(pending.try_progress(), Some(Progress::RequestOpened(_))));
        assert!(matches!(pending.try_progress(), Some(Progress::ResponseStarted(_))));
    }

    #[tokio::test]
    async fn test_download_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let (browser, mut script) = browser(BrowserConfig::new());
        let pending = browser.download("http://example.com/file", path.clone(), HeaderMap::new(), Method::GET);

        let (_head, io) = script.next_exchange().await;
        io.events.emit(TransportEvent::Response(ok_head())).await;
        io.events.emit(TransportEvent::Data(Bytes::from_static(b"hello "))).await;
        io.events.emit(TransportEvent::Data(Bytes::from_static(b"world"))).await;
        io.events.emit(TransportEvent::End).await;

        let body = pending.await.unwrap().bytes().await.unwrap();
        assert_eq!(body, "hello world");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_download_target_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.bin");
        let (browser, script) = browser(BrowserConfig::new());

        let err = browser
            .download("http://example.com/file", path, HeaderMap::new(), Method::GET)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(script.open_count(), 0);
    }

    #[tokio::test]
    async fn test_download_propagates_body_error() {
        let (browser, mut script) = browser(BrowserConfig::new());
        let (writer, _reader) = tokio::io::duplex(1024);
        let pending = browser.download(
            "http://example.com/file",
            DownloadTarget::writer(writer),
            HeaderMap::new(),
            Method::GET,
        );

        let (_head, io) = script.next_exchange().await;
        io.events.emit(TransportEvent::Response(ok_head())).await;
        io.events.emit(TransportEvent::Data(Bytes::from_static(b"ab"))).await;
        drop(io);

        let err = pending.await.unwrap().bytes().await.unwrap_err();
        assert!(err.is_partial_response());
    }

    #[tokio::test]
    async fn test_get_over_tcp() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
            String::from_utf8(request).unwrap()
        });

        let browser = Browser::new(Sender::with_default_transport().unwrap());
        let response = browser
            .get(&format!("http://{}/greeting", addr), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "hello");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /greeting HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Host: {}\r\n", addr)));
        assert!(request.contains("User-Agent: courier/"));
    }
}
