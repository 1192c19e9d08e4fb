//! Asynchronous HTTP client built on an event-driven request sender.
//!
//! This crate handles:
//! - Request normalization (`Content-Length`, chunked transfer encoding)
//! - Streaming request bodies with bit-exact chunk framing
//! - Buffered and streaming responses from one exchange state machine
//! - HTTP/1.1 over TCP, TLS and Unix-domain sockets
//! - Cached DNS resolution
//! - A verb-level facade with form submission and downloads
//!
//! [`Sender`] is the core; [`Browser`] is a thin convenience layer on top of
//! it. Both hand out a [`PendingResult`], a future that settles exactly once
//! with the [`Response`] or an [`Error`].

pub mod body;
pub mod browser;
pub mod error;
pub mod headers;
pub mod pending;
pub mod request;
pub mod response;
pub mod sender;
pub mod transport;

pub use body::Body;
pub use browser::{Browser, BrowserConfig, DownloadTarget};
pub use error::{Error, Result};
pub use headers::HeaderMap;
pub use pending::{PendingResult, Progress};
pub use request::Request;
pub use response::{BodyStream, Response, ResponseBody};
pub use sender::{ResponseMode, Sender};
pub use transport::{H1Transport, Transport, TransportConfig};

pub use http::{Method, StatusCode, Version};
