//! Request bodies.

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::io;

/// A live source of request body bytes.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Request body.
///
/// A body is handed to the sender by value and consumed exactly once.
#[derive(Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Fully buffered bytes.
    Bytes(Bytes),
    /// A live byte source, optionally with a declared size.
    Stream {
        source: ByteStream,
        size: Option<u64>,
    },
}

impl Body {
    /// Body from a byte stream of unknown length; it will be chunk-framed.
    pub fn stream<S>(source: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Body::Stream {
            source: source.boxed(),
            size: None,
        }
    }

    /// Body from a byte stream whose total length is known up front.
    pub fn sized_stream<S>(source: S, size: u64) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Body::Stream {
            source: source.boxed(),
            size: Some(size),
        }
    }

    /// Size in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(b) => Some(b.len() as u64),
            Body::Stream { size, .. } => *size,
        }
    }

    /// Returns true if the body is known to carry no bytes.
    pub fn is_empty(&self) -> bool {
        self.size() == Some(0)
    }

    /// Returns true if the body is a live source rather than buffered bytes.
    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream { .. })
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Bytes(b) => f.debug_tuple("Body::Bytes").field(&b.len()).finish(),
            Body::Stream { size, .. } => f.debug_struct("Body::Stream").field("size", size).finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        if b.is_empty() {
            Body::Empty
        } else {
            Body::Bytes(b)
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::from(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Body {
    fn from(s: &'static [u8]) -> Self {
        Body::from(Bytes::from_static(s))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::from(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::from(Bytes::from_static(s.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_sizes() {
        assert_eq!(Body::Empty.size(), Some(0));
        assert_eq!(Body::from("hello").size(), Some(5));
        assert_eq!(Body::stream(stream::empty()).size(), None);
        assert_eq!(Body::sized_stream(stream::empty(), 12).size(), Some(12));
    }

    #[test]
    fn test_empty_bytes_collapse() {
        assert!(matches!(Body::from(""), Body::Empty));
        assert!(matches!(Body::from(Vec::new()), Body::Empty));
        assert!(Body::from(String::new()).is_empty());
    }

    #[test]
    fn test_debug_hides_payload() {
        let body = Body::from("secret");
        assert_eq!(format!("{:?}", body), "Body::Bytes(6)");
        assert!(Body::stream(stream::empty()).is_stream());
    }
}
