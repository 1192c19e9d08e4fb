//! HTTP request handling.

use crate::body::Body;
use crate::error::{Error, Result};
use crate::headers::HeaderMap;
use http::{Method, Uri, Version};

/// An HTTP request.
///
/// Requests are values: every `with_*` mutator consumes the request and
/// returns a new one with that single field replaced.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    /// Create a new request with no headers and an empty body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Create a request from a URI string.
    pub fn parse(method: Method, uri: &str) -> Result<Self> {
        let uri = uri
            .parse::<Uri>()
            .map_err(|e| Error::invalid(format!("{}: {}", uri, e)))?;
        Ok(Self::new(method, uri))
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Check if a header is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Request body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replace all values of a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a value to a header, keeping existing values.
    pub fn with_added_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Drop a header.
    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// Replace the whole header map.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Split into its parts.
    pub fn into_parts(self) -> (Method, Uri, Version, HeaderMap, Body) {
        (self.method, self.uri, self.version, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let request = Request::parse(Method::GET, "https://example.com")
            .unwrap()
            .with_header("Accept", "text/html");

        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.version(), Version::HTTP_11);
        assert!(request.has_header("accept"));
        assert!(request.body().is_empty());
    }

    #[test]
    fn test_mutators_replace_one_field() {
        let request = Request::parse(Method::GET, "http://example.com/a")
            .unwrap()
            .with_added_header("Accept", "text/html")
            .with_added_header("Accept", "text/plain")
            .with_method(Method::POST)
            .with_body("payload");

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/a");
        assert_eq!(request.headers().get_all("accept").len(), 2);
        assert_eq!(request.body().size(), Some(7));

        let request = request.without_header("Accept");
        assert!(!request.has_header("Accept"));
    }

    #[test]
    fn test_relative_uri_is_representable() {
        let request = Request::parse(Method::GET, "/relative/path").unwrap();
        assert!(request.uri().scheme().is_none());
        assert!(request.uri().host().is_none());
    }

    #[test]
    fn test_unparsable_uri() {
        let err = Request::parse(Method::GET, "http://exa mple.com").unwrap_err();
        assert!(err.is_invalid_request());
    }
}
