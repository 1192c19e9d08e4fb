//! Connection establishment.

use super::dns::DnsResolver;
use async_trait::async_trait;
use http::Uri;
use rustls::pki_types::ServerName;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// A bidirectional byte stream a request can be written to.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// Where an exchange should connect to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    /// Host without IPv6 brackets.
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// Derive the target from an absolute `http` or `https` URI.
    pub fn from_uri(uri: &Uri) -> io::Result<Self> {
        let secure = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("https") => true,
            Some(s) if s.eq_ignore_ascii_case("http") => false,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported scheme: {}", other.unwrap_or("")),
                ))
            }
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URI has no host"))?;
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            secure,
        })
    }
}

/// Opens byte streams to targets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &Target) -> io::Result<BoxedIo>;
}

/// Plain TCP connector using a caching resolver.
pub struct TcpConnector {
    resolver: Arc<DnsResolver>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(DnsResolver::new()))
    }

    pub fn with_resolver(resolver: Arc<DnsResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<DnsResolver> {
        &self.resolver
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, target: &Target) -> io::Result<BoxedIo> {
        let addrs = self
            .resolver
            .resolve_socket_addrs(&target.host, target.port)
            .await?;

        let mut last_err = None;
        for addr in addrs {
            trace!(%addr, host = %target.host, "connecting");
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%addr, host = %target.host, "connected");
                    return Ok(Box::new(stream));
                }
                Err(err) => {
                    debug!(%addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", target.host))
        }))
    }
}

/// TLS on top of another connector.
pub struct TlsConnector {
    inner: Arc<dyn Connector>,
    tls: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Wrap `inner` using the bundled webpki roots.
    pub fn new(inner: Arc<dyn Connector>) -> io::Result<Self> {
        Ok(Self::with_config(inner, default_client_config()?))
    }

    /// Wrap `inner` using a caller-built rustls configuration.
    pub fn with_config(inner: Arc<dyn Connector>, config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            inner,
            tls: tokio_rustls::TlsConnector::from(config),
        }
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self, target: &Target) -> io::Result<BoxedIo> {
        let io = self.inner.connect(target).await?;
        let name = ServerName::try_from(target.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let stream = self.tls.connect(name, io).await?;
        debug!(host = %target.host, "tls handshake complete");
        Ok(Box::new(stream))
    }
}

fn default_client_config() -> io::Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Sends every connection to one Unix-domain socket, whatever the target.
#[cfg(unix)]
pub struct UnixConnector {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixConnector {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(unix)]
#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self, target: &Target) -> io::Result<BoxedIo> {
        trace!(path = %self.path.display(), host = %target.host, "connecting to unix socket");
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_uri() {
        let target = Target::from_uri(&Uri::from_static("https://example.com:8443/path")).unwrap();
        assert_eq!(target, Target::new("example.com", 8443, true));

        let target = Target::from_uri(&Uri::from_static("http://example.com/")).unwrap();
        assert_eq!(target.port, 80);
        assert!(!target.secure);

        let target = Target::from_uri(&Uri::from_static("http://[::1]:8080/")).unwrap();
        assert_eq!(target.host, "::1");
    }

    #[test]
    fn test_target_rejects_other_schemes() {
        let err = Target::from_uri(&Uri::from_static("ftp://example.com/")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err = Target::from_uri(&Uri::from_static("/relative")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = TcpConnector::new();
        let result = connector.connect(&Target::new("127.0.0.1", port, false)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_default_tls_config() {
        let inner: Arc<dyn Connector> = Arc::new(TcpConnector::new());
        assert!(TlsConnector::new(inner).is_ok());
    }
}
