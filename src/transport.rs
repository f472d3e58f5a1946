//! Byte-stream transports: plain TCP and, with the `tls` feature, TLS.
//!
//! Above this module every connection is a [`BoxedStream`]; the engine never
//! knows whether it is secured.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::Result;

/// Any bidirectional byte stream the engine can run on.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased stream, plain or secured.
pub type BoxedStream = Box<dyn Transport>;

/// Client side: opens streams to a station.
#[derive(Debug, Clone, Default)]
pub struct Connector {
    #[cfg(feature = "tls")]
    tls: Option<TlsClientConfig>,
}

impl Connector {
    pub fn plain() -> Self {
        Self::default()
    }

    #[cfg(feature = "tls")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
    pub fn tls(config: TlsClientConfig) -> Self {
        Self { tls: Some(config) }
    }

    pub fn is_secure(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            self.tls.is_some()
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    /// TCP connect with `TCP_NODELAY`, then the TLS handshake when configured.
    pub async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true).ok();
        debug!(host, port, secure = self.is_secure(), "tcp connected");

        #[cfg(feature = "tls")]
        {
            if let Some(tls) = &self.tls {
                return tls.connect(host, stream).await;
            }
        }
        Ok(Box::new(stream))
    }
}

/// Server side: accepts sockets and secures them.
#[derive(Debug, Clone, Default)]
pub struct Acceptor {
    #[cfg(feature = "tls")]
    tls: Option<TlsServerConfig>,
}

impl Acceptor {
    pub fn plain() -> Self {
        Self::default()
    }

    #[cfg(feature = "tls")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
    pub fn tls(config: TlsServerConfig) -> Self {
        Self { tls: Some(config) }
    }

    /// Wait for the next TCP connection.
    pub async fn accept(&self, listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true).ok();
        Ok((stream, peer))
    }

    /// Complete the transport setup of an accepted socket.
    ///
    /// Call this on the per-connection task so a slow handshake never
    /// stalls the accept loop. A TLS handshake not finished within `limit`
    /// fails with `HandshakeTimeout`.
    #[cfg_attr(not(feature = "tls"), allow(unused_variables))]
    pub async fn secure(&self, stream: TcpStream, limit: Duration) -> Result<BoxedStream> {
        #[cfg(feature = "tls")]
        {
            if let Some(tls) = &self.tls {
                return tokio::time::timeout(limit, tls.accept(stream))
                    .await
                    .map_err(|_| crate::error::Iec104Error::HandshakeTimeout("TLS accept"))?;
            }
        }
        Ok(Box::new(stream))
    }
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;

    use tokio::net::TcpStream;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, ServerConfig};
    use tokio_rustls::{TlsAcceptor, TlsConnector};

    use super::BoxedStream;
    use crate::error::{Iec104Error, Result};

    /// Client-side TLS settings, handed to rustls unchanged.
    #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
    #[derive(Clone)]
    pub struct TlsClientConfig {
        pub config: Arc<ClientConfig>,
        /// Name checked against the server certificate; defaults to the dialed host.
        pub server_name: Option<String>,
    }

    impl TlsClientConfig {
        pub fn new(config: Arc<ClientConfig>) -> Self {
            Self {
                config,
                server_name: None,
            }
        }

        pub fn server_name(mut self, name: impl Into<String>) -> Self {
            self.server_name = Some(name.into());
            self
        }

        pub(super) async fn connect(&self, host: &str, stream: TcpStream) -> Result<BoxedStream> {
            let name = self
                .server_name
                .clone()
                .unwrap_or_else(|| host.to_string());
            let name = ServerName::try_from(name)
                .map_err(|e| Iec104Error::Tls(format!("invalid server name: {}", e)))?;
            let stream = TlsConnector::from(self.config.clone())
                .connect(name, stream)
                .await
                .map_err(|e| Iec104Error::Tls(e.to_string()))?;
            Ok(Box::new(stream))
        }
    }

    impl std::fmt::Debug for TlsClientConfig {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TlsClientConfig")
                .field("server_name", &self.server_name)
                .finish_non_exhaustive()
        }
    }

    /// Server-side TLS settings.
    #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
    #[derive(Clone)]
    pub struct TlsServerConfig {
        pub config: Arc<ServerConfig>,
    }

    impl TlsServerConfig {
        pub fn new(config: Arc<ServerConfig>) -> Self {
            Self { config }
        }

        pub(super) async fn accept(&self, stream: TcpStream) -> Result<BoxedStream> {
            let stream = TlsAcceptor::from(self.config.clone())
                .accept(stream)
                .await
                .map_err(|e| Iec104Error::Tls(e.to_string()))?;
            Ok(Box::new(stream))
        }
    }

    impl std::fmt::Debug for TlsServerConfig {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TlsServerConfig").finish_non_exhaustive()
        }
    }

    /// Server settings without certificates: a handshake can start but
    /// never complete.
    #[cfg(test)]
    pub(crate) fn certificateless_server() -> TlsServerConfig {
        use tokio_rustls::rustls::server::ResolvesServerCertUsingSni;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(ResolvesServerCertUsingSni::new()));
        TlsServerConfig::new(Arc::new(config))
    }
}

#[cfg(feature = "tls")]
pub use tls::{TlsClientConfig, TlsServerConfig};

#[cfg(all(test, feature = "tls"))]
pub(crate) use tls::certificateless_server;
