//! IEC 60870-5-104 server (controlled station) listener.
//!
//! Every accepted connection gets its own engine and link session. The
//! server never starts data transfer itself; it answers the peer's STARTDT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::connection;
use crate::dispatch::{Dispatcher, Handler};
use crate::error::{Iec104Error, Result};
use crate::link::LinkConfig;
use crate::transport::Acceptor;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:2404";

/// Pause after a failed accept, so a persistent error cannot spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listener accepting IEC 104 connections.
///
/// # Example
///
/// ```rust,ignore
/// let server = Server::new("0.0.0.0:2404", Arc::new(Station));
/// server.run().await?;
/// ```
#[derive(Clone)]
pub struct Server {
    address: String,
    dispatcher: Dispatcher,
    link: LinkConfig,
    acceptor: Acceptor,
    span: Option<Span>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(address: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            address: address.into(),
            dispatcher: Dispatcher::new(handler),
            link: LinkConfig::default(),
            acceptor: Acceptor::plain(),
            span: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Link parameters applied to every accepted connection.
    pub fn with_link_config(mut self, config: LinkConfig) -> Self {
        self.link = config.validated();
        self
    }

    /// Parent span of the listener and its connections.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    #[cfg(feature = "tls")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
    pub fn with_tls(mut self, config: crate::transport::TlsServerConfig) -> Self {
        self.acceptor = Acceptor::tls(config);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stop accepting and close every connection of this server.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Bind the configured address and serve until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address).await.map_err(|e| {
            Iec104Error::Connection(format!("failed to bind {}: {}", self.address, e))
        })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// A failure on one connection never stops the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        let span = self
            .span
            .clone()
            .unwrap_or_else(|| info_span!("iec104_server", %local));

        async {
            info!("listening");
            loop {
                let accepted = tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    accepted = self.acceptor.accept(&listener) => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
            info!("stopped");
        }
        .instrument(span)
        .await;
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        info!(%peer, "accepted");
        let span = info_span!("connection", %peer);
        let server = self.clone();

        tokio::spawn(
            async move {
                let stream = match server.acceptor.secure(stream, server.link.t1).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "transport setup failed");
                        return;
                    }
                };
                let (link, task) = connection::spawn(
                    stream,
                    server.link.clone(),
                    server.dispatcher.clone(),
                    Span::current(),
                );
                let shutdown = server.shutdown.clone();
                let closer = tokio::spawn(async move {
                    shutdown.cancelled().await;
                    link.close();
                });
                match task.await {
                    Ok(Ok(())) => info!("connection closed"),
                    Ok(Err(e)) => info!(error = %e, "connection dropped"),
                    Err(e) => error!(error = %e, "connection task failed"),
                }
                closer.abort();
            }
            .instrument(span),
        );
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("link", &self.link)
            .field("acceptor", &self.acceptor)
            .finish_non_exhaustive()
    }
}
