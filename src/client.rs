//! IEC 60870-5-104 client.
//!
//! [`Iec104Client`] dials a controlled station, runs the on-connect hook
//! (STARTDT by default) and supervises the link: after an unexpected
//! disconnect it redials according to the [`ReconnectRule`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use url::Url;

use crate::connection::{self, LinkHandle};
use crate::dispatch::{Dispatcher, Handler};
use crate::error::{Iec104Error, Result};
use crate::link::{LinkConfig, LinkState};
use crate::transport::Connector;
use crate::types::{Cp56Time2a, DoublePointValue, Ioa};

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Default dial and handshake timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Default number of redial attempts after a disconnect.
pub const DEFAULT_RETRIES: u32 = 1;

/// Default pause before each redial, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 3000;

const EVENT_CHANNEL_SIZE: usize = 100;

/// Redial policy: up to `retries` attempts, `interval` apart.
///
/// The budget is restored after every successful reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectRule {
    pub retries: u32,
    pub interval: Duration,
}

impl Default for ReconnectRule {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}

impl ReconnectRule {
    /// Negative values are replaced by the defaults (1 retry, 3000 ms).
    pub fn new(retries: i32, interval_ms: i64) -> Self {
        let defaults = Self::default();
        let retries = u32::try_from(retries).unwrap_or_else(|_| {
            warn!(retries, default = defaults.retries, "negative retries, using default");
            defaults.retries
        });
        let interval = u64::try_from(interval_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|_| {
                warn!(interval_ms, default = ?defaults.interval, "negative interval, using default");
                defaults.interval
            });
        Self { retries, interval }
    }

    /// Never redial.
    pub fn disabled() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }
}

/// Action run against a freshly connected or closing link.
pub type LinkHook = Arc<dyn Fn(LinkHandle) -> BoxFuture<'static, Result<()>> + Send + Sync>;

fn hook<F, Fut>(f: F) -> LinkHook
where
    F: Fn(LinkHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |link: LinkHandle| -> BoxFuture<'static, Result<()>> { Box::pin(f(link)) })
}

/// Client configuration. Built once, read-only after [`Iec104Client::new`].
#[derive(Clone)]
pub struct ClientOption {
    host: String,
    port: u16,
    secure: bool,
    connect_timeout: Duration,
    reconnect: ReconnectRule,
    link: LinkConfig,
    handler: Arc<dyn Handler>,
    on_connect: LinkHook,
    on_disconnect: LinkHook,
    connector: Connector,
    span: Option<Span>,
}

impl ClientOption {
    /// Parse the station address and attach the handler.
    ///
    /// Accepted forms: `host`, `host:port`, `:port` (loopback),
    /// `tcp://host[:port]` and `tls://host[:port]`. The port defaults to 2404.
    pub fn new(server: &str, handler: Arc<dyn Handler>) -> Result<Self> {
        let (host, port, secure) = parse_server(server)?;
        Ok(Self {
            host,
            port,
            secure,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT),
            reconnect: ReconnectRule::default(),
            link: LinkConfig::default(),
            handler,
            on_connect: hook(|link: LinkHandle| async move { link.start_dt().await }),
            on_disconnect: hook(|link: LinkHandle| async move { link.stop_dt().await }),
            connector: Connector::plain(),
            span: None,
        })
    }

    /// Bound on the dial and, separately, on the on-connect hook (STARTDT
    /// con by default). Zero means the default.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!(default = DEFAULT_CONNECT_TIMEOUT, "zero connect timeout, using default");
            self.connect_timeout = Duration::from_secs(DEFAULT_CONNECT_TIMEOUT);
        } else {
            self.connect_timeout = timeout;
        }
        self
    }

    pub fn reconnect(mut self, rule: ReconnectRule) -> Self {
        self.reconnect = rule;
        self
    }

    /// Link parameters (k, w, t1, t2, t3). Invalid values fall back to the defaults.
    pub fn link_config(mut self, config: LinkConfig) -> Self {
        self.link = config.validated();
        self
    }

    /// Replace the default on-connect action (STARTDT).
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(LinkHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_connect = hook(f);
        self
    }

    /// Replace the default on-disconnect action (STOPDT).
    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(LinkHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_disconnect = hook(f);
        self
    }

    /// Span every connection task runs in. Defaults to `iec104_client{server}`.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// TLS settings used for `tls://` addresses.
    #[cfg(feature = "tls")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
    pub fn tls(mut self, config: crate::transport::TlsClientConfig) -> Self {
        self.connector = Connector::tls(config);
        self
    }

    /// `host:port` of the station.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn reconnect_rule(&self) -> ReconnectRule {
        self.reconnect
    }

    fn connection_span(&self) -> Span {
        self.span
            .clone()
            .unwrap_or_else(|| info_span!("iec104_client", server = %self.address()))
    }
}

impl std::fmt::Debug for ClientOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOption")
            .field("server", &self.address())
            .field("secure", &self.secure)
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnect", &self.reconnect)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

fn parse_server(server: &str) -> Result<(String, u16, bool)> {
    let trimmed = server.trim();
    if trimmed.is_empty() {
        return Err(Iec104Error::config("empty server address"));
    }
    let mut address = if trimmed.starts_with(':') {
        format!("127.0.0.1{}", trimmed)
    } else {
        trimmed.to_string()
    };
    if !address.contains("://") {
        address.insert_str(0, "tcp://");
    }

    let url = Url::parse(&address)
        .map_err(|e| Iec104Error::config(format!("invalid server address {:?}: {}", server, e)))?;
    let secure = match url.scheme() {
        "tcp" => false,
        "tls" if cfg!(feature = "tls") => true,
        "tls" => {
            return Err(Iec104Error::config(
                "tls:// address requires the `tls` feature",
            ))
        }
        other => {
            return Err(Iec104Error::config(format!(
                "unsupported scheme {:?} in {:?}",
                other, server
            )))
        }
    };
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Iec104Error::config(format!("missing host in {:?}", server)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url.port().unwrap_or(DEFAULT_PORT);
    Ok((host, port, secure))
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iec104Event {
    /// Connected to server
    Connected,
    /// Data transfer started
    DataTransferStarted,
    /// Data transfer stopped
    DataTransferStopped,
    /// Disconnected from server
    Disconnected,
    /// Redial attempt `attempt` of the rule's budget
    Reconnecting { attempt: u32 },
    /// Link restored after a disconnect
    Reconnected,
    /// Retry budget exhausted; the client stays disconnected
    ReconnectFailed { attempts: u32 },
}

/// IEC 60870-5-104 client.
pub struct Iec104Client {
    option: Arc<ClientOption>,
    link: watch::Receiver<Option<LinkHandle>>,
    /// Reported while no link is published
    phase: Arc<watch::Sender<LinkState>>,
    shutdown: CancellationToken,
    supervisor: Option<JoinHandle<Result<()>>>,
    event_tx: mpsc::Sender<Iec104Event>,
    event_rx: Option<mpsc::Receiver<Iec104Event>>,
}

impl Iec104Client {
    pub fn new(option: ClientOption) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (_, link) = watch::channel(None);
        let (phase, _) = watch::channel(LinkState::Disconnected);
        Self {
            option: Arc::new(option),
            link,
            phase: Arc::new(phase),
            shutdown: CancellationToken::new(),
            supervisor: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    pub fn option(&self) -> &ClientOption {
        &self.option
    }

    /// Subscribe to events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<Iec104Event>> {
        self.event_rx.take()
    }

    /// Handle of the current connection, if any.
    pub fn link(&self) -> Option<LinkHandle> {
        self.link.borrow().clone()
    }

    /// State of the current connection, `Connecting` while dialing.
    pub fn state(&self) -> LinkState {
        self.link()
            .map_or_else(|| *self.phase.borrow(), |link| link.state())
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    fn current(&self) -> Result<LinkHandle> {
        self.link().ok_or(Iec104Error::NotConnected)
    }

    /// Dial the station and run the on-connect hook.
    ///
    /// Fails with `ConnectTimeout` or `HandshakeTimeout` without retrying; the
    /// reconnect rule only applies once a connection has been established.
    pub async fn connect(&mut self) -> Result<()> {
        if self.supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(Iec104Error::Connection("already connected".to_string()));
        }

        self.phase.send_replace(LinkState::Connecting);
        let (link, task) = match establish(&self.option).await {
            Ok(connected) => connected,
            Err(e) => {
                self.phase.send_replace(LinkState::Disconnected);
                return Err(e);
            }
        };
        emit(&self.event_tx, Iec104Event::Connected);

        let shutdown = CancellationToken::new();
        let (link_tx, link_rx) = watch::channel(Some(link.clone()));
        let supervisor = Supervisor {
            option: self.option.clone(),
            link: link_tx,
            phase: self.phase.clone(),
            events: self.event_tx.clone(),
            shutdown: shutdown.clone(),
        };
        let span = self.option.connection_span();
        self.supervisor = Some(tokio::spawn(supervisor.run(link, task).instrument(span)));
        self.link = link_rx;
        self.shutdown = shutdown;
        Ok(())
    }

    /// Wait until supervision ends.
    ///
    /// Returns `RetriesExhausted` when the reconnect budget ran out, `Ok`
    /// after [`close`](Self::close) or when the link was closed deliberately.
    pub async fn wait(&mut self) -> Result<()> {
        match self.supervisor.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                Err(Iec104Error::Connection(format!("supervisor failed: {}", e)))
            }),
            None => Ok(()),
        }
    }

    /// Run the on-disconnect hook, close the link and stop reconnecting.
    pub async fn close(&mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(link) = self.link() {
            if link.state().is_connected() {
                if let Err(e) = (self.option.on_disconnect)(link.clone()).await {
                    debug!(error = %e, "on-disconnect hook failed");
                }
            }
            link.close();
        }
        if let Some(task) = self.supervisor.take() {
            let _ = task.await;
        }
        Ok(())
    }

    /// STARTDT act, waiting for STARTDT con.
    pub async fn start_dt(&self) -> Result<()> {
        self.current()?.start_dt().await
    }

    /// STOPDT act, waiting for STOPDT con.
    pub async fn stop_dt(&self) -> Result<()> {
        self.current()?.stop_dt().await
    }

    /// Send any ASDU.
    pub async fn send_asdu(&self, asdu: &crate::types::Asdu) -> Result<()> {
        self.current()?.send_asdu(asdu).await
    }

    /// Send general interrogation command.
    pub async fn general_interrogation(&self, common_address: u16) -> Result<()> {
        self.current()?.general_interrogation(common_address).await
    }

    /// Send interrogation command with an explicit QOI.
    pub async fn interrogation(&self, common_address: u16, qoi: u8) -> Result<()> {
        self.current()?.interrogation(common_address, qoi).await
    }

    /// Send counter interrogation command.
    pub async fn counter_interrogation(&self, common_address: u16, qcc: u8) -> Result<()> {
        self.current()?
            .counter_interrogation(common_address, qcc)
            .await
    }

    /// Send read command.
    pub async fn read_command(&self, common_address: u16, ioa: Ioa) -> Result<()> {
        self.current()?.read_command(common_address, ioa).await
    }

    /// Send clock synchronization command.
    pub async fn clock_sync(&self, common_address: u16, time: Cp56Time2a) -> Result<()> {
        self.current()?.clock_sync(common_address, time).await
    }

    /// Send test command.
    pub async fn test_command(&self, common_address: u16) -> Result<()> {
        self.current()?.test_command(common_address).await
    }

    /// Send reset process command.
    pub async fn reset_process(&self, common_address: u16, qrp: u8) -> Result<()> {
        self.current()?.reset_process(common_address, qrp).await
    }

    /// Send delay acquisition command.
    pub async fn delay_acquisition(&self, common_address: u16, milliseconds: u16) -> Result<()> {
        self.current()?
            .delay_acquisition(common_address, milliseconds)
            .await
    }

    /// Send single command.
    pub async fn single_command(
        &self,
        common_address: u16,
        ioa: Ioa,
        value: bool,
        select: bool,
    ) -> Result<()> {
        self.current()?
            .single_command(common_address, ioa, value, select)
            .await
    }

    /// Send double command.
    pub async fn double_command(
        &self,
        common_address: u16,
        ioa: Ioa,
        value: DoublePointValue,
        select: bool,
    ) -> Result<()> {
        self.current()?
            .double_command(common_address, ioa, value, select)
            .await
    }

    /// Send setpoint command (floating point).
    pub async fn setpoint_float(
        &self,
        common_address: u16,
        ioa: Ioa,
        value: f32,
        select: bool,
    ) -> Result<()> {
        self.current()?
            .setpoint_float(common_address, ioa, value, select)
            .await
    }
}

impl Drop for Iec104Client {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(link) = self.link() {
            link.close();
        }
    }
}

impl std::fmt::Debug for Iec104Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iec104Client")
            .field("option", &self.option)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn emit(events: &mpsc::Sender<Iec104Event>, event: Iec104Event) {
    if let Err(e) = events.try_send(event) {
        debug!(event = ?e.into_inner(), "event dropped");
    }
}

/// Dial, start the engine and run the on-connect hook.
///
/// The dial and the hook each get `connect_timeout`.
async fn establish(option: &ClientOption) -> Result<(LinkHandle, JoinHandle<Result<()>>)> {
    if option.secure && !option.connector.is_secure() {
        return Err(Iec104Error::config("tls:// address without TLS configuration"));
    }

    let stream = timeout(
        option.connect_timeout,
        option.connector.dial(&option.host, option.port),
    )
    .await
    .map_err(|_| Iec104Error::ConnectTimeout)??;

    let span = option.connection_span();
    let (link, task) = connection::spawn(
        stream,
        option.link.clone(),
        Dispatcher::new(option.handler.clone()),
        span.clone(),
    );
    span.in_scope(|| info!("connected"));

    let hooked = timeout(option.connect_timeout, (option.on_connect)(link.clone()))
        .await
        .unwrap_or_else(|_| Err(Iec104Error::HandshakeTimeout("on-connect hook")));
    if let Err(e) = hooked {
        link.close();
        let _ = task.await;
        return Err(e);
    }
    Ok((link, task))
}

struct Supervisor {
    option: Arc<ClientOption>,
    link: watch::Sender<Option<LinkHandle>>,
    phase: Arc<watch::Sender<LinkState>>,
    events: mpsc::Sender<Iec104Event>,
    shutdown: CancellationToken,
}

impl Supervisor {
    async fn run(self, mut link: LinkHandle, mut task: JoinHandle<Result<()>>) -> Result<()> {
        let outcome = loop {
            let result = self.follow(&link, &mut task).await;
            self.link.send_replace(None);
            self.phase.send_replace(LinkState::Disconnected);
            emit(&self.events, Iec104Event::Disconnected);

            if self.shutdown.is_cancelled() || result.is_ok() {
                break Ok(());
            }
            if let Err(e) = (self.option.on_disconnect)(link.clone()).await {
                debug!(error = %e, "on-disconnect hook failed");
            }

            match self.reconnect().await {
                Ok(Some((next, next_task))) => {
                    info!("reconnected");
                    emit(&self.events, Iec104Event::Reconnected);
                    self.link.send_replace(Some(next.clone()));
                    link = next;
                    task = next_task;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.link.send_replace(None);
        self.phase.send_replace(LinkState::Disconnected);
        outcome
    }

    /// Report state changes until the connection task ends.
    async fn follow(&self, link: &LinkHandle, task: &mut JoinHandle<Result<()>>) -> Result<()> {
        let mut state = link.watch_state();
        let mut last = LinkState::StoppedDt;
        loop {
            let current = *state.borrow_and_update();
            if current != last {
                match current {
                    LinkState::StartedDt => emit(&self.events, Iec104Event::DataTransferStarted),
                    LinkState::StoppedDt if last == LinkState::StartedDt => {
                        emit(&self.events, Iec104Event::DataTransferStopped)
                    }
                    _ => {}
                }
                last = current;
            }

            tokio::select! {
                result = &mut *task => return flatten(result),
                changed = state.changed() => {
                    if changed.is_err() {
                        return flatten((&mut *task).await);
                    }
                }
            }
        }
    }

    /// Redial until connected, shut down (`Ok(None)`) or out of attempts.
    async fn reconnect(&self) -> Result<Option<(LinkHandle, JoinHandle<Result<()>>)>> {
        let rule = self.option.reconnect;
        let mut attempts = 0;
        while attempts < rule.retries {
            attempts += 1;
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(rule.interval) => {}
            }
            info!(attempt = attempts, retries = rule.retries, "reconnecting");
            self.phase.send_replace(LinkState::Connecting);
            emit(&self.events, Iec104Event::Reconnecting { attempt: attempts });

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                result = establish(&self.option) => result,
            };
            match result {
                Ok(connected) => return Ok(Some(connected)),
                Err(e) if e.is_retryable() => {
                    self.phase.send_replace(LinkState::Disconnected);
                    warn!(attempt = attempts, error = %e, "reconnect failed")
                }
                Err(e) => {
                    self.phase.send_replace(LinkState::Disconnected);
                    error!(error = %e, "reconnect aborted");
                    break;
                }
            }
        }
        warn!(attempts, "giving up");
        emit(&self.events, Iec104Event::ReconnectFailed { attempts });
        Err(Iec104Error::RetriesExhausted(attempts))
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.unwrap_or_else(|e| Err(Iec104Error::Connection(format!("connection task failed: {}", e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NoopHandler;
    use tokio_test::assert_err;

    fn option(server: &str) -> Result<ClientOption> {
        ClientOption::new(server, Arc::new(NoopHandler))
    }

    #[test]
    fn test_server_address_forms() {
        let opt = option("192.168.1.100").unwrap();
        assert_eq!(opt.address(), "192.168.1.100:2404");
        assert!(!opt.is_secure());

        assert_eq!(option(":2405").unwrap().address(), "127.0.0.1:2405");
        assert_eq!(option("tcp://rtu-7:2410").unwrap().address(), "rtu-7:2410");
        assert_eq!(option("localhost:2404").unwrap().port(), 2404);

        let opt = option("tcp://[::1]:2404").unwrap();
        assert_eq!(opt.host(), "::1");
        assert_eq!(opt.address(), "[::1]:2404");
    }

    #[test]
    fn test_server_address_rejected() {
        for bad in ["", "http://host:2404", "tcp://host:99999", "tcp://"] {
            assert!(
                matches!(option(bad), Err(Iec104Error::Config(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn test_tls_scheme_needs_feature() {
        assert!(matches!(
            option("tls://rtu:19998"),
            Err(Iec104Error::Config(_))
        ));
    }

    #[test]
    fn test_reconnect_rule_defaults() {
        assert_eq!(ReconnectRule::new(-1, -5), ReconnectRule::default());
        let rule = ReconnectRule::new(3, -1);
        assert_eq!(rule.retries, 3);
        assert_eq!(rule.interval, Duration::from_millis(3000));
        let rule = ReconnectRule::new(0, 250);
        assert_eq!(rule.retries, 0);
        assert_eq!(rule.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_connect_timeout_uses_default() {
        let opt = option(":2404").unwrap().connect_timeout(Duration::ZERO);
        assert_eq!(opt.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT));
    }

    #[test]
    fn test_subscribe_once() {
        let mut client = Iec104Client::new(option(":2404").unwrap());
        assert!(client.subscribe().is_some());
        assert!(client.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_commands_need_connection() {
        let client = Iec104Client::new(option(":2404").unwrap());
        assert_eq!(client.state(), LinkState::Disconnected);
        assert!(matches!(
            client.general_interrogation(1).await,
            Err(Iec104Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_not_retried() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = Iec104Client::new(option(&format!(":{}", port)).unwrap());
        let mut events = client.subscribe().unwrap();
        let err = assert_err!(client.connect().await);
        assert!(err.is_connection_error());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // accept but never confirm STARTDT
        let silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });

        let opt = option(&format!(":{}", port))
            .unwrap()
            .link_config(LinkConfig::new().t1(Duration::from_millis(200)));
        let mut client = Iec104Client::new(opt);
        assert!(matches!(
            client.connect().await,
            Err(Iec104Error::HandshakeTimeout(_))
        ));
        silent.abort();
    }

    #[tokio::test]
    async fn test_connect_timeout_bounds_startdt_wait() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        // t1 keeps its 15 s default
        let opt = option(&format!(":{}", port))
            .unwrap()
            .connect_timeout(Duration::from_millis(300));
        let mut client = Iec104Client::new(opt);
        let started = tokio::time::Instant::now();
        let result = timeout(Duration::from_secs(3), client.connect())
            .await
            .expect("connect must give up within the connect timeout");
        assert!(matches!(result, Err(Iec104Error::HandshakeTimeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(client.state(), LinkState::Disconnected);
        assert!(client.link().is_none());
        silent.abort();
    }

    #[tokio::test]
    async fn test_state_is_connecting_while_dialing() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let opt = option(&format!(":{}", port))
            .unwrap()
            .connect_timeout(Duration::from_millis(500));
        let mut client = Iec104Client::new(opt);
        let phase = client.phase.clone();
        let mut observed = phase.subscribe();
        let connecting = tokio::spawn(async move {
            observed
                .wait_for(|state| *state == LinkState::Connecting)
                .await
                .map(|state| *state)
        });

        assert_err!(client.connect().await);
        assert_eq!(connecting.await.unwrap().unwrap(), LinkState::Connecting);
        assert_eq!(client.state(), LinkState::Disconnected);
        silent.abort();
    }
}
