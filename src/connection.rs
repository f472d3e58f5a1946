//! Connection engine.
//!
//! Each connection runs three tasks sharing one [`CancellationToken`]:
//!
//! - the reader decodes frames from the stream and forwards them to the driver;
//! - the driver owns the [`LinkSession`] and the write half, runs the timers,
//!   and serializes every outbound frame;
//! - the dispatcher task invokes the [`Handler`](crate::dispatch::Handler)
//!   for each accepted ASDU, in arrival order.
//!
//! Handlers run outside the driver, so a handler may await
//! [`LinkHandle::send_asdu`] on its own connection.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::codec::{Apdu, Iec104Codec};
use crate::dispatch::Dispatcher;
use crate::error::{Iec104Error, Result};
use crate::link::{ControlReply, Inbound, LinkConfig, LinkSession, LinkState};
use crate::types::{
    Asdu, Cp56Time2a, DoublePointValue, Ioa, UFunction, QCC_GENERAL, QOI_STATION,
};

/// Frames buffered between the reader and the driver.
const INBOUND_QUEUE: usize = 32;

/// Activation requests buffered for the driver.
const CONTROL_QUEUE: usize = 4;

/// Decoded ASDUs waiting for the handler. While full, the driver stops
/// reading, so received I-frames are no longer acknowledged.
pub const DELIVER_QUEUE: usize = 64;

/// An encoded ASDU waiting for a send sequence number.
#[derive(Debug)]
struct Outbound {
    asdu: Bytes,
    done: Option<oneshot::Sender<Result<()>>>,
}

impl Outbound {
    fn complete(self, result: Result<()>) {
        if let Some(done) = self.done {
            let _ = done.send(result);
        }
    }
}

#[derive(Debug)]
struct ControlRequest {
    function: UFunction,
    reply: ControlReply,
}

/// Cloneable handle to one running connection.
///
/// All operations fail with [`Iec104Error::NotConnected`] once the
/// connection is gone.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    asdu_tx: mpsc::Sender<Outbound>,
    control_tx: mpsc::Sender<ControlRequest>,
    state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
    t1: Duration,
}

impl LinkHandle {
    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Whether data transfer is started.
    pub fn is_started(&self) -> bool {
        self.state() == LinkState::StartedDt
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Wait until the connection has shut down.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == LinkState::Disconnected).await;
    }

    /// Tear the connection down. Pending sends fail with `NotConnected`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn prepare(&self, asdu: &Asdu) -> Result<(Outbound, oneshot::Receiver<Result<()>>)> {
        if !self.is_started() {
            return Err(Iec104Error::NotConnected);
        }
        let asdu = asdu.encode()?;
        let (done, written) = oneshot::channel();
        Ok((
            Outbound {
                asdu,
                done: Some(done),
            },
            written,
        ))
    }

    /// Send one ASDU as an I-frame.
    ///
    /// Resolves once the frame is written to the stream. While `k` frames are
    /// unacknowledged this waits for the peer's acknowledgment, and when the
    /// queue is full it waits for room.
    pub async fn send_asdu(&self, asdu: &Asdu) -> Result<()> {
        let (outbound, written) = self.prepare(asdu)?;
        self.asdu_tx
            .send(outbound)
            .await
            .map_err(|_| Iec104Error::NotConnected)?;
        written.await.map_err(|_| Iec104Error::NotConnected)?
    }

    /// [`send_asdu`](Self::send_asdu) with a deadline.
    ///
    /// Fails with `SendTimeout` when the deadline passes. An ASDU that was
    /// already queued at that point may still be transmitted.
    pub async fn send_asdu_timeout(&self, asdu: &Asdu, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.send_asdu(asdu))
            .await
            .map_err(|_| Iec104Error::SendTimeout)?
    }

    /// Queue an ASDU without waiting. A full queue fails with `SendTimeout`.
    pub fn try_send_asdu(&self, asdu: &Asdu) -> Result<()> {
        let (mut outbound, _) = self.prepare(asdu)?;
        outbound.done = None;
        self.asdu_tx.try_send(outbound).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Iec104Error::SendTimeout,
            mpsc::error::TrySendError::Closed(_) => Iec104Error::NotConnected,
        })
    }

    /// STARTDT act, waiting for STARTDT con.
    pub async fn start_dt(&self) -> Result<()> {
        self.activate(UFunction::StartDtAct).await
    }

    /// STOPDT act, waiting for STOPDT con.
    pub async fn stop_dt(&self) -> Result<()> {
        self.activate(UFunction::StopDtAct).await
    }

    /// TESTFR act, waiting for TESTFR con.
    pub async fn test_frame(&self) -> Result<()> {
        self.activate(UFunction::TestFrAct).await
    }

    async fn activate(&self, function: UFunction) -> Result<()> {
        let (reply, confirmed) = oneshot::channel();
        self.control_tx
            .send(ControlRequest { function, reply })
            .await
            .map_err(|_| Iec104Error::NotConnected)?;

        tokio::select! {
            biased;
            result = tokio::time::timeout(self.t1, confirmed) => match result {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Iec104Error::NotConnected),
                Err(_) => Err(Iec104Error::HandshakeTimeout(function.name())),
            },
            _ = self.cancel.cancelled() => Err(Iec104Error::NotConnected),
        }
    }

    /// C_IC_NA_1 with the given qualifier of interrogation.
    pub async fn interrogation(&self, common_address: u16, qoi: u8) -> Result<()> {
        self.send_asdu(&Asdu::interrogation_command(common_address, qoi))
            .await
    }

    /// C_IC_NA_1 station interrogation (QOI 20).
    pub async fn general_interrogation(&self, common_address: u16) -> Result<()> {
        self.interrogation(common_address, QOI_STATION).await
    }

    /// C_CI_NA_1
    pub async fn counter_interrogation(&self, common_address: u16, qcc: u8) -> Result<()> {
        self.send_asdu(&Asdu::counter_interrogation_command(common_address, qcc))
            .await
    }

    /// C_CI_NA_1 general counter request (QCC 5).
    pub async fn general_counter_interrogation(&self, common_address: u16) -> Result<()> {
        self.counter_interrogation(common_address, QCC_GENERAL).await
    }

    /// C_RD_NA_1
    pub async fn read_command(&self, common_address: u16, ioa: Ioa) -> Result<()> {
        self.send_asdu(&Asdu::read_command(common_address, ioa)).await
    }

    /// C_CS_NA_1
    pub async fn clock_sync(&self, common_address: u16, time: Cp56Time2a) -> Result<()> {
        self.send_asdu(&Asdu::clock_sync_command(common_address, time))
            .await
    }

    /// C_TS_NA_1
    pub async fn test_command(&self, common_address: u16) -> Result<()> {
        self.send_asdu(&Asdu::test_command(common_address)).await
    }

    /// C_RP_NA_1
    pub async fn reset_process(&self, common_address: u16, qrp: u8) -> Result<()> {
        self.send_asdu(&Asdu::reset_process_command(common_address, qrp))
            .await
    }

    /// C_CD_NA_1
    pub async fn delay_acquisition(&self, common_address: u16, milliseconds: u16) -> Result<()> {
        self.send_asdu(&Asdu::delay_acquisition_command(common_address, milliseconds))
            .await
    }

    /// C_SC_NA_1
    pub async fn single_command(
        &self,
        common_address: u16,
        ioa: Ioa,
        value: bool,
        select: bool,
    ) -> Result<()> {
        self.send_asdu(&Asdu::single_command(common_address, ioa, value, select))
            .await
    }

    /// C_DC_NA_1
    pub async fn double_command(
        &self,
        common_address: u16,
        ioa: Ioa,
        value: DoublePointValue,
        select: bool,
    ) -> Result<()> {
        self.send_asdu(&Asdu::double_command(common_address, ioa, value, select))
            .await
    }

    /// C_SE_NC_1
    pub async fn setpoint_float(
        &self,
        common_address: u16,
        ioa: Ioa,
        value: f32,
        select: bool,
    ) -> Result<()> {
        self.send_asdu(&Asdu::setpoint_float_command(
            common_address,
            ioa,
            value,
            select,
        ))
        .await
    }

    /// A handle whose connection is already gone.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (asdu_tx, _) = mpsc::channel(1);
        let (control_tx, _) = mpsc::channel(1);
        let (_, state) = watch::channel(LinkState::Disconnected);
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self {
            asdu_tx,
            control_tx,
            state,
            cancel,
            t1: Duration::from_secs(crate::link::DEFAULT_T1_TIMEOUT),
        }
    }
}

/// Start the engine on an established stream.
///
/// The link begins in `StoppedDt`. The returned task resolves when the
/// connection ends: `Ok` after [`LinkHandle::close`], otherwise the error
/// that tore it down.
pub fn spawn<T>(
    stream: T,
    config: LinkConfig,
    dispatcher: Dispatcher,
    span: Span,
) -> (LinkHandle, JoinHandle<Result<()>>)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let now = Instant::now();
    let mut session = LinkSession::new(config, now);
    session.on_connected(now);
    let config = session.config().clone();

    let (read_half, write_half) = tokio::io::split(stream);
    let cancel = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (asdu_tx, asdu_rx) = mpsc::channel(config.send_queue);
    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
    let (deliver_tx, deliver_rx) = mpsc::channel(DELIVER_QUEUE);
    let (state_tx, state_rx) = watch::channel(session.state());

    let handle = LinkHandle {
        asdu_tx,
        control_tx,
        state: state_rx,
        cancel: cancel.clone(),
        t1: config.t1,
    };

    tokio::spawn(
        read_loop(
            FramedRead::new(read_half, Iec104Codec::new()),
            inbound_tx,
            cancel.clone(),
        )
        .instrument(span.clone()),
    );
    tokio::spawn(dispatch_loop(deliver_rx, dispatcher, handle.clone()).instrument(span.clone()));

    let driver = Driver {
        session,
        sink: FramedWrite::new(write_half, Iec104Codec::new()),
        inbound: inbound_rx,
        asdus: asdu_rx,
        controls: control_rx,
        deliver: deliver_tx,
        state: state_tx,
        cancel,
    };
    let task = tokio::spawn(driver.run().instrument(span));
    (handle, task)
}

async fn read_loop<R>(
    mut frames: FramedRead<ReadHalf<R>, Iec104Codec>,
    inbound: mpsc::Sender<Result<Apdu>>,
    cancel: CancellationToken,
) where
    R: AsyncRead,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = frames.next() => frame,
        };
        let Some(frame) = frame else {
            return;
        };
        let failed = frame.is_err();
        if inbound.send(frame).await.is_err() || failed {
            return;
        }
    }
}

async fn dispatch_loop(
    mut asdus: mpsc::Receiver<Asdu>,
    dispatcher: Dispatcher,
    link: LinkHandle,
) {
    while let Some(asdu) = asdus.recv().await {
        dispatcher.dispatch(&asdu, &link).await;
    }
}

enum Event {
    Cancelled,
    Frame(Option<Result<Apdu>>),
    Control(ControlRequest),
    Send(Outbound),
    Timer,
    /// Room freed in the delivery queue
    Drained,
    DispatchStopped,
}

struct Driver<T> {
    session: LinkSession,
    sink: FramedWrite<WriteHalf<T>, Iec104Codec>,
    inbound: mpsc::Receiver<Result<Apdu>>,
    asdus: mpsc::Receiver<Outbound>,
    controls: mpsc::Receiver<ControlRequest>,
    deliver: mpsc::Sender<Asdu>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

impl<T> Driver<T>
where
    T: AsyncRead + AsyncWrite,
{
    async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        match &result {
            Ok(()) => info!("connection closed"),
            Err(e) => error!(error = %e, "connection failed"),
        }

        self.session.on_closing();
        self.publish_state();
        let _ = self.sink.close().await;
        self.cancel.cancel();
        self.session.on_disconnected();
        self.publish_state();
        self.fail_queued();
        result
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.transmit().await?;

            let deadline = self.session.poll_timeout();
            let timer = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
            let can_send = self.session.can_send();
            let can_deliver = self.deliver.capacity() > 0;

            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Event::Cancelled,
                _ = self.deliver.closed() => Event::DispatchStopped,
                frame = self.inbound.recv(), if can_deliver => Event::Frame(frame),
                permit = self.deliver.reserve(), if !can_deliver => match permit {
                    Ok(_) => Event::Drained,
                    Err(_) => Event::DispatchStopped,
                },
                Some(request) = self.controls.recv() => Event::Control(request),
                _ = timer, if deadline.is_some() => Event::Timer,
                Some(outbound) = self.asdus.recv(), if can_send => Event::Send(outbound),
            };

            match event {
                Event::Cancelled => return Ok(()),
                Event::Frame(Some(Ok(apdu))) => self.on_apdu(apdu)?,
                Event::Frame(Some(Err(e))) => return Err(e),
                Event::Frame(None) => {
                    return Err(Iec104Error::Connection("closed by peer".to_string()))
                }
                Event::Control(request) => {
                    self.session
                        .begin_control(request.function, Some(request.reply), Instant::now());
                }
                Event::Timer => self.session.handle_timeout(Instant::now())?,
                Event::Send(outbound) => self.send_i_frame(outbound).await?,
                Event::Drained => {}
                Event::DispatchStopped => {
                    return Err(Iec104Error::Connection("dispatcher stopped".to_string()))
                }
            }
            self.publish_state();
        }
    }

    fn on_apdu(&mut self, apdu: Apdu) -> Result<()> {
        debug!(%apdu, "recv");
        match self.session.on_frame(apdu.apci, Instant::now())? {
            Inbound::Deliver => match apdu.decode_asdu() {
                Ok(asdu) => self.deliver.try_send(asdu).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => {
                        Iec104Error::Connection("delivery queue overflow".to_string())
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        Iec104Error::Connection("dispatcher stopped".to_string())
                    }
                })?,
                Err(e) if e.is_skippable_asdu() => {
                    warn!(error = %e, "ASDU acknowledged but not dispatched");
                }
                Err(e) => return Err(e),
            },
            Inbound::Consumed | Inbound::Discarded => {}
        }
        Ok(())
    }

    async fn send_i_frame(&mut self, outbound: Outbound) -> Result<()> {
        let apci = match self.session.next_i_frame(Instant::now()) {
            Ok(apci) => apci,
            Err(e) => {
                outbound.complete(Err(e));
                return Ok(());
            }
        };
        let apdu = Apdu {
            apci,
            asdu: outbound.asdu.clone(),
        };
        debug!(%apdu, "send");
        match self.sink.send(apdu).await {
            Ok(()) => {
                outbound.complete(Ok(()));
                Ok(())
            }
            Err(e) => {
                outbound.complete(Err(Iec104Error::NotConnected));
                Err(e)
            }
        }
    }

    /// Write every control frame the session has queued.
    async fn transmit(&mut self) -> Result<()> {
        let mut wrote = false;
        while let Some(apci) = self.session.poll_transmit(Instant::now()) {
            debug!(%apci, "send");
            self.sink
                .feed(Apdu {
                    apci,
                    asdu: Bytes::new(),
                })
                .await?;
            wrote = true;
        }
        if wrote {
            self.sink.flush().await?;
        }
        Ok(())
    }

    fn publish_state(&mut self) {
        let state = self.session.state();
        let previous = *self.state.borrow();
        if state == previous {
            return;
        }
        info!(from = %previous, to = %state, "link state changed");
        if previous == LinkState::StartedDt {
            self.fail_queued();
        }
        self.state.send_replace(state);
    }

    /// Queued sends are dropped when data transfer stops.
    fn fail_queued(&mut self) {
        while let Ok(outbound) = self.asdus.try_recv() {
            outbound.complete(Err(Iec104Error::NotConnected));
        }
    }
}
