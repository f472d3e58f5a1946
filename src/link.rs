//! Link state machine.
//!
//! `LinkSession` owns the sequence counters, acknowledgment windows and
//! the t1/t2/t3 timers of one connection. It performs no I/O: the
//! connection engine feeds it received frames and clock ticks, then drains
//! the control frames it wants to transmit with [`LinkSession::poll_transmit`].
//!
//! ```text
//! Disconnected -> Connecting -> StoppedDt <-> StartedDt
//!       ^                          |             |
//!       +------ Closing <----------+-------------+
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Iec104Error, Result};
use crate::types::{Apci, SeqNum, UFunction, SEQ_MODULUS};

/// Default T1 timeout (send or test confirmation) in seconds.
pub const DEFAULT_T1_TIMEOUT: u64 = 15;

/// Default T2 timeout (acknowledge received I-frames) in seconds.
pub const DEFAULT_T2_TIMEOUT: u64 = 10;

/// Default T3 timeout (idle before TESTFR) in seconds.
pub const DEFAULT_T3_TIMEOUT: u64 = 20;

/// Default K parameter (max unconfirmed sent I-frames).
pub const DEFAULT_K: u16 = 12;

/// Default W parameter (received I-frames before an S-frame is due).
pub const DEFAULT_W: u16 = 8;

/// Default capacity of the outbound ASDU queue.
pub const DEFAULT_SEND_QUEUE: usize = 64;

/// Per-connection protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Max unconfirmed sent I-frames
    pub k: u16,
    /// Received I-frames that force an S-frame
    pub w: u16,
    /// Confirmation timeout for sent I-frames and U-frame activations
    pub t1: Duration,
    /// Acknowledgment delay for received I-frames
    pub t2: Duration,
    /// Idle time before a TESTFR act is sent
    pub t3: Duration,
    /// Outbound ASDU queue capacity
    pub send_queue: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            w: DEFAULT_W,
            t1: Duration::from_secs(DEFAULT_T1_TIMEOUT),
            t2: Duration::from_secs(DEFAULT_T2_TIMEOUT),
            t3: Duration::from_secs(DEFAULT_T3_TIMEOUT),
            send_queue: DEFAULT_SEND_QUEUE,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn k(mut self, k: u16) -> Self {
        self.k = k;
        self
    }

    pub fn w(mut self, w: u16) -> Self {
        self.w = w;
        self
    }

    pub fn t1(mut self, timeout: Duration) -> Self {
        self.t1 = timeout;
        self
    }

    pub fn t2(mut self, timeout: Duration) -> Self {
        self.t2 = timeout;
        self
    }

    pub fn t3(mut self, timeout: Duration) -> Self {
        self.t3 = timeout;
        self
    }

    pub fn send_queue(mut self, capacity: usize) -> Self {
        self.send_queue = capacity;
        self
    }

    /// Replace out-of-range values with the standard defaults.
    ///
    /// Every substitution is logged at `warn`.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.k == 0 || self.k >= SEQ_MODULUS {
            warn!(k = self.k, default = defaults.k, "invalid k, using default");
            self.k = defaults.k;
        }
        if self.w == 0 || self.w > self.k {
            let w = defaults.w.min(self.k);
            warn!(w = self.w, k = self.k, default = w, "invalid w, using default");
            self.w = w;
        }
        for (name, value, default) in [
            ("t1", &mut self.t1, defaults.t1),
            ("t2", &mut self.t2, defaults.t2),
            ("t3", &mut self.t3, defaults.t3),
        ] {
            if value.is_zero() {
                warn!(timer = name, default = ?default, "zero timeout, using default");
                *value = default;
            }
        }
        if self.send_queue == 0 {
            warn!(default = defaults.send_queue, "zero send queue, using default");
            self.send_queue = defaults.send_queue;
        }
        self
    }
}

/// Link state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No transport
    Disconnected,
    /// Transport being established; reported by the client while it dials
    Connecting,
    /// Transport up, data transfer not started
    StoppedDt,
    /// Data transfer active (STARTDT confirmed)
    StartedDt,
    /// Shutting down
    Closing,
}

impl LinkState {
    /// Whether a transport is established.
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::StoppedDt | Self::StartedDt)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::StoppedDt => "stopped",
            Self::StartedDt => "started",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Waiter for the confirmation of a U-frame activation.
pub type ControlReply = oneshot::Sender<Result<()>>;

/// How a received frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// I-frame accepted; its ASDU goes to the dispatcher
    Deliver,
    /// Link-layer frame fully handled by the session
    Consumed,
    /// Dropped without changing any counter
    Discarded,
}

/// Single-slot rendezvous for an outstanding STARTDT/STOPDT/TESTFR activation.
#[derive(Debug)]
struct PendingControl {
    function: UFunction,
    sent_at: Instant,
    reply: Option<ControlReply>,
}

impl PendingControl {
    fn resolve(self, result: Result<()>) {
        if let Some(reply) = self.reply {
            let _ = reply.send(result);
        }
    }
}

/// Sans-IO state of one IEC 104 link.
#[derive(Debug)]
pub struct LinkSession {
    config: LinkConfig,
    state: LinkState,
    /// V(S): next send sequence number
    send_seq: SeqNum,
    /// Oldest sent I-frame not yet acknowledged by the peer
    ack_seq: SeqNum,
    /// V(R): next expected receive sequence number
    recv_seq: SeqNum,
    /// Send time of each unacknowledged I-frame, oldest first
    sent_at: VecDeque<Instant>,
    /// Received I-frames not yet acknowledged to the peer
    unacked_recv: u16,
    /// Arrival of the oldest unacknowledged received I-frame (t2 start)
    recv_unacked_since: Option<Instant>,
    /// Last frame sent or received (t3 start)
    last_activity: Instant,
    pending: Option<PendingControl>,
    /// Peer asked for STOPDT while our I-frames were still unacknowledged
    stop_requested: bool,
    outbox: VecDeque<Apci>,
}

impl LinkSession {
    pub fn new(config: LinkConfig, now: Instant) -> Self {
        Self {
            config: config.validated(),
            state: LinkState::Disconnected,
            send_seq: SeqNum::default(),
            ack_seq: SeqNum::default(),
            recv_seq: SeqNum::default(),
            sent_at: VecDeque::new(),
            unacked_recv: 0,
            recv_unacked_since: None,
            last_activity: now,
            pending: None,
            stop_requested: false,
            outbox: VecDeque::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// V(S), the sequence number of the next I-frame.
    #[inline]
    pub fn send_seq(&self) -> SeqNum {
        self.send_seq
    }

    /// V(R), the next expected receive sequence number.
    #[inline]
    pub fn recv_seq(&self) -> SeqNum {
        self.recv_seq
    }

    /// Sent I-frames awaiting acknowledgment.
    #[inline]
    pub fn unacked_sent(&self) -> u16 {
        self.sent_at.len() as u16
    }

    /// Transport established: counters restart at zero, data transfer stopped.
    pub fn on_connected(&mut self, now: Instant) {
        self.reset(now);
        self.state = LinkState::StoppedDt;
    }

    pub fn on_closing(&mut self) {
        if self.state != LinkState::Disconnected {
            self.state = LinkState::Closing;
        }
    }

    /// Transport gone. Any waiter on a control confirmation is released.
    pub fn on_disconnected(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.resolve(Err(Iec104Error::NotConnected));
        }
        self.reset(self.last_activity);
        self.state = LinkState::Disconnected;
    }

    fn reset(&mut self, now: Instant) {
        self.send_seq = SeqNum::default();
        self.ack_seq = SeqNum::default();
        self.recv_seq = SeqNum::default();
        self.sent_at.clear();
        self.unacked_recv = 0;
        self.recv_unacked_since = None;
        self.last_activity = now;
        self.stop_requested = false;
        self.outbox.clear();
    }

    /// Whether an I-frame may be transmitted right now.
    pub fn can_send(&self) -> bool {
        self.state == LinkState::StartedDt
            && self.unacked_sent() < self.config.k
            && !self.stop_requested
            && !matches!(
                self.pending,
                Some(PendingControl {
                    function: UFunction::StopDtAct,
                    ..
                })
            )
    }

    /// Allocate the control field for the next outbound I-frame.
    ///
    /// The frame piggy-backs an acknowledgment of everything received.
    pub fn next_i_frame(&mut self, now: Instant) -> Result<Apci> {
        if self.state != LinkState::StartedDt {
            return Err(Iec104Error::NotConnected);
        }
        if self.unacked_sent() >= self.config.k {
            return Err(Iec104Error::TooManyUnconfirmed(self.config.k));
        }
        let apci = Apci::i_frame(self.send_seq, self.recv_seq);
        self.send_seq = self.send_seq.next();
        self.sent_at.push_back(now);
        self.unacked_recv = 0;
        self.recv_unacked_since = None;
        self.last_activity = now;
        Ok(apci)
    }

    /// Queue a U-frame activation. `reply` resolves when the confirmation
    /// arrives, on t1 expiry, or when the link goes down.
    pub fn begin_control(
        &mut self,
        function: UFunction,
        reply: Option<ControlReply>,
        now: Instant,
    ) {
        let control = PendingControl {
            function,
            sent_at: now,
            reply,
        };
        let ready = match function {
            UFunction::StartDtAct if self.state == LinkState::StartedDt => Some(Ok(())),
            UFunction::StopDtAct if self.state == LinkState::StoppedDt => Some(Ok(())),
            UFunction::StartDtAct | UFunction::StopDtAct | UFunction::TestFrAct
                if !self.state.is_connected() =>
            {
                Some(Err(Iec104Error::NotConnected))
            }
            UFunction::StartDtCon | UFunction::StopDtCon | UFunction::TestFrCon => Some(Err(
                Iec104Error::protocol(format!("{} is not an activation", function.name())),
            )),
            _ if self.pending.is_some() => Some(Err(Iec104Error::protocol(format!(
                "{} requested while another activation is pending",
                function.name()
            )))),
            _ => None,
        };
        if let Some(result) = ready {
            control.resolve(result);
            return;
        }
        debug!(function = function.name(), "sending activation");
        self.outbox.push_back(Apci::u_frame(function));
        self.pending = Some(control);
    }

    /// Process one received frame.
    pub fn on_frame(&mut self, apci: Apci, now: Instant) -> Result<Inbound> {
        self.last_activity = now;
        match apci {
            Apci::IFrame { send_seq, recv_seq } => {
                if self.state != LinkState::StartedDt {
                    warn!(state = %self.state, %apci, "I-frame outside data transfer, discarded");
                    return Ok(Inbound::Discarded);
                }
                if send_seq != self.recv_seq {
                    return Err(Iec104Error::SequenceMismatch {
                        expected: self.recv_seq.value(),
                        actual: send_seq.value(),
                    });
                }
                self.recv_seq = self.recv_seq.next();
                self.unacked_recv += 1;
                self.recv_unacked_since.get_or_insert(now);
                self.acknowledge(recv_seq)?;
                if self.unacked_recv >= self.config.w {
                    self.flush_ack();
                }
                Ok(Inbound::Deliver)
            }
            Apci::SFrame { recv_seq } => {
                self.acknowledge(recv_seq)?;
                Ok(Inbound::Consumed)
            }
            Apci::UFrame { function } => {
                self.on_control(function);
                Ok(Inbound::Consumed)
            }
        }
    }

    fn on_control(&mut self, function: UFunction) {
        match function {
            UFunction::TestFrAct => self.outbox.push_back(Apci::u_frame(UFunction::TestFrCon)),
            UFunction::StartDtAct => {
                self.outbox.push_back(Apci::u_frame(UFunction::StartDtCon));
                self.state = LinkState::StartedDt;
            }
            UFunction::StopDtAct => {
                if self.sent_at.is_empty() {
                    self.finish_stop();
                } else {
                    debug!(unacked = self.unacked_sent(), "STOPDT deferred until acknowledged");
                    self.stop_requested = true;
                }
            }
            UFunction::StartDtCon | UFunction::StopDtCon | UFunction::TestFrCon => {
                let expected = self
                    .pending
                    .as_ref()
                    .and_then(|p| p.function.confirmation());
                if expected != Some(function) {
                    warn!(function = function.name(), "unexpected confirmation ignored");
                    return;
                }
                match function {
                    UFunction::StartDtCon => self.state = LinkState::StartedDt,
                    UFunction::StopDtCon => self.state = LinkState::StoppedDt,
                    _ => {}
                }
                if let Some(pending) = self.pending.take() {
                    pending.resolve(Ok(()));
                }
            }
        }
    }

    /// Acknowledge our I-frames up to (excluding) `ack`.
    fn acknowledge(&mut self, ack: SeqNum) -> Result<()> {
        if !ack.within(self.ack_seq, self.send_seq) {
            return Err(Iec104Error::AckOutOfWindow {
                ack: ack.value(),
                low: self.ack_seq.value(),
                high: self.send_seq.value(),
            });
        }
        let confirmed = self.ack_seq.distance_to(ack);
        self.sent_at.drain(..usize::from(confirmed));
        self.ack_seq = ack;
        if self.stop_requested && self.sent_at.is_empty() {
            self.finish_stop();
        }
        Ok(())
    }

    fn finish_stop(&mut self) {
        self.stop_requested = false;
        self.flush_ack();
        self.outbox.push_back(Apci::u_frame(UFunction::StopDtCon));
        self.state = LinkState::StoppedDt;
    }

    fn flush_ack(&mut self) {
        if self.unacked_recv > 0 {
            self.outbox.push_back(Apci::s_frame(self.recv_seq));
            self.unacked_recv = 0;
            self.recv_unacked_since = None;
        }
    }

    /// Next control frame (S or U) to transmit.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Apci> {
        let apci = self.outbox.pop_front()?;
        self.last_activity = now;
        Some(apci)
    }

    /// Earliest instant at which [`handle_timeout`](Self::handle_timeout) has work.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if !self.state.is_connected() {
            return None;
        }
        let t1 = self.config.t1;
        [
            self.sent_at.front().map(|sent| *sent + t1),
            self.pending.as_ref().map(|p| p.sent_at + t1),
            self.recv_unacked_since.map(|since| since + self.config.t2),
            self.pending
                .is_none()
                .then(|| self.last_activity + self.config.t3),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run timers. An error means the link must be torn down.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if !self.state.is_connected() {
            return Ok(());
        }
        let t1 = self.config.t1;

        if let Some(sent) = self.sent_at.front() {
            if now.duration_since(*sent) >= t1 {
                warn!(unacked = self.unacked_sent(), "t1 expired waiting for acknowledgment");
                return Err(Iec104Error::T1Timeout);
            }
        }

        if let Some(pending) = &self.pending {
            if now.duration_since(pending.sent_at) >= t1 {
                let function = pending.function;
                warn!(function = function.name(), "t1 expired waiting for confirmation");
                if let Some(pending) = self.pending.take() {
                    pending.resolve(Err(Iec104Error::HandshakeTimeout(function.name())));
                }
                return Err(Iec104Error::T1Timeout);
            }
        }

        if let Some(since) = self.recv_unacked_since {
            if now.duration_since(since) >= self.config.t2 {
                self.flush_ack();
            }
        }

        if self.pending.is_none() && now.duration_since(self.last_activity) >= self.config.t3 {
            debug!("t3 idle, sending TESTFR");
            self.begin_control(UFunction::TestFrAct, None, now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(config: LinkConfig) -> (LinkSession, Instant) {
        let now = Instant::now();
        let mut session = LinkSession::new(config, now);
        session.on_connected(now);
        session.on_frame(Apci::u_frame(UFunction::StartDtAct), now).unwrap();
        assert_eq!(
            session.poll_transmit(now),
            Some(Apci::u_frame(UFunction::StartDtCon))
        );
        (session, now)
    }

    fn i_frame(send: u16, recv: u16) -> Apci {
        Apci::i_frame(SeqNum::new(send), SeqNum::new(recv))
    }

    #[test]
    fn test_config_substitutes_defaults() {
        let config = LinkConfig::new()
            .k(0)
            .w(0)
            .t1(Duration::ZERO)
            .send_queue(0)
            .validated();
        assert_eq!(config, LinkConfig::default());

        let config = LinkConfig::new().k(4).w(9).validated();
        assert_eq!(config.k, 4);
        assert_eq!(config.w, 4);

        let config = LinkConfig::new().t3(Duration::from_millis(200)).validated();
        assert_eq!(config.t3, Duration::from_millis(200));
    }

    #[test]
    fn test_startdt_handshake() {
        let now = Instant::now();
        let mut session = LinkSession::new(LinkConfig::default(), now);
        session.on_connected(now);
        assert_eq!(session.state(), LinkState::StoppedDt);

        let (tx, mut rx) = oneshot::channel();
        session.begin_control(UFunction::StartDtAct, Some(tx), now);
        assert_eq!(
            session.poll_transmit(now),
            Some(Apci::u_frame(UFunction::StartDtAct))
        );
        assert!(!session.can_send());
        assert!(matches!(
            session.next_i_frame(now),
            Err(Iec104Error::NotConnected)
        ));
        assert!(rx.try_recv().is_err());

        session
            .on_frame(Apci::u_frame(UFunction::StartDtCon), now)
            .unwrap();
        assert_eq!(session.state(), LinkState::StartedDt);
        assert!(session.can_send());
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_control_needs_transport() {
        let now = Instant::now();
        let mut session = LinkSession::new(LinkConfig::default(), now);
        assert_eq!(session.state(), LinkState::Disconnected);
        let (tx, mut rx) = oneshot::channel();
        session.begin_control(UFunction::StartDtAct, Some(tx), now);
        assert!(matches!(rx.try_recv(), Ok(Err(Iec104Error::NotConnected))));
        assert_eq!(session.poll_transmit(now), None);
        assert_eq!(session.poll_timeout(), None);
    }

    #[test]
    fn test_flow_control_window() {
        let (mut session, now) = started(LinkConfig::new().k(3).w(2));

        for expected in 0..3 {
            assert!(session.can_send());
            assert_eq!(session.next_i_frame(now).unwrap(), i_frame(expected, 0));
        }
        assert!(!session.can_send());
        assert!(matches!(
            session.next_i_frame(now),
            Err(Iec104Error::TooManyUnconfirmed(3))
        ));

        session
            .on_frame(Apci::s_frame(SeqNum::new(2)), now)
            .unwrap();
        assert_eq!(session.unacked_sent(), 1);
        assert!(session.can_send());
    }

    #[test]
    fn test_ack_outside_window_is_fatal() {
        let (mut session, now) = started(LinkConfig::default());
        session.next_i_frame(now).unwrap();
        session.next_i_frame(now).unwrap();

        let err = session
            .on_frame(Apci::s_frame(SeqNum::new(5)), now)
            .unwrap_err();
        assert!(matches!(
            err,
            Iec104Error::AckOutOfWindow {
                ack: 5,
                low: 0,
                high: 2
            }
        ));
    }

    #[test]
    fn test_sequence_mismatch_is_fatal() {
        let (mut session, now) = started(LinkConfig::default());
        session.on_frame(i_frame(0, 0), now).unwrap();
        assert!(matches!(
            session.on_frame(i_frame(2, 0), now),
            Err(Iec104Error::SequenceMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_w_forces_s_frame() {
        let (mut session, now) = started(LinkConfig::new().w(2));
        assert_eq!(session.on_frame(i_frame(0, 0), now).unwrap(), Inbound::Deliver);
        assert_eq!(session.poll_transmit(now), None);
        session.on_frame(i_frame(1, 0), now).unwrap();
        assert_eq!(
            session.poll_transmit(now),
            Some(Apci::s_frame(SeqNum::new(2)))
        );
    }

    #[test]
    fn test_t2_forces_s_frame() {
        let (mut session, now) = started(LinkConfig::default());
        session.on_frame(i_frame(0, 0), now).unwrap();
        assert_eq!(session.poll_timeout(), Some(now + session.config().t2));

        session.handle_timeout(now + Duration::from_secs(1)).unwrap();
        assert_eq!(session.poll_transmit(now), None);

        session.handle_timeout(now + session.config().t2).unwrap();
        assert_eq!(
            session.poll_transmit(now),
            Some(Apci::s_frame(SeqNum::new(1)))
        );
    }

    #[test]
    fn test_outbound_i_frame_piggybacks_ack() {
        let (mut session, now) = started(LinkConfig::default());
        session.on_frame(i_frame(0, 0), now).unwrap();
        session.on_frame(i_frame(1, 0), now).unwrap();
        assert_eq!(session.next_i_frame(now).unwrap(), i_frame(0, 2));
        session.handle_timeout(now + session.config().t2).unwrap();
        assert_eq!(session.poll_transmit(now), None);
    }

    #[test]
    fn test_t3_sends_single_testfr_then_t1_fails() {
        let config = LinkConfig::new()
            .t1(Duration::from_secs(2))
            .t3(Duration::from_secs(5));
        let (mut session, start) = started(config);

        let idle = start + Duration::from_secs(5);
        session.handle_timeout(idle).unwrap();
        assert_eq!(
            session.poll_transmit(idle),
            Some(Apci::u_frame(UFunction::TestFrAct))
        );

        // still waiting: no second TESTFR act
        session.handle_timeout(idle + Duration::from_secs(1)).unwrap();
        assert_eq!(session.poll_transmit(idle), None);

        assert!(matches!(
            session.handle_timeout(idle + Duration::from_secs(2)),
            Err(Iec104Error::T1Timeout)
        ));
    }

    #[test]
    fn test_testfr_con_clears_pending_test() {
        let config = LinkConfig::new().t3(Duration::from_secs(5));
        let (mut session, start) = started(config);
        let idle = start + Duration::from_secs(5);
        session.handle_timeout(idle).unwrap();
        session.poll_transmit(idle);

        session
            .on_frame(Apci::u_frame(UFunction::TestFrCon), idle)
            .unwrap();
        assert_eq!(session.poll_timeout(), Some(idle + Duration::from_secs(5)));
    }

    #[test]
    fn test_peer_testfr_answered() {
        let now = Instant::now();
        let mut session = LinkSession::new(LinkConfig::default(), now);
        session.on_connected(now);
        session
            .on_frame(Apci::u_frame(UFunction::TestFrAct), now)
            .unwrap();
        assert_eq!(
            session.poll_transmit(now),
            Some(Apci::u_frame(UFunction::TestFrCon))
        );
    }

    #[test]
    fn test_i_frame_discarded_when_stopped() {
        let now = Instant::now();
        let mut session = LinkSession::new(LinkConfig::default(), now);
        session.on_connected(now);
        assert_eq!(
            session.on_frame(i_frame(0, 0), now).unwrap(),
            Inbound::Discarded
        );
        assert_eq!(session.recv_seq(), SeqNum::new(0));
    }

    #[test]
    fn test_peer_stopdt_waits_for_acknowledgment() {
        let (mut session, now) = started(LinkConfig::default());
        session.on_frame(i_frame(0, 0), now).unwrap();
        session.next_i_frame(now).unwrap();
        session.next_i_frame(now).unwrap();

        session
            .on_frame(Apci::u_frame(UFunction::StopDtAct), now)
            .unwrap();
        assert_eq!(session.state(), LinkState::StartedDt);
        assert!(!session.can_send());
        assert_eq!(session.poll_transmit(now), None);

        session
            .on_frame(Apci::s_frame(SeqNum::new(2)), now)
            .unwrap();
        assert_eq!(session.state(), LinkState::StoppedDt);
        // the frame sent before the STOPDT request already acknowledged our receipt
        assert_eq!(
            session.poll_transmit(now),
            Some(Apci::u_frame(UFunction::StopDtCon))
        );
    }

    #[test]
    fn test_peer_stopdt_flushes_receive_ack() {
        let (mut session, now) = started(LinkConfig::default());
        session.on_frame(i_frame(0, 0), now).unwrap();
        session
            .on_frame(Apci::u_frame(UFunction::StopDtAct), now)
            .unwrap();
        assert_eq!(
            session.poll_transmit(now),
            Some(Apci::s_frame(SeqNum::new(1)))
        );
        assert_eq!(
            session.poll_transmit(now),
            Some(Apci::u_frame(UFunction::StopDtCon))
        );
    }

    #[test]
    fn test_sequence_wraps() {
        let (mut session, now) = started(LinkConfig::new().k(8).w(8));
        let total = u32::from(SEQ_MODULUS) + 3;
        for n in 1..=total {
            session.next_i_frame(now).unwrap();
            if n % 8 == 0 {
                let ack = session.send_seq();
                session.on_frame(Apci::s_frame(ack), now).unwrap();
            }
        }
        assert_eq!(session.send_seq(), SeqNum::new(3));
        assert_eq!(session.unacked_sent(), 3);

        // acknowledging 32767 would reach behind the window
        assert!(session
            .on_frame(Apci::s_frame(SeqNum::new(SEQ_MODULUS - 1)), now)
            .is_err());
    }

    #[test]
    fn test_disconnect_releases_waiter() {
        let now = Instant::now();
        let mut session = LinkSession::new(LinkConfig::default(), now);
        session.on_connected(now);
        let (tx, mut rx) = oneshot::channel();
        session.begin_control(UFunction::StartDtAct, Some(tx), now);
        session.on_disconnected();
        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(matches!(rx.try_recv(), Ok(Err(Iec104Error::NotConnected))));
        assert_eq!(session.poll_timeout(), None);
    }
}
