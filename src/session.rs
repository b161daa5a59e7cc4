//! Per-neighbor session state machine: the OPEN dance, ACK-driven reliable
//! delivery with backoff, keepalives, and orderly teardown.
//!
//! A session is keyed by peer MAC and owned by the engine's session table.
//! Handlers never remove the session themselves; they return a
//! [`Disposition`] and the caller drops closed sessions after the fact, so
//! the table is never mutated mid-iteration.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::message::{
    AckPdu, ErrorCode, ErrorType, KeepAlivePdu, OpenPdu, Pdu, PduType, VendorPdu,
};
use crate::northbound::Northbound;
use crate::transport::PduWriter;
use crate::types::MacAddr;

/// Multiplexes any number of timeout checks onto a single sleep.
///
/// One `Timer` is created per pass through the timer task; each check either
/// fires or contributes its deadline, and the task then sleeps until the
/// earliest contributed deadline or an external wake, whichever comes first.
#[derive(Debug)]
pub struct Timer {
    now: Instant,
    wake: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            now: Instant::now(),
            wake: None,
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Schedules a wakeup after `delay`, returning the absolute deadline.
    pub fn wake_after(&mut self, delay: Duration) -> Instant {
        let when = self.now + delay;
        if self.wake.is_none_or(|wake| when < wake) {
            self.wake = Some(when);
        }
        when
    }

    /// Has `when` passed? If not, make sure we wake up for it.
    pub fn check_expired(&mut self, when: Instant) -> bool {
        let expired = when <= self.now;
        if !expired && self.wake.is_none_or(|wake| when < wake) {
            self.wake = Some(when);
        }
        expired
    }

    /// Earliest deadline contributed so far, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.wake
    }
}

impl Default for Timer {
    fn default() -> Self {
        Timer::new()
    }
}

/// Hook for VENDOR PDUs of one enterprise number. A failing hook is logged
/// and otherwise ignored.
pub type VendorHook = Box<dyn Fn(MacAddr, &VendorPdu) -> anyhow::Result<()>>;

/// Dispatch table from enterprise number to hook.
#[derive(Default)]
pub struct VendorRegistry {
    hooks: HashMap<u32, VendorHook>,
}

impl VendorRegistry {
    pub fn register(&mut self, enterprise_number: u32, hook: VendorHook) {
        self.hooks.insert(enterprise_number, hook);
    }

    fn dispatch(&self, peer: MacAddr, pdu: &VendorPdu) {
        match self.hooks.get(&pdu.enterprise_number) {
            Some(hook) => {
                if let Err(err) = hook(peer, pdu) {
                    warn!(%peer, %pdu, error = %err, "vendor hook failed");
                }
            }
            None => debug!(%peer, %pdu, "no hook for enterprise number"),
        }
    }
}

/// What the caller should do with the session after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Close,
}

/// Shared handles a session needs to do its work.
#[derive(Clone)]
pub struct SessionDeps {
    pub cfg: Rc<Config>,
    pub writer: Rc<dyn PduWriter>,
    pub northbound: Rc<dyn Northbound>,
    pub vendor: Rc<VendorRegistry>,
    /// Signalled whenever a new deadline exists, so the timer task re-plans.
    pub wake: Rc<Notify>,
    pub local_id: [u8; 10],
}

/// An ACKed PDU awaiting its ACK, with its retransmission state. The PDU
/// value never changes once installed.
#[derive(Debug)]
struct Pending {
    pdu: Pdu,
    interval: Duration,
    drops_left: u32,
    deadline: Instant,
}

pub struct Session {
    macaddr: MacAddr,
    ifname: String,
    deps: SessionDeps,
    our_open_acked: bool,
    peer_open_nonce: Option<[u8; 4]>,
    saw_last_keepalive: Option<Instant>,
    send_next_keepalive: Option<Instant>,
    rxq: HashMap<PduType, Pending>,
    deferred: HashMap<PduType, Pdu>,
    closed: bool,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<session {} {} {}>",
            if self.is_open() { "+" } else { "-" },
            self.ifname,
            self.macaddr
        )
    }
}

impl Session {
    pub fn new(macaddr: MacAddr, ifname: String, deps: SessionDeps) -> Session {
        debug!(%macaddr, %ifname, "session created");
        Session {
            macaddr,
            ifname,
            deps,
            our_open_acked: false,
            peer_open_nonce: None,
            saw_last_keepalive: None,
            send_next_keepalive: None,
            rxq: HashMap::new(),
            deferred: HashMap::new(),
            closed: false,
        }
    }

    pub fn macaddr(&self) -> MacAddr {
        self.macaddr
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// Both ends have ACKed each other's OPEN.
    pub fn is_open(&self) -> bool {
        self.our_open_acked && self.peer_open_nonce.is_some()
    }

    /// The ACKed PDU of `pdu_type` currently awaiting its ACK, if any.
    pub fn pending(&self, pdu_type: PduType) -> Option<&Pdu> {
        self.rxq.get(&pdu_type).map(|pending| &pending.pdu)
    }

    /// The PDU of `pdu_type` parked behind the pending one, if any.
    pub fn deferred(&self, pdu_type: PduType) -> Option<&Pdu> {
        self.deferred.get(&pdu_type)
    }

    /// Receives one reassembled PDU. Parse failures are logged and confined
    /// to this frame; they never tear the session down.
    pub fn recv(&mut self, bytes: &[u8]) -> Result<Disposition, crate::error::TransportError> {
        match Pdu::parse(bytes) {
            Err(err) => {
                warn!(session = %self, error = %err, "could not parse PDU");
                Ok(Disposition::Keep)
            }
            Ok(pdu) => {
                debug!(session = %self, ?pdu, "received PDU");
                self.handle_pdu(pdu)
            }
        }
    }

    fn handle_pdu(&mut self, pdu: Pdu) -> Result<Disposition, crate::error::TransportError> {
        match pdu {
            Pdu::Hello(_) => {
                self.send_open_maybe()?;
                Ok(Disposition::Keep)
            }
            Pdu::Open(open) => self.handle_open(open),
            Pdu::KeepAlive(_) => {
                if self.is_open() {
                    self.saw_keepalive();
                } else {
                    // An early keepalive is as good as a HELLO.
                    self.send_open_maybe()?;
                }
                Ok(Disposition::Keep)
            }
            Pdu::Ack(ack) => self.handle_ack(ack),
            Pdu::Vendor(vendor) => {
                if !self.is_open() {
                    info!(session = %self, %vendor, "VENDOR PDU on unopened session, dropping");
                    return Ok(Disposition::Keep);
                }
                self.send_ack(PduType::Vendor)?;
                let vendor_registry = self.deps.vendor.clone();
                vendor_registry.dispatch(self.macaddr, &vendor);
                Ok(Disposition::Keep)
            }
            encap => self.handle_encapsulation(encap),
        }
    }

    /// A changed nonce means the peer restarted: the stale session is closed
    /// and the OPEN is pushed back onto the delivery queue so the fresh
    /// session, created on the next receiver pass, handles it.
    fn handle_open(&mut self, open: OpenPdu) -> Result<Disposition, crate::error::TransportError> {
        if self.peer_open_nonce == Some(open.nonce) {
            info!(session = %self, %open, "discarding duplicate OPEN");
            return Ok(Disposition::Keep);
        }
        if self.peer_open_nonce.is_some() {
            info!(session = %self, %open, "peer restarted, reopening session");
            self.deps
                .writer
                .unread(Pdu::Open(open).marshal(), self.macaddr, &self.ifname);
            self.close();
            return Ok(Disposition::Close);
        }
        self.peer_open_nonce = Some(open.nonce);
        self.send_ack(PduType::Open)?;
        self.send_open_maybe()?;
        self.saw_keepalive();
        Ok(Disposition::Keep)
    }

    fn handle_ack(&mut self, ack: AckPdu) -> Result<Disposition, crate::error::TransportError> {
        let Some(pending) = self.rxq.remove(&ack.ack_type()) else {
            info!(session = %self, %ack, "ACK with no matching outgoing PDU");
            return Ok(Disposition::Keep);
        };
        debug!(session = %self, %ack, pdu = ?pending.pdu, "PDU acknowledged");
        if let Some((error_type, error_code)) = ack.error_report() {
            warn!(
                session = %self,
                ?error_type,
                ?error_code,
                hint = ack.error_hint(),
                "peer reported an error"
            );
        }
        let next = self.deferred.remove(&ack.ack_type());
        if ack.ack_type() == PduType::Open {
            debug_assert!(next.is_none(), "OPEN is never deferred");
            self.our_open_acked = true;
            self.saw_keepalive();
        } else if let Some(pdu) = next {
            self.send_pdu(pdu)?;
        }
        Ok(Disposition::Keep)
    }

    fn handle_encapsulation(
        &mut self,
        pdu: Pdu,
    ) -> Result<Disposition, crate::error::TransportError> {
        debug_assert!(pdu.pdu_type().is_encapsulation());
        if !self.is_open() {
            info!(session = %self, ?pdu, "encapsulation on unopened session, dropping");
            return Ok(Disposition::Keep);
        }
        self.send_ack(pdu.pdu_type())?;
        self.deps.northbound.report(self.macaddr, &pdu);
        Ok(Disposition::Keep)
    }

    fn saw_keepalive(&mut self) {
        if self.is_open() {
            self.saw_last_keepalive = Some(Instant::now());
        }
    }

    /// Sends our OPEN unless it was already ACKed or is already in flight.
    fn send_open_maybe(&mut self) -> Result<(), crate::error::TransportError> {
        if self.our_open_acked {
            debug!(session = %self, "our OPEN is already ACKed");
        } else if self.rxq.contains_key(&PduType::Open) {
            debug!(session = %self, "our OPEN is already in flight");
        } else {
            let open = OpenPdu::with_random_nonce(self.deps.local_id, Vec::new());
            self.send_pdu(Pdu::Open(open))?;
        }
        Ok(())
    }

    fn send_ack(&mut self, of: PduType) -> Result<(), crate::error::TransportError> {
        self.send_pdu(Pdu::Ack(AckPdu::ack(of)))
    }

    /// Sends an ACK carrying an error report.
    pub fn send_error(
        &mut self,
        of: PduType,
        error_type: ErrorType,
        error_code: ErrorCode,
        error_hint: u16,
    ) -> Result<(), crate::error::TransportError> {
        self.send_pdu(Pdu::Ack(AckPdu::error(of, error_type, error_code, error_hint)))
    }

    /// Sends a PDU, parking it behind an in-flight PDU of the same ACKed
    /// type, or installing retransmission state when it goes out.
    pub fn send_pdu(&mut self, pdu: Pdu) -> Result<(), crate::error::TransportError> {
        let pdu_type = pdu.pdu_type();
        if pdu_type != PduType::Open
            && pdu_type.requires_ack()
            && self.rxq.contains_key(&pdu_type)
        {
            debug!(session = %self, ?pdu, "deferring behind in-flight PDU");
            self.deferred.insert(pdu_type, pdu);
            return Ok(());
        }
        debug_assert!(!self.rxq.contains_key(&pdu_type));
        debug!(session = %self, ?pdu, "sending PDU");
        self.deps.writer.write(&pdu, self.macaddr, None)?;
        if pdu_type.requires_ack() {
            let interval = self.deps.cfg.retransmit_initial_interval();
            let pending = Pending {
                pdu,
                interval,
                drops_left: self.deps.cfg.retransmit_max_drop(),
                deadline: Instant::now() + interval,
            };
            debug!(
                session = %self,
                ?pdu_type,
                interval = ?pending.interval,
                drops_left = pending.drops_left,
                "awaiting ACK"
            );
            self.rxq.insert(pdu_type, pending);
            self.deps.wake.notify_one();
        }
        Ok(())
    }

    /// One pass over this session's timers: keepalive silence, pending
    /// retransmissions, keepalive transmission. Every live deadline is
    /// contributed to `timer`.
    pub fn check_timeouts(
        &mut self,
        timer: &mut Timer,
    ) -> Result<Disposition, crate::error::TransportError> {
        if self.is_open() {
            if let (Some(timeout), Some(last)) = (
                self.deps.cfg.keepalive_receive_timeout(),
                self.saw_last_keepalive,
            ) {
                if timer.check_expired(last + timeout) {
                    info!(session = %self, "too long since last keepalive, closing");
                    self.close();
                    return Ok(Disposition::Close);
                }
            }
        }

        let mut dead = false;
        for pending in self.rxq.values_mut() {
            if !timer.check_expired(pending.deadline) {
                continue;
            }
            pending.drops_left -= 1;
            if pending.drops_left == 0 {
                info!(session = %self.macaddr, pdu = ?pending.pdu, "too many drops, closing");
                dead = true;
                break;
            }
            if self.deps.cfg.retransmit_exponential_backoff() {
                pending.interval *= 2;
            }
            pending.deadline = timer.wake_after(pending.interval);
            debug!(
                pdu = ?pending.pdu,
                interval = ?pending.interval,
                drops_left = pending.drops_left,
                "retransmitting"
            );
            self.deps.writer.write(&pending.pdu, self.macaddr, None)?;
        }
        if dead {
            self.close();
            return Ok(Disposition::Close);
        }

        if self.is_open() {
            let due = match self.send_next_keepalive {
                None => true,
                Some(when) => timer.check_expired(when),
            };
            if due {
                self.send_next_keepalive =
                    Some(timer.wake_after(self.deps.cfg.keepalive_send_interval()));
                self.send_pdu(Pdu::KeepAlive(KeepAlivePdu))?;
            }
        }
        Ok(Disposition::Keep)
    }

    /// Tears the session down. An open session clears its peer's northbound
    /// contribution by reporting all four encapsulations empty. The caller
    /// removes the session from its table; a closed session is never reused.
    pub fn close(&mut self) {
        debug_assert!(!self.closed, "session close re-entered");
        debug!(session = %self, "closing");
        if self.is_open() {
            for pdu_type in PduType::ENCAPSULATIONS {
                self.deps
                    .northbound
                    .report(self.macaddr, &Pdu::empty_encapsulation(pdu_type));
            }
        }
        self.our_open_acked = false;
        self.peer_open_nonce = None;
        self.closed = true;
    }
}
