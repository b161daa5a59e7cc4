//! Ethernet transport: fragmentation, reassembly, checksum verification and
//! peer tracking over a raw packet socket.
//!
//! The upper layer sees three operations: an inbound queue of reassembled
//! PDUs, a synchronous non-blocking [`PduWriter::write`], and
//! [`PduWriter::unread`] to push a PDU back for reprocessing.

pub mod datagram;
pub mod reassembly;
pub mod socket;

pub use datagram::{Datagram, DATAGRAM_HEADER_LEN, LAST_FLAG, MAX_PAYLOAD};

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::TransportError;
use crate::message::Pdu;
use crate::transport::reassembly::{MacCache, ReassemblyBuffer};
use crate::transport::socket::{FrameSource, PacketSocket};
use crate::types::{MacAddr, ETH_DATA_LEN};

/// One reassembled PDU handed to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPdu {
    pub bytes: Vec<u8>,
    pub mac: MacAddr,
    pub ifname: String,
}

/// The seam between sessions and the wire. Implemented by [`EtherIo`]; test
/// harnesses substitute a recorder.
pub trait PduWriter {
    /// Serializes, fragments and sends a PDU. With no interface named, the
    /// peer's last-seen interface from the MAC cache is used.
    fn write(&self, pdu: &Pdu, mac: MacAddr, ifname: Option<&str>)
        -> Result<(), TransportError>;

    /// Re-queues an already reassembled PDU for delivery, behind anything
    /// already queued.
    fn unread(&self, bytes: Vec<u8>, mac: MacAddr, ifname: &str);
}

/// Everything the receive path mutates: reassembly buffers, MAC cache, and
/// the delivery queue. Kept apart from the socket so it can be exercised
/// frame by frame.
struct FrameIntake {
    reassembly: HashMap<MacAddr, ReassemblyBuffer>,
    mac_cache: MacCache,
    tx: mpsc::UnboundedSender<InboundPdu>,
}

impl FrameIntake {
    fn new(tx: mpsc::UnboundedSender<InboundPdu>) -> Self {
        FrameIntake {
            reassembly: HashMap::new(),
            mac_cache: MacCache::default(),
            tx,
        }
    }

    fn accept_frame(&mut self, frame: &[u8], mac: MacAddr, ifname: &str, now: Instant) {
        trace!(%mac, %ifname, len = frame.len(), "received frame");
        if frame.len() < DATAGRAM_HEADER_LEN {
            debug!(%mac, "frame shorter than datagram header, dropping");
            return;
        }
        if !self.mac_cache.observe(mac, ifname, now) {
            return;
        }
        let Some(dgram) = Datagram::incoming(frame) else {
            return;
        };
        if !dgram.verify() {
            return;
        }
        let buffer = self.reassembly.entry(mac).or_default();
        if let Some(bytes) = buffer.push(dgram, now) {
            self.reassembly.remove(&mac);
            let _ = self.tx.send(InboundPdu {
                bytes,
                mac,
                ifname: ifname.to_string(),
            });
        }
    }

    fn gc(&mut self, now: Instant, reassembly_timeout: Duration, mac_timeout: Duration) {
        trace!("transport GC");
        if let Some(threshold) = now.checked_sub(reassembly_timeout) {
            self.reassembly.retain(|_, buffer| !buffer.expire(threshold));
        }
        if let Some(threshold) = now.checked_sub(mac_timeout) {
            self.mac_cache.expire(threshold);
        }
    }
}

/// The LSOE transport engine over one packet socket.
pub struct EtherIo {
    afd: AsyncFd<PacketSocket>,
    intake: RefCell<FrameIntake>,
    tx: mpsc::UnboundedSender<InboundPdu>,
    reassembly_timeout: Duration,
    mac_cache_timeout: Duration,
}

impl EtherIo {
    /// Opens the packet socket and returns the transport together with the
    /// receiving end of the PDU delivery queue.
    pub fn new(
        cfg: &Config,
    ) -> Result<(Rc<EtherIo>, mpsc::UnboundedReceiver<InboundPdu>), TransportError> {
        let socket = PacketSocket::open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let io = EtherIo {
            afd: AsyncFd::new(socket)?,
            intake: RefCell::new(FrameIntake::new(tx.clone())),
            tx,
            reassembly_timeout: cfg.reassembly_timeout(),
            mac_cache_timeout: cfg.mac_address_cache_timeout(),
        };
        Ok((Rc::new(io), rx))
    }

    /// Drives frame reception and the GC sweep; only returns on a fatal
    /// socket error.
    pub async fn run(&self) -> Result<(), TransportError> {
        let gc_period = (self.reassembly_timeout / 2).max(Duration::from_millis(10));
        let mut gc = interval(gc_period);
        let mut buf = vec![0u8; ETH_DATA_LEN];
        loop {
            tokio::select! {
                ready = self.afd.readable() => {
                    let mut guard = ready?;
                    match guard.try_io(|afd| afd.get_ref().recv_from(&mut buf)) {
                        Ok(Ok((n, src))) => self.handle_frame(&buf[..n], &src),
                        Ok(Err(e)) => return Err(e.into()),
                        Err(_would_block) => continue,
                    }
                }
                _ = gc.tick() => {
                    self.intake.borrow_mut().gc(
                        Instant::now(),
                        self.reassembly_timeout,
                        self.mac_cache_timeout,
                    );
                }
            }
        }
    }

    fn handle_frame(&self, frame: &[u8], src: &FrameSource) {
        if src.outgoing {
            trace!("dropping looped-back copy of our own frame");
            return;
        }
        let Some(ifname) = socket::ifindex_to_name(src.ifindex) else {
            warn!(ifindex = src.ifindex, "frame from unresolvable interface index");
            return;
        };
        self.intake
            .borrow_mut()
            .accept_frame(frame, src.mac, &ifname, Instant::now());
    }

    /// A send failure that only concerns this frame, not the socket.
    fn is_transient(err: &io::Error) -> bool {
        matches!(err.kind(), io::ErrorKind::WouldBlock)
            || matches!(
                err.raw_os_error(),
                Some(libc::ENETDOWN) | Some(libc::ENODEV) | Some(libc::ENOBUFS)
            )
    }
}

impl PduWriter for EtherIo {
    fn write(
        &self,
        pdu: &Pdu,
        mac: MacAddr,
        ifname: Option<&str>,
    ) -> Result<(), TransportError> {
        let ifname = match ifname {
            Some(name) => name.to_string(),
            None => self
                .intake
                .borrow()
                .mac_cache
                .lookup(mac)
                .ok_or(TransportError::UnknownPeer(mac))?
                .to_string(),
        };
        let ifindex = socket::ifname_to_index(&ifname).ok_or_else(|| {
            TransportError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("interface {} has no index", ifname),
            ))
        })?;
        let bytes = pdu.marshal();
        for dgram in Datagram::split_message(&bytes) {
            match self.afd.get_ref().send_to(&dgram.marshal(), mac, ifindex) {
                Ok(_) => {}
                Err(e) if EtherIo::is_transient(&e) => {
                    warn!(%mac, %ifname, error = %e, "dropping outbound frame");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn unread(&self, bytes: Vec<u8>, mac: MacAddr, ifname: &str) {
        let _ = self.tx.send(InboundPdu {
            bytes,
            mac,
            ifname: ifname.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HelloPdu, KeepAlivePdu};

    fn intake() -> (FrameIntake, mpsc::UnboundedReceiver<InboundPdu>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FrameIntake::new(tx), rx)
    }

    fn peer() -> MacAddr {
        MacAddr::new([2, 0, 0, 0, 0, 1])
    }

    #[test]
    fn test_intake_delivers_single_frame_pdu() {
        let (mut intake, mut rx) = intake();
        let pdu = Pdu::KeepAlive(KeepAlivePdu).marshal();
        let frame = Datagram::split_message(&pdu).remove(0).marshal();
        intake.accept_frame(&frame, peer(), "eth0", Instant::now());
        let inbound = rx.try_recv().unwrap();
        assert_eq!(inbound.bytes, pdu);
        assert_eq!(inbound.mac, peer());
        assert_eq!(inbound.ifname, "eth0");
    }

    #[test]
    fn test_intake_reassembles_fragments() {
        let (mut intake, mut rx) = intake();
        // A large synthetic PDU so split produces several frames.
        let big = vec![0x5A; 4000];
        for dgram in Datagram::split_message(&big) {
            intake.accept_frame(&dgram.marshal(), peer(), "eth0", Instant::now());
        }
        assert_eq!(rx.try_recv().unwrap().bytes, big);
    }

    #[test]
    fn test_intake_unreads_behind_queued_pdus() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut intake = FrameIntake::new(tx.clone());
        let first = Pdu::Hello(HelloPdu::new(peer())).marshal();
        let frame = Datagram::split_message(&first).remove(0).marshal();
        intake.accept_frame(&frame, peer(), "eth0", Instant::now());
        let second = Pdu::KeepAlive(KeepAlivePdu).marshal();
        let _ = tx.send(InboundPdu {
            bytes: second.clone(),
            mac: peer(),
            ifname: "eth0".into(),
        });
        assert_eq!(rx.try_recv().unwrap().bytes, first);
        assert_eq!(rx.try_recv().unwrap().bytes, second);
    }

    #[test]
    fn test_intake_drops_corrupt_frame() {
        let (mut intake, mut rx) = intake();
        let pdu = Pdu::KeepAlive(KeepAlivePdu).marshal();
        let mut frame = Datagram::split_message(&pdu).remove(0).marshal();
        let at = frame.len() - 1;
        frame[at] ^= 0xFF;
        intake.accept_frame(&frame, peer(), "eth0", Instant::now());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_intake_drops_frame_from_moved_mac() {
        let (mut intake, mut rx) = intake();
        let pdu = Pdu::KeepAlive(KeepAlivePdu).marshal();
        let frame = Datagram::split_message(&pdu).remove(0).marshal();
        intake.accept_frame(&frame, peer(), "eth0", Instant::now());
        rx.try_recv().unwrap();
        intake.accept_frame(&frame, peer(), "eth1", Instant::now());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_intake_gc_expires_partial_pdus() {
        let (mut intake, mut rx) = intake();
        let big = vec![0x5A; 4000];
        let dgrams = Datagram::split_message(&big);
        let start = Instant::now();
        intake.accept_frame(&dgrams[0].marshal(), peer(), "eth0", start);
        intake.gc(
            start + Duration::from_secs(2),
            Duration::from_secs(1),
            Duration::from_secs(300),
        );
        assert!(intake.reassembly.is_empty());
        // The rest of the PDU arrives too late to complete anything.
        for dgram in &dgrams[1..] {
            intake.accept_frame(
                &dgram.marshal(),
                peer(),
                "eth0",
                start + Duration::from_secs(3),
            );
        }
        assert!(rx.try_recv().is_err());
    }
}
