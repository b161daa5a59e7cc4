//! End-to-end exercises of the session state machine and the transport
//! reassembly path, with the clock under test control.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{advance, Instant};

use lsoe::config::Config;
use lsoe::error::TransportError;
use lsoe::ie::{EncapFlags, Ipv6Encapsulation};
use lsoe::message::{Ipv6EncapsulationPdu, Pdu, PduType};
use lsoe::northbound::Northbound;
use lsoe::session::{Disposition, Session, SessionDeps, Timer, VendorRegistry};
use lsoe::transport::datagram::Datagram;
use lsoe::transport::reassembly::ReassemblyBuffer;
use lsoe::transport::PduWriter;
use lsoe::types::MacAddr;

const MAC_A: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x01]);
const MAC_B: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x02]);

#[derive(Default)]
struct RecordingWriter {
    written: RefCell<Vec<Pdu>>,
    unread: RefCell<Vec<(Vec<u8>, MacAddr, String)>>,
}

impl RecordingWriter {
    fn drain(&self) -> Vec<Pdu> {
        self.written.borrow_mut().drain(..).collect()
    }

    fn count_of(&self, pdu_type: PduType) -> usize {
        self.written
            .borrow()
            .iter()
            .filter(|pdu| pdu.pdu_type() == pdu_type)
            .count()
    }
}

impl PduWriter for RecordingWriter {
    fn write(&self, pdu: &Pdu, _mac: MacAddr, _ifname: Option<&str>) -> Result<(), TransportError> {
        self.written.borrow_mut().push(pdu.clone());
        Ok(())
    }

    fn unread(&self, bytes: Vec<u8>, mac: MacAddr, ifname: &str) {
        self.unread
            .borrow_mut()
            .push((bytes, mac, ifname.to_string()));
    }
}

#[derive(Default)]
struct RecordingNorthbound {
    reports: RefCell<Vec<(MacAddr, Pdu)>>,
}

impl RecordingNorthbound {
    fn kinds(&self) -> Vec<PduType> {
        self.reports
            .borrow()
            .iter()
            .map(|(_, pdu)| pdu.pdu_type())
            .collect()
    }
}

impl Northbound for RecordingNorthbound {
    fn report(&self, peer: MacAddr, pdu: &Pdu) {
        self.reports.borrow_mut().push((peer, pdu.clone()));
    }
}

struct Node {
    session: Session,
    writer: Rc<RecordingWriter>,
    northbound: Rc<RecordingNorthbound>,
}

/// A session on the node `local`, talking to the neighbor `peer`.
fn node(local: u8, peer: MacAddr, cfg_yaml: &str) -> Node {
    let writer = Rc::new(RecordingWriter::default());
    let northbound = Rc::new(RecordingNorthbound::default());
    let deps = SessionDeps {
        cfg: Rc::new(Config::from_yaml(cfg_yaml).unwrap()),
        writer: writer.clone(),
        northbound: northbound.clone(),
        vendor: Rc::new(VendorRegistry::default()),
        wake: Rc::new(Notify::new()),
        local_id: [local; 10],
    };
    Node {
        session: Session::new(peer, "eth0".to_string(), deps),
        writer,
        northbound,
    }
}

/// Delivers one PDU into a node the way the engine's receiver does: noting
/// an Idle-to-Open transition and seeding the four (here empty)
/// encapsulations when it happens.
fn deliver(node: &mut Node, pdu: &Pdu) -> Disposition {
    let was_open = node.session.is_open();
    let disposition = node.session.recv(&pdu.marshal()).unwrap();
    if disposition == Disposition::Keep && node.session.is_open() && !was_open {
        for pdu_type in PduType::ENCAPSULATIONS {
            node.session
                .send_pdu(Pdu::empty_encapsulation(pdu_type))
                .unwrap();
        }
    }
    disposition
}

/// Shuttles queued traffic between two nodes until both go quiet.
fn pump(a: &mut Node, b: &mut Node) {
    loop {
        let from_a = a.writer.drain();
        let from_b = b.writer.drain();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for pdu in &from_a {
            deliver(b, pdu);
        }
        for pdu in &from_b {
            deliver(a, pdu);
        }
    }
}

#[test]
fn open_dance_brings_both_sides_up() {
    let mut a = node(1, MAC_B, "");
    let mut b = node(2, MAC_A, "");

    // A hears B's HELLO and starts the dance.
    let hello = Pdu::Hello(lsoe::message::HelloPdu::new(MAC_B));
    deliver(&mut a, &hello);
    assert!(a.session.pending(PduType::Open).is_some());

    pump(&mut a, &mut b);

    assert!(a.session.is_open());
    assert!(b.session.is_open());
    // Nothing left awaiting an ACK on either side.
    for pdu_type in PduType::ENCAPSULATIONS {
        assert!(a.session.pending(pdu_type).is_none());
        assert!(b.session.pending(pdu_type).is_none());
    }
    assert!(a.session.pending(PduType::Open).is_none());
    assert!(b.session.pending(PduType::Open).is_none());
    // Each side received the other's four encapsulation reports.
    assert_eq!(a.northbound.kinds(), PduType::ENCAPSULATIONS.to_vec());
    assert_eq!(b.northbound.kinds(), PduType::ENCAPSULATIONS.to_vec());
}

#[test]
fn fragmented_encapsulation_with_duplicate_frame() {
    // 200 IPv6 entries need three Ethernet frames.
    let entries: Vec<Ipv6Encapsulation> = (0..200u16)
        .map(|i| {
            Ipv6Encapsulation::new(
                format!("2001:db8::{:x}", i + 1).parse().unwrap(),
                64,
                EncapFlags::empty(),
            )
        })
        .collect();
    let pdu = Pdu::Ipv6Encapsulation(Ipv6EncapsulationPdu::new(entries));
    let frames = Datagram::split_message(&pdu.marshal());
    assert_eq!(frames.len(), 3);

    // The middle frame is dropped in transit and re-injected twice after
    // the final one.
    let now = Instant::now();
    let mut buffer = ReassemblyBuffer::default();
    assert_eq!(buffer.push(frames[0].clone(), now), None);
    assert_eq!(
        buffer.push(frames[2].clone(), now + Duration::from_millis(1)),
        None
    );
    let reassembled = buffer
        .push(frames[1].clone(), now + Duration::from_millis(2))
        .expect("third distinct frame completes the PDU");
    match Pdu::parse(&reassembled).unwrap() {
        Pdu::Ipv6Encapsulation(parsed) => assert_eq!(parsed.entries.len(), 200),
        other => panic!("expected IPv6 encapsulation, got {:?}", other),
    }
    // The duplicate starts a fresh buffer and never completes a second PDU.
    assert_eq!(
        buffer.push(frames[1].clone(), now + Duration::from_millis(3)),
        None
    );
}

#[tokio::test(start_paused = true)]
async fn keepalive_timeout_closes_and_clears() {
    let mut a = node(1, MAC_B, "keepalive-receive-timeout: 2.0\n");
    let mut b = node(2, MAC_A, "keepalive-receive-timeout: 2.0\n");
    let hello = Pdu::Hello(lsoe::message::HelloPdu::new(MAC_B));
    deliver(&mut a, &hello);
    pump(&mut a, &mut b);
    assert!(a.session.is_open());
    a.northbound.reports.borrow_mut().clear();

    // B goes silent. A's sweeps keep sending keepalives but nothing comes
    // back; within the timeout plus one tick the session must close.
    let mut closed_at = None;
    for tick in 0..=4u64 {
        let mut timer = Timer::new();
        match a.session.check_timeouts(&mut timer).unwrap() {
            Disposition::Close => {
                closed_at = Some(tick);
                break;
            }
            Disposition::Keep => {}
        }
        advance(Duration::from_secs(1)).await;
    }
    let closed_at = closed_at.expect("session should close after 2s of silence");
    assert!(closed_at <= 3, "closed only after {} ticks", closed_at);
    // Close cleared the peer's northbound contribution.
    assert_eq!(a.northbound.kinds(), PduType::ENCAPSULATIONS.to_vec());
    for (_, pdu) in a.northbound.reports.borrow().iter() {
        assert_eq!(pdu, &Pdu::empty_encapsulation(pdu.pdu_type()));
    }
}

#[tokio::test(start_paused = true)]
async fn keepalives_flow_while_peer_responds() {
    let mut a = node(1, MAC_B, "keepalive-receive-timeout: 2.0\n");
    let mut b = node(2, MAC_A, "keepalive-receive-timeout: 2.0\n");
    deliver(&mut a, &Pdu::Hello(lsoe::message::HelloPdu::new(MAC_B)));
    pump(&mut a, &mut b);

    for _ in 0..5 {
        let mut timer = Timer::new();
        assert_eq!(
            a.session.check_timeouts(&mut timer).unwrap(),
            Disposition::Keep
        );
        let mut timer = Timer::new();
        assert_eq!(
            b.session.check_timeouts(&mut timer).unwrap(),
            Disposition::Keep
        );
        pump(&mut a, &mut b);
        advance(Duration::from_secs(1)).await;
    }
    assert!(a.session.is_open());
    assert!(b.session.is_open());
}

#[tokio::test(start_paused = true)]
async fn retransmit_until_drop_limit_closes() {
    let cfg = "retransmit-initial-interval: 0.1\nretransmit-max-drop: 3\n";
    let mut a = node(1, MAC_B, cfg);
    deliver(&mut a, &Pdu::Hello(lsoe::message::HelloPdu::new(MAC_B)));
    assert_eq!(a.writer.count_of(PduType::Open), 1);

    // All ACKs from B are black-holed. First expiry: retransmit, interval
    // doubles to 0.2.
    advance(Duration::from_millis(100)).await;
    let mut timer = Timer::new();
    assert_eq!(
        a.session.check_timeouts(&mut timer).unwrap(),
        Disposition::Keep
    );
    assert_eq!(a.writer.count_of(PduType::Open), 2);

    // 0.1s later the doubled interval has not expired yet.
    advance(Duration::from_millis(100)).await;
    let mut timer = Timer::new();
    a.session.check_timeouts(&mut timer).unwrap();
    assert_eq!(a.writer.count_of(PduType::Open), 2);

    // Second expiry: retransmit, interval doubles to 0.4.
    advance(Duration::from_millis(100)).await;
    let mut timer = Timer::new();
    a.session.check_timeouts(&mut timer).unwrap();
    assert_eq!(a.writer.count_of(PduType::Open), 3);

    // Third expiry exhausts the drop budget: the session dies.
    advance(Duration::from_millis(400)).await;
    let mut timer = Timer::new();
    assert_eq!(
        a.session.check_timeouts(&mut timer).unwrap(),
        Disposition::Close
    );
    // No further transmissions of the dead PDU.
    assert_eq!(a.writer.count_of(PduType::Open), 3);
    // The session never opened, so nothing is cleared northbound.
    assert!(a.northbound.reports.borrow().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retransmit_without_backoff_is_periodic() {
    let cfg = "retransmit-initial-interval: 0.1\nretransmit-exponential-backoff: false\nretransmit-max-drop: 10\n";
    let mut a = node(1, MAC_B, cfg);
    deliver(&mut a, &Pdu::Hello(lsoe::message::HelloPdu::new(MAC_B)));

    for expected in 2..=5usize {
        advance(Duration::from_millis(100)).await;
        let mut timer = Timer::new();
        assert_eq!(
            a.session.check_timeouts(&mut timer).unwrap(),
            Disposition::Keep
        );
        assert_eq!(a.writer.count_of(PduType::Open), expected);
    }
}

#[test]
fn peer_restart_reopens_session() {
    let mut a = node(1, MAC_B, "");
    let mut b = node(2, MAC_A, "");
    deliver(&mut a, &Pdu::Hello(lsoe::message::HelloPdu::new(MAC_B)));
    pump(&mut a, &mut b);
    assert!(a.session.is_open());
    a.northbound.reports.borrow_mut().clear();

    // B restarts with a fresh nonce.
    let mut b2 = node(3, MAC_A, "");
    deliver(&mut b2, &Pdu::Hello(lsoe::message::HelloPdu::new(MAC_A)));
    let fresh_open = b2.writer.drain().remove(0);
    assert!(matches!(fresh_open, Pdu::Open(_)));

    // A unreads the unexpected OPEN and closes the stale session.
    assert_eq!(deliver(&mut a, &fresh_open), Disposition::Close);
    assert_eq!(a.northbound.kinds(), PduType::ENCAPSULATIONS.to_vec());
    let (unread_bytes, unread_mac, _) = a.writer.unread.borrow_mut().remove(0);
    assert_eq!(unread_mac, MAC_B);
    assert_eq!(unread_bytes, fresh_open.marshal());

    // The engine re-creates the session and reprocesses the queued OPEN;
    // a fresh dance completes.
    let mut a2 = node(1, MAC_B, "");
    deliver(&mut a2, &Pdu::parse(&unread_bytes).unwrap());
    pump(&mut a2, &mut b2);
    assert!(a2.session.is_open());
    assert!(b2.session.is_open());
}
