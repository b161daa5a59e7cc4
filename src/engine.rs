//! The event loop: one cooperative scheduler driving packet reception, the
//! HELLO beacon, the per-session timer sweep, and interface-change
//! distribution, all sharing the session table and the transport.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Context;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::ifdb::{InterfaceDb, InterfaceMonitor};
use crate::message::{HelloPdu, Pdu};
use crate::northbound::Northbound;
use crate::session::{Disposition, Session, SessionDeps, Timer, VendorRegistry};
use crate::transport::{EtherIo, InboundPdu, PduWriter};
use crate::types::MacAddr;

type SessionTable = Rc<RefCell<HashMap<MacAddr, Session>>>;

pub struct Engine {
    cfg: Rc<Config>,
    io: Rc<EtherIo>,
    inbound: mpsc::UnboundedReceiver<InboundPdu>,
    db: Rc<RefCell<InterfaceDb>>,
    monitor: InterfaceMonitor,
    sessions: SessionTable,
    deps: SessionDeps,
    hexdump: bool,
}

impl Engine {
    /// Opens the packet socket, subscribes to interface changes and takes
    /// the initial snapshot. Must run inside a `LocalSet`.
    pub async fn new(
        cfg: Config,
        northbound: Rc<dyn Northbound>,
        vendor: VendorRegistry,
        hexdump: bool,
    ) -> anyhow::Result<Engine> {
        let local_id = cfg.local_id().context("determine local-id")?;
        let cfg = Rc::new(cfg);
        let (io, inbound) = EtherIo::new(&cfg).context("open LSOE packet socket")?;
        let (db, monitor) = InterfaceMonitor::init()
            .await
            .context("initialize interface database")?;
        let deps = SessionDeps {
            cfg: cfg.clone(),
            writer: io.clone(),
            northbound,
            vendor: Rc::new(vendor),
            wake: Rc::new(Notify::new()),
            local_id,
        };
        Ok(Engine {
            cfg,
            io,
            inbound,
            db: Rc::new(RefCell::new(db)),
            monitor,
            sessions: Rc::new(RefCell::new(HashMap::new())),
            deps,
            hexdump,
        })
    }

    /// Runs until any task hits a fatal error.
    pub async fn run(self) -> anyhow::Result<()> {
        let Engine {
            cfg,
            io,
            mut inbound,
            db,
            monitor,
            sessions,
            deps,
            hexdump,
        } = self;
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        info!("LSOE engine running");
        tokio::try_join!(
            receiver(&mut inbound, &sessions, &db, &deps, hexdump),
            hello_beacon(&cfg, &io, &db),
            session_timers(&sessions, &deps),
            interface_tracker(updates_rx, &sessions),
            monitor.run(db.clone(), updates_tx),
            async { io.run().await.context("packet socket failed") },
        )?;
        Ok(())
    }
}

/// Delivers reassembled PDUs into sessions, creating them on first contact
/// and seeding freshly opened ones with the current encapsulation set.
async fn receiver(
    inbound: &mut mpsc::UnboundedReceiver<InboundPdu>,
    sessions: &SessionTable,
    db: &Rc<RefCell<InterfaceDb>>,
    deps: &SessionDeps,
    hexdump: bool,
) -> anyhow::Result<()> {
    loop {
        let Some(InboundPdu { bytes, mac, ifname }) = inbound.recv().await else {
            anyhow::bail!("transport delivery queue closed");
        };
        if hexdump {
            log_raw_pdu(&bytes, mac, &ifname);
        }
        let mut table = sessions.borrow_mut();
        let (disposition, was_open, now_open) = {
            let session = table.entry(mac).or_insert_with(|| {
                debug!(%mac, %ifname, "new session");
                Session::new(mac, ifname.clone(), deps.clone())
            });
            let was_open = session.is_open();
            let disposition = session.recv(&bytes)?;
            (disposition, was_open, session.is_open())
        };
        if disposition == Disposition::Close {
            table.remove(&mac);
            continue;
        }
        if now_open && !was_open {
            debug!(%mac, "session opened, sending current encapsulations");
            let encapsulations = db.borrow().encapsulations();
            let session = table.get_mut(&mac).expect("session was just touched");
            for pdu in encapsulations {
                session.send_pdu(pdu)?;
            }
        }
    }
}

/// Multicasts a HELLO on every usable interface, forever.
async fn hello_beacon(
    cfg: &Config,
    io: &Rc<EtherIo>,
    db: &Rc<RefCell<InterfaceDb>>,
) -> anyhow::Result<()> {
    loop {
        {
            let db = db.borrow();
            for iface in db.interfaces() {
                if iface.is_loopback() || !iface.is_up() {
                    trace!(ifname = %iface.name, "skipping HELLO");
                    continue;
                }
                let pdu = Pdu::Hello(HelloPdu::new(iface.macaddr));
                debug!(ifname = %iface.name, "multicasting HELLO");
                io.write(&pdu, MacAddr::BROADCAST, Some(&iface.name))?;
            }
        }
        tokio::time::sleep(cfg.hello_interval()).await;
    }
}

/// Sweeps every session's timers, then sleeps until the earliest deadline or
/// an explicit wake. Sessions closed by the sweep are dropped afterwards,
/// never mid-iteration.
async fn session_timers(sessions: &SessionTable, deps: &SessionDeps) -> anyhow::Result<()> {
    loop {
        let mut timer = Timer::new();
        {
            let mut table = sessions.borrow_mut();
            let mut closed = Vec::new();
            for (mac, session) in table.iter_mut() {
                if session.check_timeouts(&mut timer)? == Disposition::Close {
                    closed.push(*mac);
                }
            }
            for mac in &closed {
                table.remove(mac);
            }
        }
        match timer.deadline() {
            Some(deadline) => tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = deps.wake.notified() => {}
            },
            None => deps.wake.notified().await,
        }
    }
}

/// Fans each interface-change encapsulation PDU out to every open session.
async fn interface_tracker(
    mut updates: mpsc::UnboundedReceiver<Pdu>,
    sessions: &SessionTable,
) -> anyhow::Result<()> {
    loop {
        let Some(pdu) = updates.recv().await else {
            anyhow::bail!("interface update queue closed");
        };
        let mut table = sessions.borrow_mut();
        for session in table.values_mut() {
            if session.is_open() {
                session.send_pdu(pdu.clone())?;
            }
        }
    }
}

/// More than you ever wanted to know about the bytes off the wire.
fn log_raw_pdu(bytes: &[u8], mac: MacAddr, ifname: &str) {
    debug!(%mac, %ifname, len = bytes.len(), "raw PDU follows");
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let line = chunk
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ");
        debug!("[{:3}] {}", i, line);
    }
}
