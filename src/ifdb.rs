//! Interface database: a live mirror of the kernel's links and addresses,
//! and the source of the encapsulation PDUs we advertise.
//!
//! The rtnetlink monitor subscribes to link and address notifications
//! *before* taking the initial snapshot; a duplicated event is harmless, a
//! missed one is not. Every notification batch is folded into the database
//! and, per address family touched, one full-state encapsulation PDU is
//! pushed onto the update queue for distribution to open sessions.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

use anyhow::{bail, Context};
use bitflags::bitflags;
use futures::stream::{StreamExt, TryStreamExt};
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use rtnetlink::constants::{RTMGRP_IPV4_IFADDR, RTMGRP_IPV6_IFADDR, RTMGRP_LINK};
use rtnetlink::sys::{AsyncSocket, SocketAddr};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::ie::{EncapFlags, Ipv4Encapsulation, Ipv6Encapsulation};
use crate::message::{
    Ipv4EncapsulationPdu, Ipv6EncapsulationPdu, MplsIpv4EncapsulationPdu,
    MplsIpv6EncapsulationPdu, Pdu,
};
use crate::types::MacAddr;

bitflags! {
    /// Kernel interface flags we track, with their linux/if.h values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IfFlags: u32 {
        const UP = 0x1;
        const LOOPBACK = 0x8;
    }
}

/// One kernel network interface.
#[derive(Debug, Clone)]
pub struct Interface {
    pub index: u32,
    pub name: String,
    pub macaddr: MacAddr,
    flags: IfFlags,
    ipv4: Vec<(Ipv4Addr, u8)>,
    ipv6: Vec<(Ipv6Addr, u8)>,
}

impl Interface {
    fn new(index: u32, name: String, macaddr: MacAddr, flags: IfFlags) -> Self {
        debug!(%name, index, %macaddr, ?flags, "tracking interface");
        Interface {
            index,
            name,
            macaddr,
            flags,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.flags.contains(IfFlags::UP)
    }

    pub fn is_loopback(&self) -> bool {
        self.flags.contains(IfFlags::LOOPBACK)
    }

    fn add_ipaddr(&mut self, addr: IpAddr, prefix_len: u8) {
        debug!(name = %self.name, %addr, prefix_len, "address added");
        match addr {
            IpAddr::V4(v4) => self.ipv4.push((v4, prefix_len)),
            IpAddr::V6(v6) => self.ipv6.push((v6, prefix_len)),
        }
    }

    fn del_ipaddr(&mut self, addr: IpAddr, prefix_len: u8) {
        debug!(name = %self.name, %addr, prefix_len, "address deleted");
        match addr {
            IpAddr::V4(v4) => self.ipv4.retain(|entry| *entry != (v4, prefix_len)),
            IpAddr::V6(v6) => self.ipv6.retain(|entry| *entry != (v6, prefix_len)),
        }
    }
}

/// Which address families a change touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangedFamilies {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl ChangedFamilies {
    fn both() -> Self {
        ChangedFamilies {
            ipv4: true,
            ipv6: true,
        }
    }

    pub fn merge(&mut self, other: ChangedFamilies) {
        self.ipv4 |= other.ipv4;
        self.ipv6 |= other.ipv6;
    }
}

/// A digested kernel notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Link appeared or its flags changed. Name and MAC are only present
    /// when the kernel included them.
    LinkChanged {
        index: u32,
        name: Option<String>,
        macaddr: Option<MacAddr>,
        flags: IfFlags,
    },
    AddrAdded {
        index: u32,
        addr: IpAddr,
        prefix_len: u8,
    },
    AddrDeleted {
        index: u32,
        addr: IpAddr,
        prefix_len: u8,
    },
}

#[derive(Debug, Default)]
pub struct InterfaceDb {
    interfaces: BTreeMap<u32, Interface>,
}

impl InterfaceDb {
    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    /// Folds one event in, reporting which families need re-advertising.
    /// Flag changes touch both families: the loopback bit every entry
    /// carries is derived from them.
    pub fn apply(&mut self, event: LinkEvent) -> ChangedFamilies {
        match event {
            LinkEvent::LinkChanged {
                index,
                name,
                macaddr,
                flags,
            } => {
                if let Some(iface) = self.interfaces.get_mut(&index) {
                    debug!(name = %iface.name, ?flags, "link flags changed");
                    iface.flags = flags;
                    return ChangedFamilies::both();
                }
                match (name, macaddr) {
                    (Some(name), Some(macaddr)) => {
                        self.interfaces
                            .insert(index, Interface::new(index, name, macaddr, flags));
                        ChangedFamilies::both()
                    }
                    _ => {
                        // Links without a 6-octet hardware address (tun and
                        // friends) are not ours to speak on.
                        debug!(index, "ignoring link without name or MAC address");
                        ChangedFamilies::default()
                    }
                }
            }
            LinkEvent::AddrAdded {
                index,
                addr,
                prefix_len,
            } => match self.interfaces.get_mut(&index) {
                Some(iface) => {
                    iface.add_ipaddr(addr, prefix_len);
                    changed_for(addr)
                }
                None => {
                    debug!(index, %addr, "address event for untracked link");
                    ChangedFamilies::default()
                }
            },
            LinkEvent::AddrDeleted {
                index,
                addr,
                prefix_len,
            } => match self.interfaces.get_mut(&index) {
                Some(iface) => {
                    iface.del_ipaddr(addr, prefix_len);
                    changed_for(addr)
                }
                None => {
                    debug!(index, %addr, "address event for untracked link");
                    ChangedFamilies::default()
                }
            },
        }
    }

    /// The current advertisement set: (IPv4, IPv6, MPLS-IPv4, MPLS-IPv6).
    /// MPLS label sets are not built yet, so those two are always empty.
    pub fn encapsulations(&self) -> [Pdu; 4] {
        [
            self.ipv4_encapsulation(),
            self.ipv6_encapsulation(),
            Pdu::MplsIpv4Encapsulation(MplsIpv4EncapsulationPdu::empty()),
            Pdu::MplsIpv6Encapsulation(MplsIpv6EncapsulationPdu::empty()),
        ]
    }

    pub fn ipv4_encapsulation(&self) -> Pdu {
        let mut entries = Vec::new();
        for iface in self.interfaces.values() {
            // Primary-address selection is reserved for configuration.
            let flags = entry_flags(false, iface.is_loopback());
            for (addr, prefix_len) in &iface.ipv4 {
                entries.push(Ipv4Encapsulation::new(*addr, *prefix_len, flags));
            }
        }
        Pdu::Ipv4Encapsulation(Ipv4EncapsulationPdu::new(entries))
    }

    pub fn ipv6_encapsulation(&self) -> Pdu {
        let mut entries = Vec::new();
        for iface in self.interfaces.values() {
            let flags = entry_flags(false, iface.is_loopback());
            for (addr, prefix_len) in &iface.ipv6 {
                entries.push(Ipv6Encapsulation::new(*addr, *prefix_len, flags));
            }
        }
        Pdu::Ipv6Encapsulation(Ipv6EncapsulationPdu::new(entries))
    }
}

fn entry_flags(primary: bool, loopback: bool) -> EncapFlags {
    let mut flags = EncapFlags::empty();
    flags.set(EncapFlags::PRIMARY, primary);
    flags.set(EncapFlags::LOOPBACK, loopback);
    flags
}

fn changed_for(addr: IpAddr) -> ChangedFamilies {
    ChangedFamilies {
        ipv4: addr.is_ipv4(),
        ipv6: addr.is_ipv6(),
    }
}

/// The rtnetlink event side: holds the subscribed notification stream.
pub struct InterfaceMonitor {
    events: futures::channel::mpsc::UnboundedReceiver<(
        NetlinkMessage<RouteNetlinkMessage>,
        SocketAddr,
    )>,
}

impl InterfaceMonitor {
    /// Connects to rtnetlink, subscribes to change notifications, then takes
    /// the initial link and address snapshot.
    ///
    /// Must run inside a `LocalSet`; the netlink connection is spawned onto
    /// it.
    pub async fn init() -> anyhow::Result<(InterfaceDb, InterfaceMonitor)> {
        let (mut conn, handle, events) =
            rtnetlink::new_connection().context("open rtnetlink socket")?;
        let groups = RTMGRP_LINK | RTMGRP_IPV4_IFADDR | RTMGRP_IPV6_IFADDR;
        conn.socket_mut()
            .socket_mut()
            .bind(&SocketAddr::new(0, groups))
            .context("bind rtnetlink multicast groups")?;
        tokio::task::spawn_local(conn);

        let mut db = InterfaceDb::default();
        let mut links = handle.link().get().execute();
        while let Some(msg) = links.try_next().await.context("dump links")? {
            db.apply(link_event(&msg));
        }
        let mut addrs = handle.address().get().execute();
        while let Some(msg) = addrs.try_next().await.context("dump addresses")? {
            if let Some(event) = addr_event(&msg, true) {
                db.apply(event);
            }
        }
        Ok((db, InterfaceMonitor { events }))
    }

    /// Applies change notifications to the database forever, pushing one
    /// full-state encapsulation PDU per touched family onto `updates`.
    pub async fn run(
        mut self,
        db: Rc<RefCell<InterfaceDb>>,
        updates: mpsc::UnboundedSender<Pdu>,
    ) -> anyhow::Result<()> {
        loop {
            let Some((message, _addr)) = self.events.next().await else {
                bail!("rtnetlink event stream closed");
            };
            let mut changed = ChangedFamilies::default();
            {
                let mut db = db.borrow_mut();
                changed.merge(apply_notification(&mut db, message));
                // Fold in whatever else the kernel already queued.
                while let Ok(Some((message, _addr))) = self.events.try_next() {
                    changed.merge(apply_notification(&mut db, message));
                }
            }
            let db = db.borrow();
            if changed.ipv4 {
                let _ = updates.send(db.ipv4_encapsulation());
            }
            if changed.ipv6 {
                let _ = updates.send(db.ipv6_encapsulation());
            }
        }
    }
}

fn apply_notification(
    db: &mut InterfaceDb,
    message: NetlinkMessage<RouteNetlinkMessage>,
) -> ChangedFamilies {
    let NetlinkPayload::InnerMessage(message) = message.payload else {
        return ChangedFamilies::default();
    };
    match message {
        RouteNetlinkMessage::NewLink(msg) | RouteNetlinkMessage::DelLink(msg) => {
            // A deleted link reports its final flags; the interface stays in
            // the database with those flags marking it unusable.
            db.apply(link_event(&msg))
        }
        RouteNetlinkMessage::NewAddress(msg) => match addr_event(&msg, true) {
            Some(event) => db.apply(event),
            None => ChangedFamilies::default(),
        },
        RouteNetlinkMessage::DelAddress(msg) => match addr_event(&msg, false) {
            Some(event) => db.apply(event),
            None => ChangedFamilies::default(),
        },
        other => {
            trace!(?other, "ignoring rtnetlink message");
            ChangedFamilies::default()
        }
    }
}

fn link_event(msg: &LinkMessage) -> LinkEvent {
    let mut name = None;
    let mut macaddr = None;
    for attr in &msg.attributes {
        match attr {
            LinkAttribute::IfName(ifname) => name = Some(ifname.clone()),
            LinkAttribute::Address(octets) => {
                macaddr = MacAddr::from_slice(octets).ok();
            }
            _ => {}
        }
    }
    let mut flags = IfFlags::empty();
    flags.set(IfFlags::UP, msg.header.flags.contains(LinkFlags::Up));
    flags.set(
        IfFlags::LOOPBACK,
        msg.header.flags.contains(LinkFlags::Loopback),
    );
    LinkEvent::LinkChanged {
        index: msg.header.index,
        name,
        macaddr,
        flags,
    }
}

fn addr_event(msg: &AddressMessage, added: bool) -> Option<LinkEvent> {
    if !matches!(msg.header.family, AddressFamily::Inet | AddressFamily::Inet6) {
        return None;
    }
    let addr = msg.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Address(addr) => Some(*addr),
        _ => None,
    })?;
    let index = msg.header.index;
    let prefix_len = msg.header.prefix_len;
    Some(if added {
        LinkEvent::AddrAdded {
            index,
            addr,
            prefix_len,
        }
    } else {
        LinkEvent::AddrDeleted {
            index,
            addr,
            prefix_len,
        }
    })
}
