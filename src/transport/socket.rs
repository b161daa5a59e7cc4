//! Non-blocking `AF_PACKET` datagram socket bound to the LSOE EtherType.
//!
//! `SOCK_DGRAM` packet sockets let the kernel build and strip the Ethernet
//! header; we only ever see LSOE datagrams. The peer's MAC address, the
//! receiving interface and the kernel's packet-type classification arrive in
//! the `sockaddr_ll` filled in by `recvfrom`.

use std::ffi::{CStr, CString};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::types::{MacAddr, ETH_P_LSOE};

// From linux/if_packet.h: the kernel's copy of a frame we sent ourselves.
const PACKET_OUTGOING: u8 = 4;

/// Link-layer metadata of one received frame.
#[derive(Debug, Clone)]
pub struct FrameSource {
    pub mac: MacAddr,
    pub ifindex: u32,
    /// The frame is a looped-back copy of our own transmission.
    pub outgoing: bool,
}

#[derive(Debug)]
pub struct PacketSocket {
    inner: Socket,
}

impl PacketSocket {
    /// Opens the socket. Requires `CAP_NET_RAW`.
    pub fn open() -> io::Result<PacketSocket> {
        let socket = Socket::new(
            Domain::PACKET,
            Type::DGRAM,
            Some(Protocol::from(ETH_P_LSOE.to_be() as i32)),
        )?;
        socket.set_nonblocking(true)?;
        Ok(PacketSocket { inner: socket })
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, FrameSource)> {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        let n = unsafe {
            libc::recvfrom(
                self.inner.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
                (&mut addr as *mut libc::sockaddr_ll).cast(),
                &mut addr_len,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&addr.sll_addr[..6]);
        Ok((
            n as usize,
            FrameSource {
                mac: MacAddr::new(mac),
                ifindex: addr.sll_ifindex as u32,
                outgoing: addr.sll_pkttype == PACKET_OUTGOING,
            },
        ))
    }

    pub fn send_to(&self, frame: &[u8], mac: MacAddr, ifindex: u32) -> io::Result<usize> {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::sa_family_t;
        addr.sll_protocol = ETH_P_LSOE.to_be();
        addr.sll_ifindex = ifindex as libc::c_int;
        addr.sll_halen = 6;
        addr.sll_addr[..6].copy_from_slice(mac.octets());
        let n = unsafe {
            libc::sendto(
                self.inner.as_raw_fd(),
                frame.as_ptr().cast(),
                frame.len(),
                0,
                (&addr as *const libc::sockaddr_ll).cast(),
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl AsRawFd for PacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// Resolves a kernel interface index to its name.
pub fn ifindex_to_name(ifindex: u32) -> Option<String> {
    let mut buf = [0u8; libc::IFNAMSIZ];
    let ret = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr().cast()) };
    if ret.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(buf.as_ptr().cast()) };
    name.to_str().ok().map(str::to_string)
}

/// Resolves an interface name to its kernel index.
pub fn ifname_to_index(name: &str) -> Option<u32> {
    let cname = CString::new(name).ok()?;
    let ifindex = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if ifindex == 0 {
        None
    } else {
        Some(ifindex)
    }
}
