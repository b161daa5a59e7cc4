//! Plain IP encapsulation entries.
//!
//! Wire layout is `{flags:u8, addr, prefixlen:u8}` with a 4-octet address for
//! IPv4 and a 16-octet address for IPv6.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::PduError;
use crate::ie::EncapFlags;

/// One IPv4 address present on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Encapsulation {
    pub flags: EncapFlags,
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Encapsulation {
    /// Encoded size on the wire.
    pub const WIRE_LEN: usize = 6;

    pub fn new(addr: Ipv4Addr, prefix_len: u8, flags: EncapFlags) -> Self {
        Ipv4Encapsulation {
            flags,
            addr,
            prefix_len,
        }
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.flags.octet());
        buf.extend_from_slice(&self.addr.octets());
        buf.push(self.prefix_len);
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, PduError> {
        if data.len() < Self::WIRE_LEN {
            return Err(PduError::Truncated {
                expected: Self::WIRE_LEN,
                actual: data.len(),
            });
        }
        let octets: [u8; 4] = data[1..5].try_into().unwrap();
        Ok(Ipv4Encapsulation {
            flags: EncapFlags::from_octet(data[0]),
            addr: Ipv4Addr::from(octets),
            prefix_len: data[5],
        })
    }
}

impl fmt::Display for Ipv4Encapsulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}/{}",
            if self.flags.is_primary() { "<P> " } else { "" },
            if self.flags.is_loopback() { "<L> " } else { "" },
            self.addr,
            self.prefix_len
        )
    }
}

/// One IPv6 address present on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Encapsulation {
    pub flags: EncapFlags,
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
}

impl Ipv6Encapsulation {
    /// Encoded size on the wire.
    pub const WIRE_LEN: usize = 18;

    pub fn new(addr: Ipv6Addr, prefix_len: u8, flags: EncapFlags) -> Self {
        Ipv6Encapsulation {
            flags,
            addr,
            prefix_len,
        }
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.flags.octet());
        buf.extend_from_slice(&self.addr.octets());
        buf.push(self.prefix_len);
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, PduError> {
        if data.len() < Self::WIRE_LEN {
            return Err(PduError::Truncated {
                expected: Self::WIRE_LEN,
                actual: data.len(),
            });
        }
        let octets: [u8; 16] = data[1..17].try_into().unwrap();
        Ok(Ipv6Encapsulation {
            flags: EncapFlags::from_octet(data[0]),
            addr: Ipv6Addr::from(octets),
            prefix_len: data[17],
        })
    }
}

impl fmt::Display for Ipv6Encapsulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}/{}",
            if self.flags.is_primary() { "<P> " } else { "" },
            if self.flags.is_loopback() { "<L> " } else { "" },
            self.addr,
            self.prefix_len
        )
    }
}
