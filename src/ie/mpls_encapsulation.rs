//! MPLS-over-IP encapsulation entries.
//!
//! Wire layout is `{flags:u8, label_count:u8, labels[label_count] x 3 octets,
//! addr, prefixlen:u8}`. Labels are treated as opaque 3-octet strings.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::PduError;
use crate::ie::EncapFlags;

/// An opaque 3-octet MPLS label stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MplsLabel(pub [u8; 3]);

impl fmt::Display for MplsLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

/// An MPLS label stack bound to an IPv4 address on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MplsIpv4Encapsulation {
    pub flags: EncapFlags,
    pub labels: Vec<MplsLabel>,
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl MplsIpv4Encapsulation {
    pub fn new(
        labels: Vec<MplsLabel>,
        addr: Ipv4Addr,
        prefix_len: u8,
        flags: EncapFlags,
    ) -> Self {
        MplsIpv4Encapsulation {
            flags,
            labels,
            addr,
            prefix_len,
        }
    }

    pub fn wire_len(&self) -> usize {
        2 + 3 * self.labels.len() + 4 + 1
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.flags.octet());
        buf.push(self.labels.len() as u8);
        for label in &self.labels {
            buf.extend_from_slice(&label.0);
        }
        buf.extend_from_slice(&self.addr.octets());
        buf.push(self.prefix_len);
    }

    /// Parses one entry, returning it and the number of octets consumed.
    pub fn unmarshal(data: &[u8]) -> Result<(Self, usize), PduError> {
        let (flags, labels, rest) = unmarshal_label_stack(data, 4 + 1)?;
        let addr_at = data.len() - rest.len();
        let octets: [u8; 4] = rest[..4].try_into().unwrap();
        Ok((
            MplsIpv4Encapsulation {
                flags,
                labels,
                addr: Ipv4Addr::from(octets),
                prefix_len: rest[4],
            },
            addr_at + 5,
        ))
    }
}

impl fmt::Display for MplsIpv4Encapsulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_mpls(f, self.flags, &self.labels)?;
        write!(f, " {}/{}", self.addr, self.prefix_len)
    }
}

/// An MPLS label stack bound to an IPv6 address on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MplsIpv6Encapsulation {
    pub flags: EncapFlags,
    pub labels: Vec<MplsLabel>,
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
}

impl MplsIpv6Encapsulation {
    pub fn new(
        labels: Vec<MplsLabel>,
        addr: Ipv6Addr,
        prefix_len: u8,
        flags: EncapFlags,
    ) -> Self {
        MplsIpv6Encapsulation {
            flags,
            labels,
            addr,
            prefix_len,
        }
    }

    pub fn wire_len(&self) -> usize {
        2 + 3 * self.labels.len() + 16 + 1
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.flags.octet());
        buf.push(self.labels.len() as u8);
        for label in &self.labels {
            buf.extend_from_slice(&label.0);
        }
        buf.extend_from_slice(&self.addr.octets());
        buf.push(self.prefix_len);
    }

    /// Parses one entry, returning it and the number of octets consumed.
    pub fn unmarshal(data: &[u8]) -> Result<(Self, usize), PduError> {
        let (flags, labels, rest) = unmarshal_label_stack(data, 16 + 1)?;
        let addr_at = data.len() - rest.len();
        let octets: [u8; 16] = rest[..16].try_into().unwrap();
        Ok((
            MplsIpv6Encapsulation {
                flags,
                labels,
                addr: Ipv6Addr::from(octets),
                prefix_len: rest[16],
            },
            addr_at + 17,
        ))
    }
}

impl fmt::Display for MplsIpv6Encapsulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_mpls(f, self.flags, &self.labels)?;
        write!(f, " {}/{}", self.addr, self.prefix_len)
    }
}

/// Common prefix of both MPLS entry encodings: flags, label count, labels.
/// `tail` is the number of octets the caller still needs after the stack.
fn unmarshal_label_stack(
    data: &[u8],
    tail: usize,
) -> Result<(EncapFlags, Vec<MplsLabel>, &[u8]), PduError> {
    if data.len() < 2 {
        return Err(PduError::Truncated {
            expected: 2,
            actual: data.len(),
        });
    }
    let flags = EncapFlags::from_octet(data[0]);
    let label_count = data[1] as usize;
    let need = 2 + 3 * label_count + tail;
    if data.len() < need {
        return Err(PduError::Truncated {
            expected: need,
            actual: data.len(),
        });
    }
    let labels = data[2..2 + 3 * label_count]
        .chunks_exact(3)
        .map(|chunk| MplsLabel([chunk[0], chunk[1], chunk[2]]))
        .collect();
    Ok((flags, labels, &data[2 + 3 * label_count..]))
}

fn fmt_mpls(
    f: &mut fmt::Formatter<'_>,
    flags: EncapFlags,
    labels: &[MplsLabel],
) -> fmt::Result {
    write!(
        f,
        "<{}{}> [",
        if flags.is_primary() { "P" } else { "" },
        if flags.is_loopback() { "L" } else { "" }
    )?;
    for (i, label) in labels.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", label)?;
    }
    write!(f, "]")
}
