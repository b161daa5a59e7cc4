//! MPLS-over-IPv6 encapsulation PDU.
//!
//! Like its IPv4 sibling, only ever emitted empty for now.

use crate::error::PduError;
use crate::ie::MplsIpv6Encapsulation;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MplsIpv6EncapsulationPdu {
    pub entries: Vec<MplsIpv6Encapsulation>,
}

impl MplsIpv6EncapsulationPdu {
    pub fn new(entries: Vec<MplsIpv6Encapsulation>) -> Self {
        MplsIpv6EncapsulationPdu { entries }
    }

    pub fn empty() -> Self {
        MplsIpv6EncapsulationPdu::default()
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in &self.entries {
            entry.marshal_into(buf);
        }
    }

    pub fn unmarshal(body: &[u8]) -> Result<Self, PduError> {
        if body.len() < 2 {
            return Err(PduError::Truncated {
                expected: 2,
                actual: body.len(),
            });
        }
        let count = u16::from_be_bytes([body[0], body[1]]) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut offset = 2;
        for _ in 0..count {
            let (entry, used) = MplsIpv6Encapsulation::unmarshal(&body[offset..])?;
            entries.push(entry);
            offset += used;
        }
        if offset != body.len() {
            return Err(PduError::TrailingBytes {
                extra: body.len() - offset,
            });
        }
        Ok(MplsIpv6EncapsulationPdu { entries })
    }
}
