//! IPv6 encapsulation PDU: the full set of IPv6 addresses on the sender's
//! side of the link.

use crate::error::PduError;
use crate::ie::Ipv6Encapsulation;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ipv6EncapsulationPdu {
    pub entries: Vec<Ipv6Encapsulation>,
}

impl Ipv6EncapsulationPdu {
    pub fn new(entries: Vec<Ipv6Encapsulation>) -> Self {
        Ipv6EncapsulationPdu { entries }
    }

    /// The "no addresses" state, sent to clear a peer's view.
    pub fn empty() -> Self {
        Ipv6EncapsulationPdu::default()
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
        if body.len() != 2 + count * Ipv6Encapsulation::WIRE_LEN {
            return Err(PduError::BadEntryCount {
                count,
                actual: body.len() - 2,
            });
        }
        let entries = body[2..]
            .chunks_exact(Ipv6Encapsulation::WIRE_LEN)
            .map(Ipv6Encapsulation::unmarshal)
            .collect::<Result<_, _>>()?;
        Ok(Ipv6EncapsulationPdu { entries })
    }
}
