//! MPLS-over-IPv4 encapsulation PDU.
//!
//! Label set construction is not implemented yet, so the daemon only ever
//! emits this PDU empty; the codec still parses populated ones.

use crate::error::PduError;
use crate::ie::MplsIpv4Encapsulation;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MplsIpv4EncapsulationPdu {
    pub entries: Vec<MplsIpv4Encapsulation>,
}

impl MplsIpv4EncapsulationPdu {
    pub fn new(entries: Vec<MplsIpv4Encapsulation>) -> Self {
        MplsIpv4EncapsulationPdu { entries }
    }

    pub fn empty() -> Self {
        MplsIpv4EncapsulationPdu::default()
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
            let (entry, used) = MplsIpv4Encapsulation::unmarshal(&body[offset..])?;
            entries.push(entry);
            offset += used;
        }
        if offset != body.len() {
            return Err(PduError::TrailingBytes {
                extra: body.len() - offset,
            });
        }
        Ok(MplsIpv4EncapsulationPdu { entries })
    }
}
