//! Outer PDU header: `{type:u8, length:u16}` over the reassembled body.

use crate::error::PduError;
use crate::message::PduType;

/// Encoded size of the outer header.
pub const PDU_HEADER_LEN: usize = 3;

/// The outermost TLV wrapper of every PDU. `length` counts the whole PDU,
/// header included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub pdu_type: PduType,
    pub length: u16,
}

impl PduHeader {
    pub fn new(pdu_type: PduType, body_len: usize) -> Self {
        PduHeader {
            pdu_type,
            length: (PDU_HEADER_LEN + body_len) as u16,
        }
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.pdu_type as u8);
        buf.extend_from_slice(&self.length.to_be_bytes());
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, PduError> {
        if data.len() < PDU_HEADER_LEN {
            return Err(PduError::Truncated {
                expected: PDU_HEADER_LEN,
                actual: data.len(),
            });
        }
        Ok(PduHeader {
            pdu_type: PduType::try_from(data[0])?,
            length: u16::from_be_bytes([data[1], data[2]]),
        })
    }
}
