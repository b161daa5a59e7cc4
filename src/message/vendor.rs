//! VENDOR PDU: opaque payload tagged with an IANA enterprise number.
//!
//! Receivers dispatch by enterprise number to hooks registered with the
//! engine's vendor registry; unrecognized enterprise numbers are ACKed and
//! otherwise ignored.

use std::fmt;

use crate::error::PduError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorPdu {
    pub enterprise_number: u32,
    pub enterprise_data: Vec<u8>,
}

impl VendorPdu {
    pub fn new(enterprise_number: u32, enterprise_data: Vec<u8>) -> Self {
        VendorPdu {
            enterprise_number,
            enterprise_data,
        }
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.enterprise_number.to_be_bytes());
        buf.extend_from_slice(&self.enterprise_data);
    }

    pub fn unmarshal(body: &[u8]) -> Result<Self, PduError> {
        if body.len() < 4 {
            return Err(PduError::Truncated {
                expected: 4,
                actual: body.len(),
            });
        }
        Ok(VendorPdu {
            enterprise_number: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            enterprise_data: body[4..].to_vec(),
        })
    }
}

impl fmt::Display for VendorPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VENDOR enterprise {} ({} bytes)",
            self.enterprise_number,
            self.enterprise_data.len()
        )
    }
}
