//! OPEN PDU: one half of the session handshake.
//!
//! Carries a per-incarnation random nonce, the sender's 10-octet local ID,
//! optional attributes, and an authentication-data length that must be zero
//! until a signature scheme is defined.

use std::fmt;

use crate::error::PduError;

/// Fixed part of the body: nonce + local ID + attribute length octet.
const FIXED_LEN: usize = 4 + 10 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPdu {
    pub nonce: [u8; 4],
    pub local_id: [u8; 10],
    pub attributes: Vec<u8>,
}

impl OpenPdu {
    /// Attributes are limited by the one-octet length field.
    pub fn new(nonce: [u8; 4], local_id: [u8; 10], attributes: Vec<u8>) -> Self {
        assert!(attributes.len() <= u8::MAX as usize);
        OpenPdu {
            nonce,
            local_id,
            attributes,
        }
    }

    /// A fresh OPEN with a random nonce, as sent at session setup.
    pub fn with_random_nonce(local_id: [u8; 10], attributes: Vec<u8>) -> Self {
        OpenPdu::new(rand::random(), local_id, attributes)
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.local_id);
        buf.push(self.attributes.len() as u8);
        buf.extend_from_slice(&self.attributes);
        buf.extend_from_slice(&0u16.to_be_bytes());
    }

    pub fn unmarshal(body: &[u8]) -> Result<Self, PduError> {
        if body.len() < FIXED_LEN + 2 {
            return Err(PduError::Truncated {
                expected: FIXED_LEN + 2,
                actual: body.len(),
            });
        }
        let nonce: [u8; 4] = body[..4].try_into().unwrap();
        let local_id: [u8; 10] = body[4..14].try_into().unwrap();
        let attr_len = body[14] as usize;
        let auth_at = FIXED_LEN + attr_len;
        if body.len() < auth_at + 2 {
            return Err(PduError::Truncated {
                expected: auth_at + 2,
                actual: body.len(),
            });
        }
        let attributes = body[FIXED_LEN..auth_at].to_vec();
        let auth_len = u16::from_be_bytes([body[auth_at], body[auth_at + 1]]);
        if auth_len != 0 {
            // Implementation restriction until a signature scheme is defined.
            return Err(PduError::NonZeroAuthLength(auth_len));
        }
        let extra = body.len() - (auth_at + 2);
        if extra != 0 {
            return Err(PduError::TrailingBytes { extra });
        }
        Ok(OpenPdu {
            nonce,
            local_id,
            attributes,
        })
    }
}

impl fmt::Display for OpenPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OPEN nonce {} local-id {}",
            hex::encode(self.nonce),
            hex::encode(self.local_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Pdu;

    const LOCAL_ID: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];

    #[test]
    fn test_open_round_trip() {
        let open = OpenPdu::new([0xDE, 0xAD, 0xBE, 0xEF], LOCAL_ID, Vec::new());
        let data = Pdu::Open(open.clone()).marshal();
        assert_eq!(data.len(), 3 + FIXED_LEN + 2);
        assert_eq!(Pdu::parse(&data).unwrap(), Pdu::Open(open));
    }

    #[test]
    fn test_open_round_trip_with_attributes() {
        let open = OpenPdu::new([1, 2, 3, 4], LOCAL_ID, vec![0xAA, 0xBB, 0xCC]);
        let data = Pdu::Open(open.clone()).marshal();
        assert_eq!(Pdu::parse(&data).unwrap(), Pdu::Open(open));
    }

    #[test]
    fn test_open_random_nonces_differ() {
        let a = OpenPdu::with_random_nonce(LOCAL_ID, Vec::new());
        let b = OpenPdu::with_random_nonce(LOCAL_ID, Vec::new());
        // Four random octets colliding here would be a one-in-four-billion event.
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_open_rejects_nonzero_auth_length() {
        let open = OpenPdu::new([1, 2, 3, 4], LOCAL_ID, Vec::new());
        let mut data = Pdu::Open(open).marshal();
        let at = data.len() - 1;
        data[at] = 4;
        assert!(matches!(
            Pdu::parse(&data),
            Err(PduError::NonZeroAuthLength(4))
        ));
    }

    #[test]
    fn test_open_rejects_truncated_attributes() {
        // attr_len says 10 but only 3 attribute octets follow.
        let open = OpenPdu::new([1, 2, 3, 4], LOCAL_ID, vec![7, 8, 9]);
        let mut data = Pdu::Open(open).marshal();
        data[3 + 14] = 10;
        assert!(matches!(Pdu::parse(&data), Err(PduError::Truncated { .. })));
    }

    #[test]
    fn test_open_rejects_short_body() {
        assert!(OpenPdu::unmarshal(&[0u8; 10]).is_err());
    }
}
