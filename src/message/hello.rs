//! HELLO PDU: periodic multicast beacon carrying the sender's MAC address.

use std::fmt;

use crate::error::PduError;
use crate::types::MacAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloPdu {
    pub my_macaddr: MacAddr,
}

impl HelloPdu {
    pub fn new(my_macaddr: MacAddr) -> Self {
        HelloPdu { my_macaddr }
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.my_macaddr.octets());
    }

    pub fn unmarshal(body: &[u8]) -> Result<Self, PduError> {
        if body.len() != 6 {
            return Err(PduError::Truncated {
                expected: 6,
                actual: body.len(),
            });
        }
        Ok(HelloPdu {
            my_macaddr: MacAddr::from_slice(body).expect("length checked"),
        })
    }
}

impl fmt::Display for HelloPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HELLO from {}", self.my_macaddr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Pdu;

    #[test]
    fn test_hello_round_trip() {
        let hello = HelloPdu::new(MacAddr::new([2, 0, 0, 0, 0, 1]));
        let data = Pdu::Hello(hello).marshal();
        assert_eq!(data, vec![0, 0, 9, 2, 0, 0, 0, 0, 1]);
        assert_eq!(Pdu::parse(&data).unwrap(), Pdu::Hello(hello));
    }

    #[test]
    fn test_hello_rejects_wrong_body_length() {
        assert!(HelloPdu::unmarshal(&[1, 2, 3]).is_err());
        assert!(HelloPdu::unmarshal(&[1, 2, 3, 4, 5, 6, 7]).is_err());
    }
}
