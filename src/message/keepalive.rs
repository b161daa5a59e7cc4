//! KEEPALIVE PDU: empty body, sent periodically on open sessions.

use crate::error::PduError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeepAlivePdu;

impl KeepAlivePdu {
    pub fn marshal_into(&self, _buf: &mut Vec<u8>) {}

    pub fn unmarshal(body: &[u8]) -> Result<Self, PduError> {
        if !body.is_empty() {
            return Err(PduError::NonEmptyKeepalive(body.len()));
        }
        Ok(KeepAlivePdu)
    }
}
