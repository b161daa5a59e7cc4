//! ACK PDU: acknowledges one PDU of an ACKed type, optionally reporting a
//! protocol-level error.
//!
//! The 16-bit error field packs the error type into the high nibble and the
//! error code into the low 12 bits. A NO_ERROR ACK must carry a zero code and
//! a zero hint; constructors keep those states unrepresentable so marshaling
//! stays total.

use std::fmt;

use crate::error::PduError;
use crate::message::PduType;

const BODY_LEN: usize = 5;

const TYPE_SHIFT: u16 = 12;
const CODE_MASK: u16 = 0x0FFF;

/// Severity of an error reported in an ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorType {
    /// No error; code and hint must be zero.
    NoError = 0,
    /// Something bad happened but the session can continue.
    Warning = 1,
    /// Something bad happened and the session must restart.
    Restart = 2,
    /// Something bad happened and a restart will not help; call an operator.
    Hopeless = 3,
}

impl TryFrom<u8> for ErrorType {
    type Error = PduError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ErrorType::NoError),
            1 => Ok(ErrorType::Warning),
            2 => Ok(ErrorType::Restart),
            3 => Ok(ErrorType::Hopeless),
            _ => Err(PduError::UnknownErrorType(v)),
        }
    }
}

/// What went wrong, when an ACK carries an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    LinkAddressingConflict = 1,
    AuthorizationFailureInOpen = 2,
}

impl TryFrom<u16> for ErrorCode {
    type Error = PduError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(ErrorCode::LinkAddressingConflict),
            2 => Ok(ErrorCode::AuthorizationFailureInOpen),
            _ => Err(PduError::UnknownErrorCode(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPdu {
    ack_type: PduType,
    error: Option<(ErrorType, ErrorCode)>,
    error_hint: u16,
}

impl AckPdu {
    /// A clean acknowledgment of `ack_type`.
    pub fn ack(ack_type: PduType) -> Self {
        debug_assert!(ack_type.requires_ack());
        AckPdu {
            ack_type,
            error: None,
            error_hint: 0,
        }
    }

    /// An acknowledgment reporting an error. `error_type` must not be
    /// [`ErrorType::NoError`].
    pub fn error(
        ack_type: PduType,
        error_type: ErrorType,
        error_code: ErrorCode,
        error_hint: u16,
    ) -> Self {
        debug_assert!(ack_type.requires_ack());
        debug_assert!(error_type != ErrorType::NoError);
        AckPdu {
            ack_type,
            error: Some((error_type, error_code)),
            error_hint,
        }
    }

    pub fn ack_type(&self) -> PduType {
        self.ack_type
    }

    pub fn error_report(&self) -> Option<(ErrorType, ErrorCode)> {
        self.error
    }

    pub fn error_hint(&self) -> u16 {
        self.error_hint
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        let bits = match self.error {
            None => 0,
            Some((error_type, error_code)) => {
                ((error_type as u16) << TYPE_SHIFT) | (error_code as u16)
            }
        };
        buf.push(self.ack_type as u8);
        buf.extend_from_slice(&bits.to_be_bytes());
        buf.extend_from_slice(&self.error_hint.to_be_bytes());
    }

    pub fn unmarshal(body: &[u8]) -> Result<Self, PduError> {
        if body.len() != BODY_LEN {
            return Err(PduError::Truncated {
                expected: BODY_LEN,
                actual: body.len(),
            });
        }
        let ack_type = PduType::try_from(body[0])?;
        if !ack_type.requires_ack() {
            return Err(PduError::AckOfUnackedType(body[0]));
        }
        let bits = u16::from_be_bytes([body[1], body[2]]);
        let error_hint = u16::from_be_bytes([body[3], body[4]]);
        let error_type = ErrorType::try_from((bits >> TYPE_SHIFT) as u8)?;
        let code = bits & CODE_MASK;
        let error = match error_type {
            ErrorType::NoError => {
                if code != 0 || error_hint != 0 {
                    return Err(PduError::NonZeroMustBeZero);
                }
                None
            }
            _ => Some((error_type, ErrorCode::try_from(code)?)),
        };
        Ok(AckPdu {
            ack_type,
            error,
            error_hint,
        })
    }
}

impl fmt::Display for AckPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error {
            None => write!(f, "ACK of {:?}", self.ack_type),
            Some((error_type, error_code)) => write!(
                f,
                "ACK of {:?} with {:?}/{:?} hint {:#06x}",
                self.ack_type, error_type, error_code, self.error_hint
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Pdu;

    #[test]
    fn test_ack_round_trip() {
        let ack = AckPdu::ack(PduType::Open);
        let data = Pdu::Ack(ack).marshal();
        assert_eq!(data, vec![4, 0, 8, 1, 0, 0, 0, 0]);
        assert_eq!(Pdu::parse(&data).unwrap(), Pdu::Ack(ack));
    }

    #[test]
    fn test_ack_error_round_trip() {
        let ack = AckPdu::error(
            PduType::Vendor,
            ErrorType::Restart,
            ErrorCode::LinkAddressingConflict,
            0xBEEF,
        );
        let data = Pdu::Ack(ack).marshal();
        let parsed = match Pdu::parse(&data).unwrap() {
            Pdu::Ack(a) => a,
            other => panic!("expected ACK, got {:?}", other),
        };
        assert_eq!(parsed, ack);
        assert_eq!(
            parsed.error_report(),
            Some((ErrorType::Restart, ErrorCode::LinkAddressingConflict))
        );
        assert_eq!(parsed.error_hint(), 0xBEEF);
    }

    #[test]
    fn test_ack_error_field_packing() {
        let ack = AckPdu::error(
            PduType::Open,
            ErrorType::Hopeless,
            ErrorCode::AuthorizationFailureInOpen,
            0,
        );
        let mut body = Vec::new();
        ack.marshal_into(&mut body);
        assert_eq!(body, vec![1, 0x30, 0x02, 0, 0]);
    }

    #[test]
    fn test_ack_rejects_ack_of_unacked_type() {
        // ACKing a KEEPALIVE makes no sense.
        let body = [2u8, 0, 0, 0, 0];
        assert!(matches!(
            AckPdu::unmarshal(&body),
            Err(PduError::AckOfUnackedType(2))
        ));
    }

    #[test]
    fn test_ack_rejects_unknown_ack_type() {
        let body = [9u8, 0, 0, 0, 0];
        assert!(matches!(
            AckPdu::unmarshal(&body),
            Err(PduError::UnknownType(9))
        ));
    }

    #[test]
    fn test_ack_rejects_nonzero_code_with_no_error() {
        let body = [1u8, 0x00, 0x01, 0, 0];
        assert!(matches!(
            AckPdu::unmarshal(&body),
            Err(PduError::NonZeroMustBeZero)
        ));
    }

    #[test]
    fn test_ack_rejects_nonzero_hint_with_no_error() {
        let body = [1u8, 0, 0, 0, 7];
        assert!(matches!(
            AckPdu::unmarshal(&body),
            Err(PduError::NonZeroMustBeZero)
        ));
    }

    #[test]
    fn test_ack_rejects_unknown_error_code() {
        // Warning with code 3, which is unassigned.
        let body = [1u8, 0x10, 0x03, 0, 0];
        assert!(matches!(
            AckPdu::unmarshal(&body),
            Err(PduError::UnknownErrorCode(3))
        ));
    }

    #[test]
    fn test_ack_rejects_unknown_error_type() {
        // High nibble 4 is unassigned.
        let body = [1u8, 0x40, 0x01, 0, 0];
        assert!(matches!(
            AckPdu::unmarshal(&body),
            Err(PduError::UnknownErrorType(4))
        ));
    }

    #[test]
    fn test_ack_rejects_wrong_body_length() {
        assert!(AckPdu::unmarshal(&[1, 0, 0, 0]).is_err());
        assert!(AckPdu::unmarshal(&[1, 0, 0, 0, 0, 0]).is_err());
    }
}
