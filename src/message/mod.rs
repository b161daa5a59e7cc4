//! The PDU codec: one module per message type, a numeric type registry, and
//! the parse dispatch over reassembled frames.

pub mod ack;
pub mod header;
pub mod hello;
pub mod ipv4_encapsulation;
pub mod ipv6_encapsulation;
pub mod keepalive;
pub mod mpls_ipv4_encapsulation;
pub mod mpls_ipv6_encapsulation;
pub mod open;
pub mod vendor;

pub use ack::{AckPdu, ErrorCode, ErrorType};
pub use header::{PduHeader, PDU_HEADER_LEN};
pub use hello::HelloPdu;
pub use ipv4_encapsulation::Ipv4EncapsulationPdu;
pub use ipv6_encapsulation::Ipv6EncapsulationPdu;
pub use keepalive::KeepAlivePdu;
pub use mpls_ipv4_encapsulation::MplsIpv4EncapsulationPdu;
pub use mpls_ipv6_encapsulation::MplsIpv6EncapsulationPdu;
pub use open::OpenPdu;
pub use vendor::VendorPdu;

use crate::error::PduError;

/// Numeric PDU type registry.
///
/// ACK acknowledges types 1 and 5 through 8 plus VENDOR; HELLO, KEEPALIVE and
/// ACK itself are never acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PduType {
    Hello = 0,
    Open = 1,
    KeepAlive = 2,
    Ack = 4,
    Ipv4Encapsulation = 5,
    Ipv6Encapsulation = 6,
    MplsIpv4Encapsulation = 7,
    MplsIpv6Encapsulation = 8,
    Vendor = 255,
}

impl PduType {
    /// All four encapsulation PDU types, in numeric order.
    pub const ENCAPSULATIONS: [PduType; 4] = [
        PduType::Ipv4Encapsulation,
        PduType::Ipv6Encapsulation,
        PduType::MplsIpv4Encapsulation,
        PduType::MplsIpv6Encapsulation,
    ];

    /// Does a PDU of this type expect an ACK from the receiver?
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            PduType::Open
                | PduType::Ipv4Encapsulation
                | PduType::Ipv6Encapsulation
                | PduType::MplsIpv4Encapsulation
                | PduType::MplsIpv6Encapsulation
                | PduType::Vendor
        )
    }

    pub fn is_encapsulation(&self) -> bool {
        PduType::ENCAPSULATIONS.contains(self)
    }
}

impl TryFrom<u8> for PduType {
    type Error = PduError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PduType::Hello),
            1 => Ok(PduType::Open),
            2 => Ok(PduType::KeepAlive),
            4 => Ok(PduType::Ack),
            5 => Ok(PduType::Ipv4Encapsulation),
            6 => Ok(PduType::Ipv6Encapsulation),
            7 => Ok(PduType::MplsIpv4Encapsulation),
            8 => Ok(PduType::MplsIpv6Encapsulation),
            255 => Ok(PduType::Vendor),
            _ => Err(PduError::UnknownType(v)),
        }
    }
}

/// One upper-layer message, tagged by [`PduType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Hello(HelloPdu),
    Open(OpenPdu),
    KeepAlive(KeepAlivePdu),
    Ack(AckPdu),
    Ipv4Encapsulation(Ipv4EncapsulationPdu),
    Ipv6Encapsulation(Ipv6EncapsulationPdu),
    MplsIpv4Encapsulation(MplsIpv4EncapsulationPdu),
    MplsIpv6Encapsulation(MplsIpv6EncapsulationPdu),
    Vendor(VendorPdu),
}

impl Pdu {
    /// Parses a reassembled frame into a PDU.
    ///
    /// The outer header's length must cover the frame exactly; anything else
    /// is a [`PduError::LengthMismatch`].
    pub fn parse(data: &[u8]) -> Result<Pdu, PduError> {
        let header = PduHeader::unmarshal(data)?;
        if header.length as usize != data.len() {
            return Err(PduError::LengthMismatch {
                header: header.length as usize,
                frame: data.len(),
            });
        }
        let body = &data[PDU_HEADER_LEN..];
        match header.pdu_type {
            PduType::Hello => Ok(Pdu::Hello(HelloPdu::unmarshal(body)?)),
            PduType::Open => Ok(Pdu::Open(OpenPdu::unmarshal(body)?)),
            PduType::KeepAlive => Ok(Pdu::KeepAlive(KeepAlivePdu::unmarshal(body)?)),
            PduType::Ack => Ok(Pdu::Ack(AckPdu::unmarshal(body)?)),
            PduType::Ipv4Encapsulation => Ok(Pdu::Ipv4Encapsulation(
                Ipv4EncapsulationPdu::unmarshal(body)?,
            )),
            PduType::Ipv6Encapsulation => Ok(Pdu::Ipv6Encapsulation(
                Ipv6EncapsulationPdu::unmarshal(body)?,
            )),
            PduType::MplsIpv4Encapsulation => Ok(Pdu::MplsIpv4Encapsulation(
                MplsIpv4EncapsulationPdu::unmarshal(body)?,
            )),
            PduType::MplsIpv6Encapsulation => Ok(Pdu::MplsIpv6Encapsulation(
                MplsIpv6EncapsulationPdu::unmarshal(body)?,
            )),
            PduType::Vendor => Ok(Pdu::Vendor(VendorPdu::unmarshal(body)?)),
        }
    }

    /// Serializes the PDU, outer header included. Total: never fails.
    pub fn marshal(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Pdu::Hello(p) => p.marshal_into(&mut body),
            Pdu::Open(p) => p.marshal_into(&mut body),
            Pdu::KeepAlive(p) => p.marshal_into(&mut body),
            Pdu::Ack(p) => p.marshal_into(&mut body),
            Pdu::Ipv4Encapsulation(p) => p.marshal_into(&mut body),
            Pdu::Ipv6Encapsulation(p) => p.marshal_into(&mut body),
            Pdu::MplsIpv4Encapsulation(p) => p.marshal_into(&mut body),
            Pdu::MplsIpv6Encapsulation(p) => p.marshal_into(&mut body),
            Pdu::Vendor(p) => p.marshal_into(&mut body),
        }
        let mut data = Vec::with_capacity(PDU_HEADER_LEN + body.len());
        PduHeader::new(self.pdu_type(), body.len()).marshal_into(&mut data);
        data.extend_from_slice(&body);
        data
    }

    pub fn pdu_type(&self) -> PduType {
        match self {
            Pdu::Hello(_) => PduType::Hello,
            Pdu::Open(_) => PduType::Open,
            Pdu::KeepAlive(_) => PduType::KeepAlive,
            Pdu::Ack(_) => PduType::Ack,
            Pdu::Ipv4Encapsulation(_) => PduType::Ipv4Encapsulation,
            Pdu::Ipv6Encapsulation(_) => PduType::Ipv6Encapsulation,
            Pdu::MplsIpv4Encapsulation(_) => PduType::MplsIpv4Encapsulation,
            Pdu::MplsIpv6Encapsulation(_) => PduType::MplsIpv6Encapsulation,
            Pdu::Vendor(_) => PduType::Vendor,
        }
    }

    pub fn requires_ack(&self) -> bool {
        self.pdu_type().requires_ack()
    }

    /// An empty encapsulation PDU of the given type. Panics on a
    /// non-encapsulation type.
    pub fn empty_encapsulation(pdu_type: PduType) -> Pdu {
        match pdu_type {
            PduType::Ipv4Encapsulation => {
                Pdu::Ipv4Encapsulation(Ipv4EncapsulationPdu::empty())
            }
            PduType::Ipv6Encapsulation => {
                Pdu::Ipv6Encapsulation(Ipv6EncapsulationPdu::empty())
            }
            PduType::MplsIpv4Encapsulation => {
                Pdu::MplsIpv4Encapsulation(MplsIpv4EncapsulationPdu::empty())
            }
            PduType::MplsIpv6Encapsulation => {
                Pdu::MplsIpv6Encapsulation(MplsIpv6EncapsulationPdu::empty())
            }
            other => panic!("{:?} is not an encapsulation PDU type", other),
        }
    }
}
