//! Transport datagram: the Ethernet-framed fragment of a PDU.
//!
//! Each frame carries a `{version:u8, frag:u8, length:u16, checksum:u32}`
//! header followed by payload. The high bit of `frag` marks the final
//! fragment of a PDU; the low seven bits are the zero-based fragment number.

use tracing::debug;

use crate::types::{ETH_DATA_LEN, LSOE_VERSION};

/// Encoded size of the datagram header.
pub const DATAGRAM_HEADER_LEN: usize = 8;

/// Largest PDU slice that fits one Ethernet frame.
pub const MAX_PAYLOAD: usize = ETH_DATA_LEN - DATAGRAM_HEADER_LEN;

/// High bit of the `frag` octet: this is the PDU's final fragment.
pub const LAST_FLAG: u8 = 0x80;

/// "F table" S-box from Skipjack, used in the datagram checksum.
const SBOX: [u8; 256] = [
    0xa3, 0xd7, 0x09, 0x83, 0xf8, 0x48, 0xf6, 0xf4, 0xb3, 0x21, 0x15, 0x78, 0x99, 0xb1, 0xaf, 0xf9,
    0xe7, 0x2d, 0x4d, 0x8a, 0xce, 0x4c, 0xca, 0x2e, 0x52, 0x95, 0xd9, 0x1e, 0x4e, 0x38, 0x44, 0x28,
    0x0a, 0xdf, 0x02, 0xa0, 0x17, 0xf1, 0x60, 0x68, 0x12, 0xb7, 0x7a, 0xc3, 0xe9, 0xfa, 0x3d, 0x53,
    0x96, 0x84, 0x6b, 0xba, 0xf2, 0x63, 0x9a, 0x19, 0x7c, 0xae, 0xe5, 0xf5, 0xf7, 0x16, 0x6a, 0xa2,
    0x39, 0xb6, 0x7b, 0x0f, 0xc1, 0x93, 0x81, 0x1b, 0xee, 0xb4, 0x1a, 0xea, 0xd0, 0x91, 0x2f, 0xb8,
    0x55, 0xb9, 0xda, 0x85, 0x3f, 0x41, 0xbf, 0xe0, 0x5a, 0x58, 0x80, 0x5f, 0x66, 0x0b, 0xd8, 0x90,
    0x35, 0xd5, 0xc0, 0xa7, 0x33, 0x06, 0x65, 0x69, 0x45, 0x00, 0x94, 0x56, 0x6d, 0x98, 0x9b, 0x76,
    0x97, 0xfc, 0xb2, 0xc2, 0xb0, 0xfe, 0xdb, 0x20, 0xe1, 0xeb, 0xd6, 0xe4, 0xdd, 0x47, 0x4a, 0x1d,
    0x42, 0xed, 0x9e, 0x6e, 0x49, 0x3c, 0xcd, 0x43, 0x27, 0xd2, 0x07, 0xd4, 0xde, 0xc7, 0x67, 0x18,
    0x89, 0xcb, 0x30, 0x1f, 0x8d, 0xc6, 0x8f, 0xaa, 0xc8, 0x74, 0xdc, 0xc9, 0x5d, 0x5c, 0x31, 0xa4,
    0x70, 0x88, 0x61, 0x2c, 0x9f, 0x0d, 0x2b, 0x87, 0x50, 0x82, 0x54, 0x64, 0x26, 0x7d, 0x03, 0x40,
    0x34, 0x4b, 0x1c, 0x73, 0xd1, 0xc4, 0xfd, 0x3b, 0xcc, 0xfb, 0x7f, 0xab, 0xe6, 0x3e, 0x5b, 0xa5,
    0xad, 0x04, 0x23, 0x9c, 0x14, 0x51, 0x22, 0xf0, 0x29, 0x79, 0x71, 0x7e, 0xff, 0x8c, 0x0e, 0xe2,
    0x0c, 0xef, 0xbc, 0x72, 0x75, 0x6f, 0x37, 0xa1, 0xec, 0xd3, 0x8e, 0x62, 0x8b, 0x86, 0x10, 0xe8,
    0x08, 0x77, 0x11, 0xbe, 0x92, 0x4f, 0x24, 0xc5, 0x32, 0x36, 0x9d, 0xcf, 0xf3, 0xa6, 0xbb, 0xac,
    0x5e, 0x6c, 0xa9, 0x13, 0x57, 0x25, 0xb5, 0xe3, 0xbd, 0xa8, 0x3a, 0x01, 0x05, 0x59, 0x2a, 0x46,
];

/// Checksum over a datagram: header with a zeroed checksum field, then the
/// payload. Four lane accumulators indexed by offset mod 4, packed
/// most-significant-lane-first with 8-bit shifts, folded twice at 32 bits.
fn sbox_checksum(frag: u8, length: u16, payload: &[u8]) -> u32 {
    let mut lanes = [0u64; 4];
    let header = [
        LSOE_VERSION,
        frag,
        (length >> 8) as u8,
        length as u8,
        0,
        0,
        0,
        0,
    ];
    for (i, b) in header.iter().chain(payload.iter()).enumerate() {
        lanes[i & 3] += SBOX[*b as usize] as u64;
    }
    let mut result = 0u64;
    for lane in lanes {
        result = (result << 8) + lane;
    }
    for _ in 0..2 {
        result = (result >> 32) + (result & 0xFFFF_FFFF);
    }
    result as u32
}

/// One wire frame. Inbound frames keep whatever header fields they arrived
/// with so that `verify` can reject them; outbound frames are always built
/// consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub version: u8,
    pub frag: u8,
    pub length: u16,
    pub checksum: u32,
    payload: Vec<u8>,
    /// Octets actually received off the wire, before truncation to `length`.
    wire_len: usize,
}

impl Datagram {
    /// Parses a received frame. Returns `None` when the frame is shorter
    /// than the header; every other defect is left for [`Datagram::verify`].
    pub fn incoming(frame: &[u8]) -> Option<Datagram> {
        if frame.len() < DATAGRAM_HEADER_LEN {
            return None;
        }
        let length = u16::from_be_bytes([frame[2], frame[3]]);
        let checksum = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
        // Anything past the claimed length is padding; drop it now.
        let end = frame.len().min((length as usize).max(DATAGRAM_HEADER_LEN));
        Some(Datagram {
            version: frame[0],
            frag: frame[1],
            length,
            checksum,
            payload: frame[DATAGRAM_HEADER_LEN..end].to_vec(),
            wire_len: end,
        })
    }

    /// Checks version, length and checksum of a received frame.
    pub fn verify(&self) -> bool {
        if self.version != LSOE_VERSION {
            debug!(
                expected = LSOE_VERSION,
                got = self.version,
                "datagram dropped: bad version"
            );
            return false;
        }
        if self.wire_len != self.length as usize {
            debug!(
                claimed = self.length,
                got = self.wire_len,
                "datagram dropped: bad length"
            );
            return false;
        }
        if self.checksum != sbox_checksum(self.frag, self.length, &self.payload) {
            debug!("datagram dropped: bad checksum");
            return false;
        }
        true
    }

    /// Builds an outbound frame around one payload chunk.
    pub fn outgoing(payload: &[u8], dgram_number: u8, last: bool) -> Datagram {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        debug_assert!(dgram_number & LAST_FLAG == 0);
        let frag = if last {
            dgram_number | LAST_FLAG
        } else {
            dgram_number
        };
        let length = (DATAGRAM_HEADER_LEN + payload.len()) as u16;
        Datagram {
            version: LSOE_VERSION,
            frag,
            length,
            checksum: sbox_checksum(frag, length, payload),
            payload: payload.to_vec(),
            wire_len: DATAGRAM_HEADER_LEN + payload.len(),
        }
    }

    /// Splits a serialized PDU into the datagrams that carry it.
    pub fn split_message(pdu: &[u8]) -> Vec<Datagram> {
        let chunks: Vec<&[u8]> = pdu.chunks(MAX_PAYLOAD).collect();
        let count = chunks.len();
        debug_assert!(count <= (LAST_FLAG as usize), "PDU too large to number fragments");
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Datagram::outgoing(chunk, i as u8, i + 1 == count))
            .collect()
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(DATAGRAM_HEADER_LEN + self.payload.len());
        frame.push(self.version);
        frame.push(self.frag);
        frame.extend_from_slice(&self.length.to_be_bytes());
        frame.extend_from_slice(&self.checksum.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Is this the last datagram in a PDU?
    pub fn is_final(&self) -> bool {
        self.frag & LAST_FLAG != 0
    }

    /// Datagram number (zero-based) within a PDU.
    pub fn dgram_number(&self) -> u8 {
        self.frag & !LAST_FLAG
    }
}
