//! Encapsulation entries: the per-address sub-encodings carried inside the
//! four encapsulation PDUs.

pub mod ip_encapsulation;
pub mod mpls_encapsulation;

pub use ip_encapsulation::{Ipv4Encapsulation, Ipv6Encapsulation};
pub use mpls_encapsulation::{MplsIpv4Encapsulation, MplsIpv6Encapsulation, MplsLabel};

use bitflags::bitflags;

bitflags! {
    /// Flags octet of an encapsulation entry.
    ///
    /// Undefined bits are preserved verbatim so an entry survives a
    /// marshal/unmarshal round trip even when a future flag is present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct EncapFlags: u8 {
        /// Address is the interface's primary address.
        const PRIMARY = 0x80;
        /// Address lives on a loopback interface.
        const LOOPBACK = 0x40;
    }
}

impl EncapFlags {
    pub fn from_octet(octet: u8) -> Self {
        EncapFlags::from_bits_retain(octet)
    }

    pub fn octet(&self) -> u8 {
        self.bits()
    }

    pub fn is_primary(&self) -> bool {
        self.contains(EncapFlags::PRIMARY)
    }

    pub fn is_loopback(&self) -> bool {
        self.contains(EncapFlags::LOOPBACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encap_flags_round_trip() {
        let flags = EncapFlags::PRIMARY | EncapFlags::LOOPBACK;
        assert_eq!(EncapFlags::from_octet(flags.octet()), flags);
    }

    #[test]
    fn test_encap_flags_accessors() {
        assert!(EncapFlags::PRIMARY.is_primary());
        assert!(!EncapFlags::PRIMARY.is_loopback());
        assert!(EncapFlags::LOOPBACK.is_loopback());
    }

    #[test]
    fn test_encap_flags_preserves_undefined_bits() {
        let flags = EncapFlags::from_octet(0xC3);
        assert_eq!(flags.octet(), 0xC3);
        assert!(flags.is_primary());
        assert!(flags.is_loopback());
    }
}
