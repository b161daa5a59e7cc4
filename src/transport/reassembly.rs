//! Per-peer PDU reassembly and the MAC-to-interface cache.

use std::cmp::Reverse;
use std::collections::HashMap;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::datagram::Datagram;
use crate::types::MacAddr;

/// Collects the datagrams of one peer's in-flight PDU.
///
/// Frames are kept sorted by `(dgram_number, newest-first)`; a PDU is
/// delivered once the buffer holds a contiguous run `0..n` whose final frame,
/// and only the final frame, carries the LAST flag. Shadowed older duplicates
/// are discarded during that check.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    frames: Vec<(Datagram, Instant)>,
}

impl ReassemblyBuffer {
    /// Adds one verified datagram; returns the reassembled PDU bytes when
    /// this frame completes it.
    pub fn push(&mut self, dgram: Datagram, now: Instant) -> Option<Vec<u8>> {
        self.frames.push((dgram, now));
        self.frames
            .sort_by_key(|(d, ts)| (d.dgram_number(), Reverse(*ts)));
        if !self.frames.last().map(|(d, _)| d.is_final())? {
            return None;
        }
        // Keep, for each fragment number, only the newest copy.
        let mut kept = Vec::with_capacity(self.frames.len());
        for (i, frame) in self.frames.drain(..).enumerate() {
            if frame.0.dgram_number() as usize >= i {
                kept.push(frame);
            }
        }
        self.frames = kept;
        let last = self.frames.len() - 1;
        for (i, (d, _)) in self.frames.iter().enumerate() {
            if d.dgram_number() as usize != i || d.is_final() != (i == last) {
                debug!("PDU reassembly incomplete, waiting for more frames");
                return None;
            }
        }
        let pdu = self
            .frames
            .iter()
            .flat_map(|(d, _)| d.payload().iter().copied())
            .collect();
        self.frames.clear();
        Some(pdu)
    }

    /// Drops frames that arrived before `threshold`; returns true when the
    /// buffer is empty afterwards and can itself be dropped.
    pub fn expire(&mut self, threshold: Instant) -> bool {
        self.frames.retain(|(_, ts)| *ts >= threshold);
        self.frames.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Remembers which interface each peer MAC was last seen on, so outbound
/// writes can be routed without the caller naming an interface.
#[derive(Debug, Default)]
pub struct MacCache {
    entries: HashMap<MacAddr, (String, Instant)>,
}

impl MacCache {
    /// Records a sighting of `mac` on `ifname`.
    ///
    /// Returns false, without updating the cache, when the MAC is already
    /// bound to a different interface: MAC mobility is treated as a
    /// configuration error, and this is the single place that policy lives.
    pub fn observe(&mut self, mac: MacAddr, ifname: &str, now: Instant) -> bool {
        match self.entries.get_mut(&mac) {
            Some((known, ts)) if known == ifname => {
                *ts = now;
                true
            }
            Some((known, _)) => {
                warn!(
                    %mac,
                    from = %known,
                    to = %ifname,
                    "MAC address moved interfaces, dropping frame"
                );
                false
            }
            None => {
                debug!(%mac, %ifname, "frame from new MAC address");
                self.entries.insert(mac, (ifname.to_string(), now));
                true
            }
        }
    }

    pub fn lookup(&self, mac: MacAddr) -> Option<&str> {
        self.entries.get(&mac).map(|(ifname, _)| ifname.as_str())
    }

    /// Evicts entries last seen before `threshold`.
    pub fn expire(&mut self, threshold: Instant) {
        self.entries.retain(|_, (_, ts)| *ts >= threshold);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frames(pdu: &[u8]) -> Vec<Datagram> {
        Datagram::split_message(pdu)
    }

    #[test]
    fn test_single_frame_delivery() {
        let now = Instant::now();
        let mut buf = ReassemblyBuffer::default();
        let pdu = vec![1, 2, 3, 4];
        let got = buf.push(frames(&pdu).remove(0), now);
        assert_eq!(got, Some(pdu));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_in_order_delivery() {
        let now = Instant::now();
        let mut buf = ReassemblyBuffer::default();
        let pdu: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
        let mut last = None;
        for (i, d) in frames(&pdu).into_iter().enumerate() {
            last = buf.push(d, now + Duration::from_millis(i as u64));
        }
        assert_eq!(last, Some(pdu));
    }

    #[test]
    fn test_reordered_delivery() {
        let now = Instant::now();
        let pdu: Vec<u8> = (0..4000u32).map(|i| (i >> 3) as u8).collect();
        let dgrams = frames(&pdu);
        assert_eq!(dgrams.len(), 3);
        for order in [[2, 0, 1], [1, 2, 0], [2, 1, 0], [0, 2, 1]] {
            let mut buf = ReassemblyBuffer::default();
            let mut got = None;
            for (step, idx) in order.iter().enumerate() {
                got = buf.push(
                    dgrams[*idx].clone(),
                    now + Duration::from_millis(step as u64),
                );
            }
            assert_eq!(got, Some(pdu.clone()), "order {:?}", order);
        }
    }

    #[test]
    fn test_gap_blocks_delivery() {
        let now = Instant::now();
        let pdu: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
        let dgrams = frames(&pdu);
        let mut buf = ReassemblyBuffer::default();
        assert_eq!(buf.push(dgrams[0].clone(), now), None);
        assert_eq!(buf.push(dgrams[2].clone(), now), None);
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_late_duplicate_of_middle_frame() {
        // Middle frame lost, arrives after the final one, then once more as
        // a duplicate: exactly one PDU comes out.
        let now = Instant::now();
        let pdu: Vec<u8> = (0..4000u32).map(|i| (i * 7) as u8).collect();
        let dgrams = frames(&pdu);
        let mut buf = ReassemblyBuffer::default();
        assert_eq!(buf.push(dgrams[0].clone(), now), None);
        assert_eq!(
            buf.push(dgrams[2].clone(), now + Duration::from_millis(1)),
            None
        );
        assert_eq!(
            buf.push(dgrams[1].clone(), now + Duration::from_millis(2)),
            Some(pdu)
        );
        // The re-injected duplicate starts a fresh buffer that never
        // completes; it must not produce a second PDU.
        assert_eq!(
            buf.push(dgrams[1].clone(), now + Duration::from_millis(3)),
            None
        );
    }

    #[test]
    fn test_duplicate_final_frame_keeps_newest() {
        let now = Instant::now();
        let pdu: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
        let dgrams = frames(&pdu);
        assert_eq!(dgrams.len(), 2);
        let mut buf = ReassemblyBuffer::default();
        assert_eq!(buf.push(dgrams[0].clone(), now), None);
        assert_eq!(
            buf.push(dgrams[1].clone(), now + Duration::from_millis(1)),
            Some(pdu.clone())
        );
    }

    #[test]
    fn test_expire_drops_stale_frames() {
        let now = Instant::now();
        let pdu: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
        let dgrams = frames(&pdu);
        let mut buf = ReassemblyBuffer::default();
        buf.push(dgrams[0].clone(), now);
        assert!(!buf.expire(now) );
        assert!(buf.expire(now + Duration::from_secs(1)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_mac_cache_observe_and_lookup() {
        let now = Instant::now();
        let mut cache = MacCache::default();
        let mac = MacAddr::new([2, 0, 0, 0, 0, 1]);
        assert!(cache.observe(mac, "eth0", now));
        assert_eq!(cache.lookup(mac), Some("eth0"));
    }

    #[test]
    fn test_mac_cache_rejects_move() {
        let now = Instant::now();
        let mut cache = MacCache::default();
        let mac = MacAddr::new([2, 0, 0, 0, 0, 1]);
        assert!(cache.observe(mac, "eth0", now));
        assert!(!cache.observe(mac, "eth1", now));
        // Binding is retained under the old interface.
        assert_eq!(cache.lookup(mac), Some("eth0"));
    }

    #[test]
    fn test_mac_cache_expiry() {
        let now = Instant::now();
        let mut cache = MacCache::default();
        let old = MacAddr::new([2, 0, 0, 0, 0, 1]);
        let fresh = MacAddr::new([2, 0, 0, 0, 0, 2]);
        cache.observe(old, "eth0", now);
        cache.observe(fresh, "eth0", now + Duration::from_secs(300));
        cache.expire(now + Duration::from_secs(150));
        assert_eq!(cache.lookup(old), None);
        assert_eq!(cache.lookup(fresh), Some("eth0"));
    }
}
