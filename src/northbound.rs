//! Northbound delivery of link-state data.
//!
//! There is no BGP-LS speaker wired up yet, so the default consumer renders
//! each encapsulation record as a JSON line in the log. A session clearing
//! its peer's contribution shows up as the four empty encapsulation reports.

use serde_json::json;
use tracing::info;

use crate::message::Pdu;
use crate::types::MacAddr;

/// Consumer of the encapsulation records a peer advertises.
pub trait Northbound {
    /// Accepts one encapsulation PDU from `peer`. An empty PDU withdraws
    /// everything previously advertised for its family.
    fn report(&self, peer: MacAddr, pdu: &Pdu);
}

/// Logs each record instead of exporting it.
#[derive(Debug, Default)]
pub struct LogNorthbound;

impl Northbound for LogNorthbound {
    fn report(&self, peer: MacAddr, pdu: &Pdu) {
        let record = json!({
            "peer": peer.to_string(),
            "kind": kind(pdu),
            "entries": entries(pdu),
        });
        info!(target: "lsoe::northbound", "{}", record);
    }
}

fn kind(pdu: &Pdu) -> &'static str {
    match pdu {
        Pdu::Ipv4Encapsulation(_) => "ipv4",
        Pdu::Ipv6Encapsulation(_) => "ipv6",
        Pdu::MplsIpv4Encapsulation(_) => "mpls-ipv4",
        Pdu::MplsIpv6Encapsulation(_) => "mpls-ipv6",
        _ => "unexpected",
    }
}

fn entries(pdu: &Pdu) -> serde_json::Value {
    match pdu {
        Pdu::Ipv4Encapsulation(p) => p
            .entries
            .iter()
            .map(|e| {
                json!({
                    "addr": e.addr.to_string(),
                    "prefix-len": e.prefix_len,
                    "primary": e.flags.is_primary(),
                    "loopback": e.flags.is_loopback(),
                })
            })
            .collect(),
        Pdu::Ipv6Encapsulation(p) => p
            .entries
            .iter()
            .map(|e| {
                json!({
                    "addr": e.addr.to_string(),
                    "prefix-len": e.prefix_len,
                    "primary": e.flags.is_primary(),
                    "loopback": e.flags.is_loopback(),
                })
            })
            .collect(),
        Pdu::MplsIpv4Encapsulation(p) => p
            .entries
            .iter()
            .map(|e| {
                json!({
                    "addr": e.addr.to_string(),
                    "prefix-len": e.prefix_len,
                    "labels": e.labels.iter().map(|l| l.to_string()).collect::<Vec<_>>(),
                    "primary": e.flags.is_primary(),
                    "loopback": e.flags.is_loopback(),
                })
            })
            .collect(),
        Pdu::MplsIpv6Encapsulation(p) => p
            .entries
            .iter()
            .map(|e| {
                json!({
                    "addr": e.addr.to_string(),
                    "prefix-len": e.prefix_len,
                    "labels": e.labels.iter().map(|l| l.to_string()).collect::<Vec<_>>(),
                    "primary": e.flags.is_primary(),
                    "loopback": e.flags.is_loopback(),
                })
            })
            .collect(),
        _ => serde_json::Value::Null,
    }
}
