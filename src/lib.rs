//! # lsoe
//!
//! Link State Over Ethernet (LSOE): a link-local discovery and link-state
//! distribution protocol that runs directly over Ethernet, with no IP
//! underneath. Directly connected devices find each other with periodic
//! multicast HELLOs, establish a session with a bidirectional OPEN
//! handshake, and then keep each other informed of the IPv4, IPv6 and
//! MPLS-over-IP addressing configured on the shared link. Keepalives
//! maintain liveness; OPEN and encapsulation PDUs are delivered reliably
//! with ACK-driven retransmission and exponential backoff.
//!
//! ## Module organization
//!
//! - [`message`] - the PDU codec: seven message types over a `{type, length}`
//!   outer header
//! - [`ie`] - the encapsulation entries carried inside encapsulation PDUs
//! - [`transport`] - fragmentation, reassembly and checksumming over a raw
//!   `AF_PACKET` socket bound to EtherType 0x8885
//! - [`ifdb`] - the kernel interface mirror feeding our advertisements
//! - [`session`] - the per-neighbor state machine
//! - [`engine`] - the event loop tying it all together
//!
//! The [`engine::Engine`] is the daemon; everything below it is usable as a
//! library, and nothing below [`transport`] needs elevated privileges.

pub mod config;
pub mod engine;
pub mod error;
pub mod ie;
pub mod ifdb;
pub mod message;
pub mod northbound;
pub mod session;
pub mod transport;
pub mod types;
