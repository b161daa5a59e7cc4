//! Error taxonomy.
//!
//! [`PduError`] covers malformed wire data: the offending frame is logged and
//! dropped, and the session that received it is left alone. [`TransportError`]
//! covers socket-level failures and is fatal to the daemon.

use std::io;

use thiserror::Error;

use crate::types::MacAddr;

/// Failure to parse or validate a PDU or one of its sub-encodings.
#[derive(Debug, Error)]
pub enum PduError {
    #[error("truncated PDU: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("PDU length mismatch: header says {header}, frame carries {frame}")]
    LengthMismatch { header: usize, frame: usize },

    #[error("{extra} trailing bytes after PDU body")]
    TrailingBytes { extra: usize },

    #[error("unknown PDU type {0}")]
    UnknownType(u8),

    #[error("KEEPALIVE payload must be empty, got {0} bytes")]
    NonEmptyKeepalive(usize),

    #[error("OPEN carries non-zero auth_length {0}")]
    NonZeroAuthLength(u16),

    #[error("ACK of PDU type {0} which is never ACKed")]
    AckOfUnackedType(u8),

    #[error("ACK with unknown error type {0}")]
    UnknownErrorType(u8),

    #[error("ACK with unknown error code {0}")]
    UnknownErrorCode(u16),

    #[error("ACK with NO_ERROR must carry zero error code and hint")]
    NonZeroMustBeZero,

    #[error("encapsulation entry count {count} does not fit in {actual} bytes")]
    BadEntryCount { count: usize, actual: usize },
}

/// Failure to parse a textual MAC address or build one from raw octets.
#[derive(Debug, Error)]
pub enum AddressParseError {
    #[error("MAC address must be 6 octets, got {0}")]
    BadLength(usize),

    #[error("malformed MAC address {0:?}")]
    BadFormat(String),
}

/// Socket-level failure. Any of these ends the daemon.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("packet socket I/O: {0}")]
    Io(#[from] io::Error),

    #[error("no known interface for peer {0}")]
    UnknownPeer(MacAddr),

    #[error("inbound PDU queue closed")]
    ChannelClosed,
}

/// Failure to load or validate the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("local-id must be 10 octets of hex, got {0:?}")]
    BadLocalId(String),

    #[error("no usable host identity for deriving local-id")]
    NoHostIdentity,
}
