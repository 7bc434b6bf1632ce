//! Error types for the protocol core

use blueprint_core::{Checksum, PeerId, PlacementId, RegistryError, StoreError, TransportError};
use thiserror::Error;

/// Errors surfaced by dispatchers and exchanges
///
/// Only [`ProtocolError::VersionRejected`] is connection-fatal. Every other
/// variant is confined to the exchange that raised it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Version rejected: local {local}, remote {remote}")]
    VersionRejected { local: String, remote: String },

    #[error("Placement {0} is already being modified")]
    LockConflict(PlacementId),

    #[error("Transfer quota of {limit} bytes exceeded by {peer}")]
    QuotaExceeded { peer: String, limit: u64 },

    #[error("Transfer I/O failure: {0}")]
    TransferIo(String),

    #[error("Checksum mismatch for {placement}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        placement: PlacementId,
        expected: Checksum,
        actual: Checksum,
    },

    #[error("Malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Unknown placement: {0}")]
    UnknownPlacement(PlacementId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dispatcher runtime stopped")]
    RuntimeClosed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ProtocolError {
    /// Whether this error ends the whole connection rather than one exchange
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, ProtocolError::VersionRejected { .. })
    }
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_rejected_is_fatal() {
        let err = ProtocolError::VersionRejected {
            local: "0.3.2".into(),
            remote: "0.0.1".into(),
        };
        assert!(err.is_connection_fatal());
        assert!(format!("{}", err).contains("0.0.1"));

        assert!(!ProtocolError::LockConflict(PlacementId::from_u128(1)).is_connection_fatal());
        assert!(!ProtocolError::TransferIo("eof".into()).is_connection_fatal());
    }

    #[test]
    fn test_quota_display() {
        let err = ProtocolError::QuotaExceeded {
            peer: "player-1".into(),
            limit: 100,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("100"));
        assert!(msg.contains("player-1"));
    }

    #[test]
    fn test_error_conversions() {
        let err: ProtocolError = StoreError::NotFound(PlacementId::from_u128(2)).into();
        assert!(matches!(err, ProtocolError::Store(_)));

        let err: ProtocolError = TransportError::SendFailed("closed".into()).into();
        assert!(matches!(err, ProtocolError::Transport(_)));
    }
}
