//! Error types for the collaborator interfaces

use thiserror::Error;

use crate::identity::PeerId;
use crate::placement::PlacementId;

/// Top-level error type for collaborator failures
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised by an [`ArtifactStore`](crate::ArtifactStore)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No local artifact for placement {0}")]
    NotFound(PlacementId),

    #[error("Artifact already staged for placement {0}")]
    AlreadyStaging(PlacementId),
}

/// Errors raised by a [`PlacementRegistry`](crate::PlacementRegistry)
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Placement already registered: {0}")]
    Duplicate(PlacementId),

    #[error("Placement not found: {0}")]
    NotFound(PlacementId),
}

/// Errors raised by the outbound side of a connection
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Peer not connected: {0}")]
    PeerNotConnected(PeerId),
}

/// Result type alias for collaborator operations
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let id = PlacementId::from_u128(7);
        let err = StoreError::NotFound(id);
        assert!(format!("{}", err).contains("No local artifact"));
        assert!(format!("{}", err).contains(&id.to_string()));

        let err: StoreError = std::io::Error::other("disk full").into();
        assert!(format!("{}", err).contains("disk full"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::PeerNotConnected(PeerId::new(3));
        assert!(format!("{}", err).contains("peer#3"));
    }

    #[test]
    fn test_error_conversions() {
        let err: CoreError = RegistryError::Duplicate(PlacementId::from_u128(1)).into();
        assert!(matches!(err, CoreError::Registry(_)));

        let err: CoreError = TransportError::SendFailed("closed".into()).into();
        assert!(matches!(err, CoreError::Transport(_)));
        assert!(format!("{}", err).contains("Transport error"));
    }
}
