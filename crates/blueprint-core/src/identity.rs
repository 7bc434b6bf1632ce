//! Participant and connection identities
//!
//! Two distinct notions live here:
//!
//! - [`Identity`]: who a participant is (stable id plus display name). It is
//!   persisted by an [`IdentityProvider`](crate::IdentityProvider) and recorded
//!   as a placement's owner or last modifier.
//! - [`PeerId`]: which live connection a message arrived on. It is a process
//!   local handle assigned by the embedding transport and never leaves it.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handle for one live connection
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("peer#{_0}")]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a peer handle from a raw connection number
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw connection number
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A participant identity: stable id plus the last known display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier
    pub id: Uuid,
    /// Human-readable name, refreshed whenever the participant is seen again
    pub name: String,
}

impl Identity {
    /// Create an identity
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Identity used for placements whose owner is not known
    pub fn unknown() -> Self {
        Self::new(Uuid::nil(), "Unknown")
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display() {
        assert_eq!(PeerId::new(42).to_string(), "peer#42");
        assert_eq!(PeerId::new(42).raw(), 42);
    }

    #[test]
    fn test_identity_display() {
        let id = Uuid::from_u128(1);
        let identity = Identity::new(id, "Steve");
        let shown = identity.to_string();
        assert!(shown.starts_with("Steve"));
        assert!(shown.contains(&id.to_string()));
    }

    #[test]
    fn test_unknown_identity() {
        let unknown = Identity::unknown();
        assert!(unknown.id.is_nil());
        assert_eq!(unknown.name, "Unknown");
    }
}
