//! Collaborator interfaces consumed by the protocol core
//!
//! The protocol never stores placements or artifact bytes itself. Every
//! read and write goes through one of these traits so that no exchange can
//! hold a private copy that diverges from the application's state.
//!
//! All methods take `&self`: implementations use interior mutability and are
//! shared as `Arc<dyn Trait>` between the dispatcher and its exchanges.

use std::io::Read;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RegistryError, StoreError};
use crate::identity::Identity;
use crate::placement::{Checksum, Placement, PlacementId};

/// The shared placement registry
pub trait PlacementRegistry: Send + Sync {
    /// Register a new placement
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the id is already registered.
    fn add(&self, placement: Placement) -> Result<(), RegistryError>;

    /// Remove a placement, returning it if it was registered
    fn remove(&self, id: &PlacementId) -> Option<Placement>;

    /// Look up a placement by id
    fn get(&self, id: &PlacementId) -> Option<Placement>;

    /// Replace the stored record for an existing placement
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the id is not registered.
    fn update(&self, placement: Placement) -> Result<(), RegistryError>;

    /// All registered placements
    fn list(&self) -> Vec<Placement>;

    /// Drop every registered placement
    fn clear(&self);

    fn contains(&self, id: &PlacementId) -> bool {
        self.get(id).is_some()
    }
}

/// Whether the artifact bytes for a placement are available locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Absent,
    Present,
}

impl LocalState {
    pub fn is_present(&self) -> bool {
        matches!(self, LocalState::Present)
    }
}

/// Local artifact byte storage
pub trait ArtifactStore: Send + Sync {
    /// Whether the bytes referenced by `placement` are stored locally
    fn local_state(&self, placement: &Placement) -> LocalState;

    /// Open a read handle on the artifact bytes
    fn open_read(&self, placement: &Placement) -> Result<Box<dyn Read + Send>, StoreError>;

    /// Create a staging sink that becomes the artifact on commit
    fn create_write(&self, placement: &Placement) -> Result<Box<dyn ArtifactSink>, StoreError>;
}

/// Staging target for an artifact being received
///
/// Exactly one of [`commit`](ArtifactSink::commit) or
/// [`discard`](ArtifactSink::discard) ends the sink's life.
pub trait ArtifactSink: Send {
    /// Append received bytes
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Make the staged bytes the stored artifact, returning their checksum
    fn commit(self: Box<Self>) -> Result<Checksum, StoreError>;

    /// Drop the staged bytes
    fn discard(self: Box<Self>);
}

/// Visual placement of artifacts in the host environment
pub trait Renderer: Send + Sync {
    fn render(&self, placement: &Placement);

    fn unrender(&self, placement: &Placement);

    fn is_rendered(&self, id: &PlacementId) -> bool;

    /// Commit any load that was deferred until the registry was bootstrapped
    fn commit_pending_load(&self) {}

    /// Re-render a placement whose origin changed
    fn update_rendered(&self, placement: &Placement) {
        if self.is_rendered(&placement.id) {
            self.unrender(placement);
            self.render(placement);
        }
    }
}

/// Persistent identity records
pub trait IdentityProvider: Send + Sync {
    /// Return the identity for `id`, creating it on first sight and refreshing
    /// the stored display name otherwise
    fn create_or_get(&self, id: Uuid, name: &str) -> Identity;

    fn get(&self, id: &Uuid) -> Option<Identity>;
}

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Wire tag for this severity
    pub fn tag(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Success => "SUCCESS",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }

    /// Parse a wire tag; unknown tags degrade to [`Severity::Info`]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "SUCCESS" => Severity::Success,
            "WARNING" => Severity::Warning,
            "ERROR" => Severity::Error,
            _ => Severity::Info,
        }
    }
}

/// User-facing notification sink (screen messages, toasts, chat)
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, text: &str);
}
