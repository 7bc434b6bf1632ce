//! # Blueprint Core
//!
//! Core types, collaborator traits, and errors shared by the blueprint
//! sync stack.
//!
//! The protocol crate never owns placement data or artifact bytes itself.
//! It reads and mutates them through the traits defined here, which the
//! embedding application implements. In-memory implementations are
//! provided for tests and simulation.
//!
//! ## Key Types
//!
//! - [`Placement`]: A registered artifact instance with position and metadata
//! - [`PlacementId`] / [`Checksum`]: Stable id and 128-bit content checksum
//! - [`Identity`]: A participant identity (id + display name)
//! - [`PeerId`]: Handle for one live connection
//!
//! ## Key Traits
//!
//! - [`PlacementRegistry`]: The shared placement registry
//! - [`ArtifactStore`]: Local artifact bytes (read handles, staging writes)
//! - [`Renderer`]: Visual placement of artifacts in the host environment
//! - [`IdentityProvider`]: Persistent identity records
//! - [`Notifier`]: User-facing notification sink

pub mod error;
pub mod identity;
pub mod memory;
pub mod placement;
pub mod traits;

pub use error::*;
pub use identity::*;
pub use memory::*;
pub use placement::*;
pub use traits::*;
