//! Placement records
//!
//! A [`Placement`] is one registered instance of a blueprint artifact: which
//! bytes (by [`Checksum`]), where they sit ([`PlacementOrigin`]), and who owns
//! and last touched them.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Identity;

/// Unique identifier for a placement
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("{_0}")]
pub struct PlacementId(pub Uuid);

impl PlacementId {
    /// Generate a random placement id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a raw 128-bit value
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Short display form (first 8 hex chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

/// 128-bit content checksum of an artifact's bytes
///
/// Computed as the first 16 bytes of the BLAKE3 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checksum(pub [u8; 16]);

impl Checksum {
    /// Compute the checksum of a complete byte sequence
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = ChecksumHasher::new();
        hasher.update(bytes);
        hasher.finalize()
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Full hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental checksum computation for chunked writes
#[derive(Debug, Clone, Default)]
pub struct ChecksumHasher {
    inner: blake3::Hasher,
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(&self) -> Checksum {
        let digest = self.inner.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest.as_bytes()[..16]);
        Checksum(out)
    }
}

/// Integer block position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Rotation applied to a placed artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Counterclockwise90,
}

/// Mirroring applied to a placed artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mirror {
    #[default]
    None,
    LeftRight,
    FrontBack,
}

/// Where a placement sits: position, named region, and orientation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementOrigin {
    /// Anchor position
    pub position: BlockPos,
    /// Named space the position refers to (world dimension / region)
    pub dimension: String,
    pub rotation: Rotation,
    pub mirror: Mirror,
}

impl PlacementOrigin {
    /// Create an origin with no rotation or mirroring
    pub fn new(position: BlockPos, dimension: impl Into<String>) -> Self {
        Self {
            position,
            dimension: dimension.into(),
            rotation: Rotation::None,
            mirror: Mirror::None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirror = mirror;
        self
    }
}

/// A registered artifact instance
///
/// The `downloaded` flag is local state and is not part of the wire record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub id: PlacementId,
    /// Checksum of the artifact bytes this placement refers to
    pub checksum: Checksum,
    /// Display name (usually the artifact's file name)
    pub name: String,
    pub owner: Identity,
    pub last_modified_by: Option<Identity>,
    pub origin: PlacementOrigin,
    #[serde(skip)]
    pub downloaded: bool,
}

impl Placement {
    /// Create a placement owned by `owner` with a fresh id
    pub fn new(
        name: impl Into<String>,
        checksum: Checksum,
        owner: Identity,
        origin: PlacementOrigin,
    ) -> Self {
        Self {
            id: PlacementId::generate(),
            checksum,
            name: name.into(),
            owner,
            last_modified_by: None,
            origin,
            downloaded: false,
        }
    }

    /// Override the generated id
    pub fn with_id(mut self, id: PlacementId) -> Self {
        self.id = id;
        self
    }
}
