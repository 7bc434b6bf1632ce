//! In-memory collaborator implementations
//!
//! These back the protocol in tests and in the simulation binary. They are
//! safe to share across tasks but make no attempt at persistence.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{RegistryError, StoreError};
use crate::identity::Identity;
use crate::placement::{Checksum, ChecksumHasher, Placement, PlacementId};
use crate::traits::{
    ArtifactSink, ArtifactStore, IdentityProvider, LocalState, Notifier, PlacementRegistry,
    Renderer, Severity,
};

/// In-memory placement registry
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    placements: DashMap<PlacementId, Placement>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}

impl PlacementRegistry for InMemoryRegistry {
    fn add(&self, placement: Placement) -> Result<(), RegistryError> {
        let id = placement.id;
        if self.placements.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        self.placements.insert(id, placement);
        trace!(placement = %id, "placement registered");
        Ok(())
    }

    fn remove(&self, id: &PlacementId) -> Option<Placement> {
        self.placements.remove(id).map(|(_, p)| p)
    }

    fn get(&self, id: &PlacementId) -> Option<Placement> {
        self.placements.get(id).map(|entry| entry.value().clone())
    }

    fn update(&self, placement: Placement) -> Result<(), RegistryError> {
        match self.placements.get_mut(&placement.id) {
            Some(mut entry) => {
                *entry = placement;
                Ok(())
            }
            None => Err(RegistryError::NotFound(placement.id)),
        }
    }

    fn list(&self) -> Vec<Placement> {
        let mut all: Vec<Placement> = self
            .placements
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|p| p.id);
        all
    }

    fn clear(&self) {
        self.placements.clear();
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    artifacts: DashMap<Checksum, Arc<Vec<u8>>>,
    staging: DashMap<PlacementId, ()>,
    /// Reads of these artifacts fail after the given number of bytes
    poisoned: DashMap<Checksum, usize>,
    /// Commits of these placements store altered bytes
    corrupted: DashMap<PlacementId, ()>,
}

/// In-memory artifact store keyed by checksum
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    inner: Arc<StoreInner>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store artifact bytes and return their checksum
    pub fn insert(&self, bytes: Vec<u8>) -> Checksum {
        let checksum = Checksum::of(&bytes);
        self.inner.artifacts.insert(checksum, Arc::new(bytes));
        checksum
    }

    /// Get a copy of stored artifact bytes
    pub fn bytes(&self, checksum: &Checksum) -> Option<Vec<u8>> {
        self.inner
            .artifacts
            .get(checksum)
            .map(|entry| entry.value().as_ref().clone())
    }

    /// Make reads of `checksum` fail once `after` bytes have been returned
    pub fn poison_reads(&self, checksum: Checksum, after: usize) {
        self.inner.poisoned.insert(checksum, after);
    }

    /// Make the next commit for `placement` store bytes differing from those written
    pub fn corrupt_commit(&self, placement: PlacementId) {
        self.inner.corrupted.insert(placement, ());
    }

    /// Number of sinks currently staging
    pub fn staging_count(&self) -> usize {
        self.inner.staging.len()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn local_state(&self, placement: &Placement) -> LocalState {
        if self.inner.artifacts.contains_key(&placement.checksum) {
            LocalState::Present
        } else {
            LocalState::Absent
        }
    }

    fn open_read(&self, placement: &Placement) -> Result<Box<dyn Read + Send>, StoreError> {
        let data = self
            .inner
            .artifacts
            .get(&placement.checksum)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::NotFound(placement.id))?;
        let fail_after = self.inner.poisoned.get(&placement.checksum).map(|e| *e);
        Ok(Box::new(MemoryReader {
            data,
            pos: 0,
            fail_after,
        }))
    }

    fn create_write(&self, placement: &Placement) -> Result<Box<dyn ArtifactSink>, StoreError> {
        if self.inner.staging.insert(placement.id, ()).is_some() {
            return Err(StoreError::AlreadyStaging(placement.id));
        }
        debug!(placement = %placement.id, "staging artifact");
        Ok(Box::new(MemorySink {
            store: Arc::clone(&self.inner),
            placement: placement.id,
            buffer: Vec::new(),
            hasher: ChecksumHasher::new(),
        }))
    }
}

struct MemoryReader {
    data: Arc<Vec<u8>>,
    pos: usize,
    fail_after: Option<usize>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(limit) = self.fail_after {
            if self.pos >= limit {
                return Err(io::Error::other("artifact read failed"));
            }
        }
        let mut end = (self.pos + buf.len()).min(self.data.len());
        if let Some(limit) = self.fail_after {
            end = end.min(limit.max(self.pos));
        }
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(n)
    }
}

struct MemorySink {
    store: Arc<StoreInner>,
    placement: PlacementId,
    buffer: Vec<u8>,
    hasher: ChecksumHasher,
}

impl ArtifactSink for MemorySink {
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.hasher.update(bytes);
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<Checksum, StoreError> {
        let checksum = if self.store.corrupted.remove(&self.placement).is_some() {
            match self.buffer.first_mut() {
                Some(first) => *first ^= 0xff,
                None => self.buffer.push(0xff),
            }
            Checksum::of(&self.buffer)
        } else {
            self.hasher.finalize()
        };
        self.store.staging.remove(&self.placement);
        self.store.artifacts.insert(checksum, Arc::new(self.buffer));
        debug!(placement = %self.placement, %checksum, "artifact committed");
        Ok(checksum)
    }

    fn discard(self: Box<Self>) {
        self.store.staging.remove(&self.placement);
        debug!(placement = %self.placement, "staged artifact discarded");
    }
}

/// Renderer that records what is currently shown
#[derive(Debug, Default)]
pub struct InMemoryRenderer {
    rendered: DashMap<PlacementId, Placement>,
    pending_loads_committed: AtomicUsize,
}

impl InMemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self, id: &PlacementId) -> Option<Placement> {
        self.rendered.get(id).map(|entry| entry.value().clone())
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered.len()
    }

    /// How many times the deferred load was committed
    pub fn load_commits(&self) -> usize {
        self.pending_loads_committed.load(Ordering::SeqCst)
    }
}

impl Renderer for InMemoryRenderer {
    fn render(&self, placement: &Placement) {
        self.rendered.insert(placement.id, placement.clone());
    }

    fn unrender(&self, placement: &Placement) {
        self.rendered.remove(&placement.id);
    }

    fn is_rendered(&self, id: &PlacementId) -> bool {
        self.rendered.contains_key(id)
    }

    fn commit_pending_load(&self) {
        self.pending_loads_committed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Identity records kept in memory
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    identities: DashMap<Uuid, Identity>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn create_or_get(&self, id: Uuid, name: &str) -> Identity {
        let mut entry = self
            .identities
            .entry(id)
            .or_insert_with(|| Identity::new(id, name));
        if entry.name != name {
            entry.name = name.to_string();
        }
        entry.value().clone()
    }

    fn get(&self, id: &Uuid) -> Option<Identity> {
        self.identities.get(id).map(|entry| entry.value().clone())
    }
}

/// Notifier that keeps every notification it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<(Severity, String)> {
        self.received.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, severity: Severity, text: &str) {
        self.received.lock().push((severity, text.to_string()));
    }
}
