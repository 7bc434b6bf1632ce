//! Process-scoped protocol state
//!
//! [`ProtocolContext`] is the single mutation domain shared by a dispatcher
//! and the exchanges it drives: connected peers, the external collaborators,
//! the modify-lock table, and the quota ledger. It is only ever touched from
//! the dispatcher's serialized thread.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use blueprint_core::{
    ArtifactStore, Identity, IdentityProvider, Notifier, PeerId, Placement, PlacementRegistry,
    Renderer, Severity,
};
use tracing::{debug, warn};

use crate::config::{ClientConfig, HostConfig};
use crate::debug::PacketLogger;
use crate::endpoint::PeerEndpoint;
use crate::error::{ProtocolError, ProtocolResult};
use crate::exchange::ExchangeId;
use crate::feature::{Feature, FeatureSet, PROTOCOL_VERSION, VersionPolicy};
use crate::lock::ModifyLockTable;
use crate::message::{Message, ModifyUpdate, Notice};
use crate::quota::QuotaGuard;

/// Which end of the star this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Client,
}

/// External collaborators the protocol core reads and mutates through
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn PlacementRegistry>,
    pub store: Arc<dyn ArtifactStore>,
    pub renderer: Arc<dyn Renderer>,
    pub identities: Arc<dyn IdentityProvider>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    pub fn new(
        registry: Arc<dyn PlacementRegistry>,
        store: Arc<dyn ArtifactStore>,
        renderer: Arc<dyn Renderer>,
        identities: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            store,
            renderer,
            identities,
            notifier,
        }
    }
}

/// Shared state handed to every exchange step
pub struct ProtocolContext {
    pub role: Role,
    pub local_version: String,
    pub local_features: FeatureSet,
    pub version_policy: VersionPolicy,
    pub local_identity: Identity,
    pub peers: HashMap<PeerId, PeerEndpoint>,
    pub services: Collaborators,
    pub locks: ModifyLockTable,
    pub quota: QuotaGuard,
    pub packets: PacketLogger,
    /// Client only: the host's registry has been received
    pub started: bool,
    /// Host only: peers that completed the handshake and receive broadcasts
    pub confirmed: BTreeSet<PeerId>,
    next_exchange: u64,
}

impl ProtocolContext {
    /// Empty state for `role`: no peers, no locks, quota and packet logging off
    fn new(role: Role, services: Collaborators) -> Self {
        Self {
            role,
            local_version: PROTOCOL_VERSION.to_string(),
            local_features: FeatureSet::default(),
            version_policy: VersionPolicy::default(),
            local_identity: Identity::unknown(),
            peers: HashMap::new(),
            services,
            locks: ModifyLockTable::new(),
            quota: QuotaGuard::disabled(),
            packets: PacketLogger::default(),
            started: false,
            confirmed: BTreeSet::new(),
            next_exchange: 0,
        }
    }

    /// Host context; the only place an enabled quota guard is built
    pub fn for_host(config: &HostConfig, services: Collaborators) -> Self {
        Self {
            local_version: config.version.clone(),
            local_features: config.features.clone(),
            version_policy: config.version_policy.clone(),
            quota: QuotaGuard::from_config(&config.protocol.quota),
            packets: PacketLogger::new(config.protocol.debug.packet_logging),
            ..Self::new(Role::Host, services)
        }
    }

    pub fn for_client(config: &ClientConfig, services: Collaborators) -> Self {
        Self {
            local_version: config.version.clone(),
            local_features: config.features.clone(),
            version_policy: config.version_policy.clone(),
            local_identity: config.local_identity.clone(),
            packets: PacketLogger::new(config.protocol.debug.packet_logging),
            ..Self::new(Role::Client, services)
        }
    }

    pub fn next_exchange_id(&mut self) -> ExchangeId {
        self.next_exchange += 1;
        ExchangeId(self.next_exchange)
    }

    pub fn peer(&self, peer: PeerId) -> ProtocolResult<&PeerEndpoint> {
        self.peers.get(&peer).ok_or(ProtocolError::UnknownPeer(peer))
    }

    pub fn peer_mut(&mut self, peer: PeerId) -> ProtocolResult<&mut PeerEndpoint> {
        self.peers
            .get_mut(&peer)
            .ok_or(ProtocolError::UnknownPeer(peer))
    }

    /// Persistent identity string of a peer, used for quota and logs
    pub fn peer_name(&self, peer: PeerId) -> String {
        self.peers
            .get(&peer)
            .map(|p| p.persistent_name().to_string())
            .unwrap_or_else(|| peer.to_string())
    }

    pub fn has_feature(&self, peer: PeerId, feature: Feature) -> bool {
        self.peers
            .get(&peer)
            .is_some_and(|p| p.has_feature(feature))
    }

    pub fn send(&self, peer: PeerId, message: &Message) -> ProtocolResult<()> {
        self.peer(peer)?.send(message, &self.packets)
    }

    /// Send to every confirmed peer; individual send failures are logged
    pub fn broadcast(&self, message: &Message) {
        for peer in &self.confirmed {
            if let Err(e) = self.send(*peer, message) {
                warn!(%peer, kind = %message.kind(), error = %e, "broadcast send failed");
            }
        }
    }

    /// Republish a changed origin to every confirmed peer that can apply it
    pub fn broadcast_modify(&self, placement: &Placement) {
        for peer in &self.confirmed {
            if !self.has_feature(*peer, Feature::Modify) {
                continue;
            }
            let last_modified_by = if self.has_feature(*peer, Feature::CoreEx) {
                placement.last_modified_by.clone()
            } else {
                None
            };
            let update = Message::Modify(ModifyUpdate {
                placement: placement.id,
                origin: placement.origin.clone(),
                last_modified_by,
            });
            if let Err(e) = self.send(*peer, &update) {
                warn!(%peer, placement = %placement.id, error = %e, "modify republish failed");
            }
        }
    }

    /// Send a user-facing notification to a peer that understands them
    pub fn notify_peer(&self, peer: PeerId, severity: Severity, text: &str) {
        if !self.has_feature(peer, Feature::Message) {
            debug!(%peer, "peer lacks MESSAGE, notification dropped");
            return;
        }
        if let Err(e) = self.send(peer, &Message::Notice(Notice::new(severity, text))) {
            warn!(%peer, error = %e, "notification send failed");
        }
    }

    /// Ask the transport to drop a connection
    pub fn disconnect(&self, peer: PeerId, reason: &str) {
        match self.peers.get(&peer) {
            Some(endpoint) => endpoint.disconnect(reason),
            None => warn!(%peer, "disconnect requested for unknown peer"),
        }
    }
}

impl std::fmt::Debug for ProtocolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolContext")
            .field("role", &self.role)
            .field("local_version", &self.local_version)
            .field("peers", &self.peers.len())
            .field("locks", &self.locks)
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use blueprint_core::{
        InMemoryArtifactStore, InMemoryIdentityProvider, InMemoryRegistry, InMemoryRenderer,
        RecordingNotifier,
    };
    use uuid::Uuid;

    use super::*;
    use crate::config::{DebugConfig, ProtocolConfig, QuotaConfig};

    fn services() -> Collaborators {
        Collaborators::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(InMemoryRenderer::new()),
            Arc::new(InMemoryIdentityProvider::new()),
            Arc::new(RecordingNotifier::new()),
        )
    }

    fn strict() -> ProtocolConfig {
        ProtocolConfig {
            quota: QuotaConfig {
                enabled: true,
                limit: 1_000,
            },
            debug: DebugConfig {
                packet_logging: true,
            },
        }
    }

    #[test]
    fn test_host_context_takes_config() {
        let config = HostConfig::default()
            .with_version("0.2.0")
            .with_protocol(strict());
        let cx = ProtocolContext::for_host(&config, services());

        assert_eq!(cx.role, Role::Host);
        assert_eq!(cx.local_version, "0.2.0");
        assert_eq!(cx.local_features, config.features);
        assert!(cx.quota.is_enabled());
        assert_eq!(cx.quota.limit(), 1_000);
        assert!(cx.packets.is_enabled());
        assert!(cx.peers.is_empty());
        assert!(!cx.started);
    }

    #[test]
    fn test_client_context_never_enforces_quota() {
        let identity = Identity::new(Uuid::from_u128(9), "builder");
        let config = ClientConfig::default()
            .with_identity(identity.clone())
            .with_protocol(strict());
        let mut cx = ProtocolContext::for_client(&config, services());

        assert_eq!(cx.role, Role::Client);
        assert_eq!(cx.local_identity, identity);
        assert!(!cx.quota.is_enabled());
        assert!(cx.packets.is_enabled());
        assert_eq!(cx.next_exchange_id(), ExchangeId(1));
        assert_eq!(cx.next_exchange_id(), ExchangeId(2));
    }
}
