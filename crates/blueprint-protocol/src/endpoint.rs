//! Peer endpoints
//!
//! A [`PeerEndpoint`] represents one live connection as seen from this
//! process. It owns the negotiated [`FeatureSet`] for that peer and the
//! single outbound primitive: send one message to this peer.
//!
//! The exchanges open with a peer are tracked by the dispatcher, keyed by
//! the endpoint's [`PeerId`].

use std::sync::Arc;

use blueprint_core::{PeerId, TransportError};
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::debug::PacketLogger;
use crate::error::ProtocolResult;
use crate::feature::{Feature, FeatureSet};
use crate::message::Message;

/// Outbound half of the external transport
///
/// The transport owns framing, ordering and delivery. The protocol core only
/// hands it a channel identifier and an encoded payload.
pub trait Outbound: Send + Sync {
    fn send(&self, peer: PeerId, channel: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Tear down the connection to `peer`
    fn disconnect(&self, peer: PeerId, reason: &str);
}

/// How this process sees the far end of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerLink {
    /// We are a client; the far end is the host, known by its world/server name
    Host { server_name: String },
    /// We are the host; the far end is a client session
    Client { session: Uuid },
}

impl PeerLink {
    /// Stable identity string for the far end
    pub fn persistent_name(&self) -> String {
        match self {
            PeerLink::Host { server_name } => server_name.clone(),
            PeerLink::Client { session } => session.to_string(),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, PeerLink::Host { .. })
    }
}

/// One remote connection
pub struct PeerEndpoint {
    id: PeerId,
    link: PeerLink,
    persistent_name: String,
    features: Option<FeatureSet>,
    outbound: Arc<dyn Outbound>,
}

impl PeerEndpoint {
    pub fn new(id: PeerId, link: PeerLink, outbound: Arc<dyn Outbound>) -> Self {
        let persistent_name = link.persistent_name();
        Self {
            id,
            link,
            persistent_name,
            features: None,
            outbound,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn link(&self) -> &PeerLink {
        &self.link
    }

    /// Identity string used for quota accounting and logs
    pub fn persistent_name(&self) -> &str {
        &self.persistent_name
    }

    pub fn feature_set(&self) -> Option<&FeatureSet> {
        self.features.as_ref()
    }

    /// Attach the negotiated feature set
    ///
    /// A set is attached at most once per handshake; later attempts are
    /// ignored and return `false`.
    pub fn attach_features(&mut self, features: FeatureSet) -> bool {
        if self.features.is_some() {
            warn!(peer = %self.persistent_name, "feature set already attached");
            return false;
        }
        debug!(peer = %self.persistent_name, features = %features, "feature set attached");
        self.features = Some(features);
        true
    }

    /// Forget the negotiated features ahead of a fresh handshake
    pub fn clear_features(&mut self) {
        self.features = None;
    }

    /// Capability test; a peer without a negotiated set has no capabilities
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features
            .as_ref()
            .is_some_and(|fs| fs.has_feature(feature))
    }

    /// Encode and send a protocol message to this peer
    pub fn send(&self, message: &Message, packets: &PacketLogger) -> ProtocolResult<()> {
        let kind = message.kind();
        let payload = message.encode()?;
        packets.log_send(kind.identifier(), &self.persistent_name);
        self.outbound.send(self.id, kind.identifier(), payload)?;
        Ok(())
    }

    /// Send an already-encoded payload on an arbitrary channel
    pub fn send_raw(&self, channel: &str, payload: Bytes) -> ProtocolResult<()> {
        self.outbound.send(self.id, channel, payload)?;
        Ok(())
    }

    pub fn disconnect(&self, reason: &str) {
        self.outbound.disconnect(self.id, reason);
    }
}

impl std::fmt::Debug for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerEndpoint")
            .field("id", &self.id)
            .field("persistent_name", &self.persistent_name)
            .field("features", &self.features)
            .finish()
    }
}
