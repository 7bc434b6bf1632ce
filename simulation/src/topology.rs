//! Star topology: one host with N clients on a loopback network

use std::collections::BTreeMap;
use std::sync::Arc;

use blueprint_core::{
    BlockPos, Identity, InMemoryArtifactStore, InMemoryIdentityProvider, InMemoryRegistry,
    InMemoryRenderer, Placement, PlacementOrigin, PlacementRegistry, RecordingNotifier, Severity,
};
use blueprint_protocol::{
    ClientConfig, Collaborators, HostConfig, LoopbackNetwork, Message, MessageKind, Node,
    ProtocolResult,
};
use uuid::Uuid;

/// In-memory collaborators of one participant
#[derive(Clone)]
pub struct Participant {
    pub name: String,
    pub registry: Arc<InMemoryRegistry>,
    pub store: InMemoryArtifactStore,
    pub renderer: Arc<InMemoryRenderer>,
    pub identities: Arc<InMemoryIdentityProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Participant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: Arc::new(InMemoryRegistry::new()),
            store: InMemoryArtifactStore::new(),
            renderer: Arc::new(InMemoryRenderer::new()),
            identities: Arc::new(InMemoryIdentityProvider::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    pub fn services(&self) -> Collaborators {
        Collaborators::new(
            self.registry.clone(),
            Arc::new(self.store.clone()),
            self.renderer.clone(),
            self.identities.clone(),
            self.notifier.clone(),
        )
    }

    /// Error notifications shown to this participant
    pub fn errors(&self) -> Vec<String> {
        self.notifier
            .received()
            .into_iter()
            .filter(|(severity, _)| *severity == Severity::Error)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn knows(&self, placement: &Placement) -> Option<Placement> {
        self.registry.get(&placement.id)
    }
}

/// A host and its clients sharing one loopback network
pub struct StarTopology {
    pub net: LoopbackNetwork,
    pub host: Participant,
    pub clients: Vec<Participant>,
}

impl StarTopology {
    pub fn new(config: &HostConfig) -> Self {
        let host = Participant::new("host");
        let net = LoopbackNetwork::new(config, host.services());
        Self {
            net,
            host,
            clients: Vec::new(),
        }
    }

    /// Connect a client named `player<index>`; the handshake runs on the next pump
    pub fn connect(&mut self, config: ClientConfig) -> ProtocolResult<usize> {
        let index = self.clients.len();
        let participant = Participant::new(format!("player{index}"));
        let config = config.with_identity(player(index));
        self.net.add_client(&config, participant.services())?;
        self.clients.push(participant);
        Ok(index)
    }

    /// Connect `count` default clients and run every handshake to completion
    pub fn with_clients(config: &HostConfig, count: usize) -> ProtocolResult<Self> {
        let mut star = Self::new(config);
        for _ in 0..count {
            star.connect(ClientConfig::default())?;
        }
        star.net.run_until_idle();
        Ok(star)
    }

    /// Store `bytes` on the host and publish a placement for them
    pub fn publish(&mut self, bytes: Vec<u8>, name: &str) -> ProtocolResult<Placement> {
        let checksum = self.host.store.insert(bytes);
        let placement = Placement::new(name, checksum, Identity::new(Uuid::nil(), "host"), spawn());
        self.net.host_mut().publish(placement.clone())?;
        Ok(placement)
    }

    /// Messages of `kind` delivered from `from`, in order
    pub fn sent(&self, from: Node, kind: MessageKind) -> Vec<Message> {
        self.net
            .frames()
            .iter()
            .filter(|f| f.from == from && f.kind() == Some(kind))
            .filter_map(|f| Message::decode(kind, &f.payload).ok())
            .collect()
    }

    /// Delivered protocol frames counted by message name
    pub fn traffic(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.net.frames().iter().filter_map(|f| f.kind()) {
            *counts.entry(kind.name().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Render the star as ASCII art
    pub fn visualize(&self) -> String {
        let mut out = String::from("          host\n");
        for (index, client) in self.clients.iter().enumerate() {
            let state = if !self.net.is_connected(index) {
                "disconnected"
            } else if self.net.client(index).is_started() {
                "started"
            } else {
                "handshaking"
            };
            out.push_str(&format!("            +-- {} ({state})\n", client.name));
        }
        out
    }
}

pub fn player(index: usize) -> Identity {
    Identity::new(Uuid::from_u128(0x1000 + index as u128), format!("player{index}"))
}

pub fn spawn() -> PlacementOrigin {
    PlacementOrigin::new(BlockPos::new(0, 64, 0), "minecraft:overworld")
}

/// Deterministic artifact content of `len` bytes, varied by `seed`
pub fn artifact(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| ((i % 251) as u8) ^ seed).collect()
}
