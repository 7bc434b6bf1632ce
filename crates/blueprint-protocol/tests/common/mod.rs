//! Shared fixtures for the loopback integration tests

#![allow(dead_code)]

use std::sync::Arc;

use blueprint_core::{
    BlockPos, Identity, InMemoryArtifactStore, InMemoryIdentityProvider, InMemoryRegistry,
    InMemoryRenderer, Placement, PlacementOrigin, PlacementRegistry, RecordingNotifier, Severity,
};
use blueprint_protocol::{
    ClientConfig, Collaborators, Frame, HostConfig, LoopbackNetwork, Message, MessageKind, Node,
};
use uuid::Uuid;

/// Concrete in-memory collaborators of one participant
#[derive(Clone)]
pub struct Side {
    pub registry: Arc<InMemoryRegistry>,
    pub store: InMemoryArtifactStore,
    pub renderer: Arc<InMemoryRenderer>,
    pub identities: Arc<InMemoryIdentityProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Side {
    pub fn new() -> Self {
        Self {
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

    pub fn errors(&self) -> Vec<String> {
        self.notifier
            .received()
            .into_iter()
            .filter(|(severity, _)| *severity == Severity::Error)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn placement(&self, placement: &Placement) -> Option<Placement> {
        self.registry.get(&placement.id)
    }
}

/// A host and its clients on a loopback network
pub struct Star {
    pub net: LoopbackNetwork,
    pub host: Side,
    pub clients: Vec<Side>,
}

impl Star {
    pub fn new(config: HostConfig) -> Self {
        let host = Side::new();
        let net = LoopbackNetwork::new(&config, host.services());
        Self {
            net,
            host,
            clients: Vec::new(),
        }
    }

    /// Host with default settings and `clients` connected, started clients
    pub fn started(clients: usize) -> Self {
        let mut star = Self::new(HostConfig::default());
        for _ in 0..clients {
            star.add_client(ClientConfig::default());
        }
        star.net.run_until_idle();
        star
    }

    pub fn add_client(&mut self, config: ClientConfig) -> usize {
        let index = self.clients.len();
        let config = if config.local_identity == Identity::unknown() {
            config.with_identity(player(index))
        } else {
            config
        };
        let side = Side::new();
        self.net
            .add_client(&config, side.services())
            .expect("client connects");
        self.clients.push(side);
        index
    }

    /// Store `bytes` on the host and register a placement for them
    pub fn publish(&mut self, bytes: Vec<u8>, name: &str) -> Placement {
        let checksum = self.host.store.insert(bytes);
        let placement = Placement::new(name, checksum, player(99), origin());
        self.net
            .host_mut()
            .publish(placement.clone())
            .expect("placement published");
        placement
    }

    /// Messages of `kind` delivered from `from`, in order
    pub fn sent(&self, from: Node, kind: MessageKind) -> Vec<Message> {
        self.net
            .frames()
            .iter()
            .filter(|f| f.from == from && f.kind() == Some(kind))
            .map(decode)
            .collect()
    }

    /// Kinds of every protocol frame delivered, in order
    pub fn kinds(&self) -> Vec<MessageKind> {
        self.net.frames().iter().filter_map(Frame::kind).collect()
    }
}

pub fn decode(frame: &Frame) -> Message {
    let kind = frame.kind().expect("protocol frame");
    Message::decode(kind, &frame.payload).expect("frame decodes")
}

pub fn player(n: usize) -> Identity {
    Identity::new(Uuid::from_u128(0x1000 + n as u128), format!("player{n}"))
}

pub fn origin() -> PlacementOrigin {
    PlacementOrigin::new(BlockPos::new(10, 64, -3), "minecraft:overworld")
}

/// Deterministic artifact content of `len` bytes
pub fn artifact(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
