//! In-process star network for tests and simulation
//!
//! Connects one [`HostDispatcher`] to any number of [`ClientDispatcher`]s
//! through a shared FIFO queue. Frames are delivered one at a time in send
//! order, which gives the same per-connection ordering a real transport
//! provides and a deterministic global order on top.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut net = LoopbackNetwork::new(&HostConfig::default(), host_services);
//! let alice = net.add_client(&ClientConfig::default(), alice_services)?;
//! net.run_until_idle();
//! assert!(net.client(alice).is_started());
//! ```
//!
//! The host sees client `i` as `PeerId(i + 1)`; every client sees the host
//! as `PeerId(0)`.

use std::collections::VecDeque;
use std::sync::Arc;

use blueprint_core::{PeerId, TransportError};
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::{ClientConfig, HostConfig};
use crate::context::Collaborators;
use crate::dispatcher::{ClientDispatcher, HostDispatcher};
use crate::endpoint::{Outbound, PeerLink};
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::MessageKind;

/// Peer id under which every client knows the host
pub const HOST_PEER: PeerId = PeerId(0);

/// Safety net against message loops in [`LoopbackNetwork::run_until_idle`]
const MAX_STEPS: usize = 1_000_000;

/// A participant in the loopback star
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Host,
    Client(usize),
}

/// One delivered frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub from: Node,
    pub to: Node,
    pub channel: String,
    pub payload: Bytes,
}

impl Frame {
    /// Protocol message kind carried by this frame, if any
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_identifier(&self.channel)
    }
}

enum Event {
    Deliver(Frame),
    Disconnect(usize),
}

/// Host-side peer id of client `index`
pub fn client_peer(index: usize) -> PeerId {
    PeerId::new(index as u64 + 1)
}

fn client_index(peer: PeerId) -> Option<usize> {
    (peer.raw() as usize).checked_sub(1)
}

struct LoopbackOutbound {
    node: Node,
    queue: Arc<Mutex<VecDeque<Event>>>,
}

impl Outbound for LoopbackOutbound {
    fn send(&self, peer: PeerId, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        let to = match self.node {
            Node::Host => Node::Client(
                client_index(peer).ok_or(TransportError::PeerNotConnected(peer))?,
            ),
            Node::Client(_) => Node::Host,
        };
        self.queue.lock().push_back(Event::Deliver(Frame {
            from: self.node,
            to,
            channel: channel.to_string(),
            payload,
        }));
        Ok(())
    }

    fn disconnect(&self, peer: PeerId, reason: &str) {
        let index = match self.node {
            Node::Host => client_index(peer),
            Node::Client(index) => Some(index),
        };
        if let Some(index) = index {
            debug!(client = index, reason, "disconnect requested");
            self.queue.lock().push_back(Event::Disconnect(index));
        }
    }
}

struct ClientSlot {
    dispatcher: ClientDispatcher,
    connected: bool,
}

/// One host and its clients wired through an in-memory queue
pub struct LoopbackNetwork {
    host: HostDispatcher,
    clients: Vec<ClientSlot>,
    queue: Arc<Mutex<VecDeque<Event>>>,
    frames: Vec<Frame>,
    errors: Vec<(Node, ProtocolError)>,
}

impl LoopbackNetwork {
    pub fn new(config: &HostConfig, services: Collaborators) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let outbound = Arc::new(LoopbackOutbound {
            node: Node::Host,
            queue: queue.clone(),
        });
        Self {
            host: HostDispatcher::new(config, services, outbound),
            clients: Vec::new(),
            queue,
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Connect a new client; the handshake runs on the next pump
    pub fn add_client(
        &mut self,
        config: &ClientConfig,
        services: Collaborators,
    ) -> ProtocolResult<usize> {
        let index = self.clients.len();
        let outbound = Arc::new(LoopbackOutbound {
            node: Node::Client(index),
            queue: self.queue.clone(),
        });
        let mut dispatcher = ClientDispatcher::new(config, services, outbound);
        dispatcher.on_connect(
            HOST_PEER,
            PeerLink::Host {
                server_name: config.server_name.clone(),
            },
        )?;
        self.clients.push(ClientSlot {
            dispatcher,
            connected: true,
        });

        let session = Uuid::from_u128(index as u128 + 1);
        self.host
            .on_connect(client_peer(index), PeerLink::Client { session })?;
        Ok(index)
    }

    pub fn host(&self) -> &HostDispatcher {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HostDispatcher {
        &mut self.host
    }

    /// # Panics
    ///
    /// Panics if `index` was not returned by [`LoopbackNetwork::add_client`].
    pub fn client(&self, index: usize) -> &ClientDispatcher {
        &self.clients[index].dispatcher
    }

    /// # Panics
    ///
    /// Panics if `index` was not returned by [`LoopbackNetwork::add_client`].
    pub fn client_mut(&mut self, index: usize) -> &mut ClientDispatcher {
        &mut self.clients[index].dispatcher
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.clients.get(index).is_some_and(|c| c.connected)
    }

    /// Every frame delivered so far, in delivery order
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    /// Errors returned by dispatchers while handling delivered frames
    pub fn errors(&self) -> &[(Node, ProtocolError)] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<(Node, ProtocolError)> {
        std::mem::take(&mut self.errors)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queue a raw frame from a client to the host
    pub fn inject_to_host(&mut self, client: usize, channel: &str, payload: Bytes) {
        self.queue.lock().push_back(Event::Deliver(Frame {
            from: Node::Client(client),
            to: Node::Host,
            channel: channel.to_string(),
            payload,
        }));
    }

    /// Queue a raw frame from the host to a client
    pub fn inject_to_client(&mut self, client: usize, channel: &str, payload: Bytes) {
        self.queue.lock().push_back(Event::Deliver(Frame {
            from: Node::Host,
            to: Node::Client(client),
            channel: channel.to_string(),
            payload,
        }));
    }

    /// Drop a client's connection as the transport would
    pub fn drop_client(&mut self, index: usize) {
        self.queue.lock().push_back(Event::Disconnect(index));
    }

    /// Deliver one queued event; returns `false` when the queue is empty
    pub fn step(&mut self) -> bool {
        let event = self.queue.lock().pop_front();
        match event {
            Some(Event::Deliver(frame)) => {
                self.deliver(frame);
                true
            }
            Some(Event::Disconnect(index)) => {
                self.disconnect(index);
                true
            }
            None => false,
        }
    }

    /// Deliver until the queue is empty; returns the number of events handled
    pub fn run_until_idle(&mut self) -> usize {
        let mut steps = 0;
        while steps < MAX_STEPS && self.step() {
            steps += 1;
        }
        steps
    }

    fn deliver(&mut self, frame: Frame) {
        let result = match frame.to {
            Node::Host => {
                let Node::Client(index) = frame.from else {
                    return;
                };
                if !self.is_connected(index) {
                    trace!(client = index, "frame from disconnected client dropped");
                    return;
                }
                self.host
                    .on_message(client_peer(index), &frame.channel, &frame.payload)
            }
            Node::Client(index) => {
                let Some(slot) = self.clients.get_mut(index).filter(|c| c.connected) else {
                    trace!(client = index, "frame to disconnected client dropped");
                    return;
                };
                slot.dispatcher
                    .on_message(HOST_PEER, &frame.channel, &frame.payload)
            }
        };
        if let Err(e) = result {
            debug!(to = ?frame.to, channel = %frame.channel, error = %e, "frame handling failed");
            self.errors.push((frame.to, e));
        }
        self.frames.push(frame);
    }

    fn disconnect(&mut self, index: usize) {
        let Some(slot) = self.clients.get_mut(index).filter(|c| c.connected) else {
            return;
        };
        slot.connected = false;
        slot.dispatcher.on_disconnect(HOST_PEER);
        self.host.on_disconnect(client_peer(index));
    }
}
