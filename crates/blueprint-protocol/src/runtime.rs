//! Serialized dispatcher runtime
//!
//! All protocol state lives on one tokio task. Transport callbacks and
//! application calls reach it only through an mpsc mailbox, so exchange
//! steps, lock-table changes and quota updates never run concurrently.
//! Outbound traffic leaves through a second channel of [`OutboundEvent`]s
//! that the transport drains.

use blueprint_core::{PeerId, TransportError};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dispatcher::{ClientDispatcher, HostDispatcher};
use crate::endpoint::{Outbound, PeerLink};
use crate::error::{ProtocolError, ProtocolResult};

/// The three transport callbacks a dispatcher reacts to
pub trait Dispatch: Send + 'static {
    fn on_connect(&mut self, peer: PeerId, link: PeerLink) -> ProtocolResult<()>;

    fn on_message(&mut self, peer: PeerId, channel: &str, payload: &[u8]) -> ProtocolResult<()>;

    fn on_disconnect(&mut self, peer: PeerId);
}

impl Dispatch for HostDispatcher {
    fn on_connect(&mut self, peer: PeerId, link: PeerLink) -> ProtocolResult<()> {
        HostDispatcher::on_connect(self, peer, link)
    }

    fn on_message(&mut self, peer: PeerId, channel: &str, payload: &[u8]) -> ProtocolResult<()> {
        HostDispatcher::on_message(self, peer, channel, payload)
    }

    fn on_disconnect(&mut self, peer: PeerId) {
        HostDispatcher::on_disconnect(self, peer)
    }
}

impl Dispatch for ClientDispatcher {
    fn on_connect(&mut self, peer: PeerId, link: PeerLink) -> ProtocolResult<()> {
        ClientDispatcher::on_connect(self, peer, link)
    }

    fn on_message(&mut self, peer: PeerId, channel: &str, payload: &[u8]) -> ProtocolResult<()> {
        ClientDispatcher::on_message(self, peer, channel, payload)
    }

    fn on_disconnect(&mut self, peer: PeerId) {
        ClientDispatcher::on_disconnect(self, peer)
    }
}

/// Transport-originated event
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Connected {
        peer: PeerId,
        link: PeerLink,
    },
    Message {
        peer: PeerId,
        channel: String,
        payload: Bytes,
    },
    Disconnected {
        peer: PeerId,
    },
}

/// Work the transport must carry out for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Send {
        peer: PeerId,
        channel: String,
        payload: Bytes,
    },
    Disconnect {
        peer: PeerId,
        reason: String,
    },
}

/// [`Outbound`] that forwards into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelOutbound {
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl ChannelOutbound {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Outbound for ChannelOutbound {
    fn send(&self, peer: PeerId, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(OutboundEvent::Send {
                peer,
                channel: channel.to_string(),
                payload,
            })
            .map_err(|_| TransportError::SendFailed("outbound channel closed".into()))
    }

    fn disconnect(&self, peer: PeerId, reason: &str) {
        if self
            .tx
            .send(OutboundEvent::Disconnect {
                peer,
                reason: reason.to_string(),
            })
            .is_err()
        {
            warn!(%peer, "outbound channel closed, disconnect dropped");
        }
    }
}

type Call<D> = Box<dyn FnOnce(&mut D) + Send>;

enum Command<D> {
    Event {
        event: InboundEvent,
        reply: Option<oneshot::Sender<ProtocolResult<()>>>,
    },
    Call(Call<D>),
    Shutdown,
}

/// Owns a dispatcher on a dedicated task
pub struct DispatcherRuntime<D: Dispatch> {
    handle: RuntimeHandle<D>,
    task: JoinHandle<D>,
}

impl<D: Dispatch> DispatcherRuntime<D> {
    /// Move `dispatcher` onto a new task
    pub fn spawn(dispatcher: D) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(dispatcher, rx));
        Self {
            handle: RuntimeHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> RuntimeHandle<D> {
        self.handle.clone()
    }

    /// Stop after the queued work drains and hand the dispatcher back
    pub async fn shutdown(self) -> ProtocolResult<D> {
        // the task may already be gone; joining reports that
        let _ = self.handle.tx.send(Command::Shutdown);
        self.task.await.map_err(|_| ProtocolError::RuntimeClosed)
    }
}

/// Cloneable mailbox address of a running dispatcher
pub struct RuntimeHandle<D> {
    tx: mpsc::UnboundedSender<Command<D>>,
}

impl<D> Clone for RuntimeHandle<D> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<D: Dispatch> RuntimeHandle<D> {
    /// Queue an event without waiting; handling errors are logged
    pub fn submit(&self, event: InboundEvent) -> ProtocolResult<()> {
        self.tx
            .send(Command::Event { event, reply: None })
            .map_err(|_| ProtocolError::RuntimeClosed)
    }

    /// Queue an event and wait for the dispatcher's verdict
    pub async fn deliver(&self, event: InboundEvent) -> ProtocolResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Event {
                event,
                reply: Some(reply),
            })
            .map_err(|_| ProtocolError::RuntimeClosed)?;
        rx.await.map_err(|_| ProtocolError::RuntimeClosed)?
    }

    /// Run `f` against the dispatcher on its own task
    pub async fn call<R, F>(&self, f: F) -> ProtocolResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut D) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let call: Call<D> = Box::new(move |dispatcher| {
            let _ = reply.send(f(dispatcher));
        });
        self.tx
            .send(Command::Call(call))
            .map_err(|_| ProtocolError::RuntimeClosed)?;
        rx.await.map_err(|_| ProtocolError::RuntimeClosed)
    }
}

async fn run<D: Dispatch>(mut dispatcher: D, mut rx: mpsc::UnboundedReceiver<Command<D>>) -> D {
    debug!("dispatcher runtime started");
    while let Some(command) = rx.recv().await {
        match command {
            Command::Event { event, reply } => {
                let result = apply(&mut dispatcher, event);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, "inbound event failed");
                        }
                    }
                }
            }
            Command::Call(call) => call(&mut dispatcher),
            Command::Shutdown => break,
        }
    }
    debug!("dispatcher runtime stopped");
    dispatcher
}

fn apply<D: Dispatch>(dispatcher: &mut D, event: InboundEvent) -> ProtocolResult<()> {
    match event {
        InboundEvent::Connected { peer, link } => dispatcher.on_connect(peer, link),
        InboundEvent::Message {
            peer,
            channel,
            payload,
        } => dispatcher.on_message(peer, &channel, &payload),
        InboundEvent::Disconnected { peer } => {
            dispatcher.on_disconnect(peer);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blueprint_core::{
        InMemoryArtifactStore, InMemoryIdentityProvider, InMemoryRegistry, InMemoryRenderer,
        RecordingNotifier,
    };
    use uuid::Uuid;

    use super::*;
    use crate::config::HostConfig;
    use crate::context::Collaborators;
    use crate::message::{Message, MessageKind};

    fn services() -> Collaborators {
        Collaborators::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(InMemoryRenderer::new()),
            Arc::new(InMemoryIdentityProvider::new()),
            Arc::new(RecordingNotifier::new()),
        )
    }

    #[tokio::test]
    async fn test_connect_sends_version_through_outbound() {
        let (outbound, mut out_rx) = ChannelOutbound::new();
        let host = HostDispatcher::new(&HostConfig::default(), services(), Arc::new(outbound));
        let runtime = DispatcherRuntime::spawn(host);
        let handle = runtime.handle();

        handle
            .deliver(InboundEvent::Connected {
                peer: PeerId::new(1),
                link: PeerLink::Client {
                    session: Uuid::from_u128(1),
                },
            })
            .await
            .unwrap();

        let Some(OutboundEvent::Send {
            peer,
            channel,
            payload,
        }) = out_rx.recv().await
        else {
            panic!("expected a send");
        };
        assert_eq!(peer, PeerId::new(1));
        assert_eq!(channel, MessageKind::RegisterVersion.identifier());
        let message = Message::decode(MessageKind::RegisterVersion, &payload).unwrap();
        assert_eq!(message, Message::RegisterVersion("0.3.2".into()));

        let peers = handle.call(|host| host.context().peers.len()).await.unwrap();
        assert_eq!(peers, 1);

        let host = runtime.shutdown().await.unwrap();
        assert_eq!(host.exchanges().open_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_version_requests_disconnect() {
        let (outbound, mut out_rx) = ChannelOutbound::new();
        let host = HostDispatcher::new(&HostConfig::default(), services(), Arc::new(outbound));
        let runtime = DispatcherRuntime::spawn(host);
        let handle = runtime.handle();
        let peer = PeerId::new(3);

        handle
            .submit(InboundEvent::Connected {
                peer,
                link: PeerLink::Client {
                    session: Uuid::from_u128(3),
                },
            })
            .unwrap();
        let payload = Message::RegisterVersion("0.0.1".into()).encode().unwrap();
        let result = handle
            .deliver(InboundEvent::Message {
                peer,
                channel: MessageKind::RegisterVersion.identifier().to_string(),
                payload,
            })
            .await;
        assert!(matches!(result, Err(ProtocolError::VersionRejected { .. })));

        // version announcement, then the disconnect request
        assert!(matches!(out_rx.recv().await, Some(OutboundEvent::Send { .. })));
        assert!(matches!(
            out_rx.recv().await,
            Some(OutboundEvent::Disconnect { peer: p, .. }) if p == peer
        ));
        tokio_test::assert_ok!(runtime.shutdown().await);
    }

    #[tokio::test]
    async fn test_handle_after_shutdown_is_closed() {
        let (outbound, _out_rx) = ChannelOutbound::new();
        let host = HostDispatcher::new(&HostConfig::default(), services(), Arc::new(outbound));
        let runtime = DispatcherRuntime::spawn(host);
        let handle = runtime.handle();
        runtime.shutdown().await.unwrap();

        let result = handle.call(|host| host.context().peers.len()).await;
        assert!(matches!(result, Err(ProtocolError::RuntimeClosed)));
    }
}
