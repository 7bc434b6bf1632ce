use std::sync::Arc;

use blueprint_core::{PeerId, Placement, PlacementId, Severity};
use tracing::{debug, info, trace, warn};

use super::{ExchangeSet, Routed, answer_feature_request, ingest, serve_download};
use crate::channel::ChannelNegotiator;
use crate::config::HostConfig;
use crate::context::{Collaborators, ProtocolContext};
use crate::endpoint::{Outbound, PeerEndpoint, PeerLink};
use crate::error::{ProtocolError, ProtocolResult};
use crate::exchange::{
    DownloadExchange, Exchange, ExchangeKind, HandshakeServer, ModifyExchangeServer,
};
use crate::message::Message;

/// Authoritative side of the star: owns the registry and the modify locks
pub struct HostDispatcher {
    cx: ProtocolContext,
    exchanges: ExchangeSet,
    channels: ChannelNegotiator,
    outbound: Arc<dyn Outbound>,
}

impl HostDispatcher {
    pub fn new(config: &HostConfig, services: Collaborators, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            cx: ProtocolContext::for_host(config, services),
            exchanges: ExchangeSet::new(),
            channels: ChannelNegotiator::new(),
            outbound,
        }
    }

    pub fn context(&self) -> &ProtocolContext {
        &self.cx
    }

    pub fn exchanges(&self) -> &ExchangeSet {
        &self.exchanges
    }

    /// A client connected; open the version handshake
    pub fn on_connect(&mut self, peer: PeerId, link: PeerLink) -> ProtocolResult<()> {
        if link.is_host() {
            return Err(ProtocolError::InvalidState(format!(
                "host cannot accept a host link from {peer}"
            )));
        }
        info!(%peer, name = %link.persistent_name(), "client connected");
        self.cx
            .peers
            .insert(peer, PeerEndpoint::new(peer, link, self.outbound.clone()));

        let handshake = HandshakeServer::new(self.cx.next_exchange_id(), peer);
        let result = self.exchanges.start(Box::new(handshake), &mut self.cx);
        self.settle();
        result.map(|_| ())
    }

    /// Inbound message entry point
    pub fn on_message(&mut self, peer: PeerId, channel: &str, payload: &[u8]) -> ProtocolResult<()> {
        let Some(message) = ingest(&self.cx, &mut self.channels, peer, channel, payload)? else {
            return Ok(());
        };

        let result = match self.exchanges.route(peer, message, &mut self.cx) {
            Routed::Claimed(result) => result,
            Routed::Unclaimed(message) => self.handle_unclaimed(peer, message),
        };
        self.settle();
        result
    }

    /// The transport lost a client; its exchanges close without notification
    pub fn on_disconnect(&mut self, peer: PeerId) {
        let closed = self.exchanges.close_peer(peer, &mut self.cx);
        self.settle();
        self.cx.peers.remove(&peer);
        self.cx.confirmed.remove(&peer);
        self.channels.reset();
        info!(%peer, closed, "client disconnected");
    }

    /// Send a user-facing notification to one client
    pub fn notify(&self, peer: PeerId, severity: Severity, text: &str) {
        self.cx.notify_peer(peer, severity, text);
    }

    /// Register a placement whose artifact the host already holds
    pub fn publish(&mut self, placement: Placement) -> ProtocolResult<()> {
        if !self.cx.services.store.local_state(&placement).is_present() {
            return Err(ProtocolError::InvalidState(format!(
                "artifact for {} is not present",
                placement.id
            )));
        }
        self.register(placement)
    }

    /// Remove a placement, releasing any modify lock on it
    pub fn remove_placement(&mut self, id: PlacementId) -> ProtocolResult<()> {
        self.exchanges.close_where(true, &mut self.cx, |e| {
            e.kind() == ExchangeKind::ModifyServer && e.placement() == Some(id)
        });
        self.settle();

        if self.cx.services.registry.remove(&id).is_none() {
            return Err(ProtocolError::UnknownPlacement(id));
        }
        info!(placement = %id, "placement removed");
        self.cx.broadcast(&Message::RemovePlacement(id));
        Ok(())
    }

    fn handle_unclaimed(&mut self, peer: PeerId, message: Message) -> ProtocolResult<()> {
        match message {
            Message::FeatureRequest => answer_feature_request(&self.cx, peer),
            Message::RequestDownload(id) => {
                let placement = self.cx.services.registry.get(&id);
                serve_download(&mut self.exchanges, &mut self.cx, peer, id, placement)
            }
            Message::RegisterMetadata(placement) => self.accept_share(peer, placement),
            Message::RemovePlacement(id) => {
                if !self.cx.confirmed.contains(&peer) {
                    return Ok(());
                }
                match self.remove_placement(id) {
                    Err(ProtocolError::UnknownPlacement(_)) => {
                        debug!(%peer, placement = %id, "removal of unknown placement ignored");
                        Ok(())
                    }
                    other => other,
                }
            }
            Message::RegisterVersion(_) => {
                debug!(%peer, "client announced version again");
                let handshake = HandshakeServer::answering(self.cx.next_exchange_id(), peer);
                self.exchanges.start(Box::new(handshake), &mut self.cx)?;
                match self.exchanges.route(peer, message, &mut self.cx) {
                    Routed::Claimed(result) => result,
                    Routed::Unclaimed(_) => Err(ProtocolError::InvalidState(
                        "fresh handshake did not claim version".into(),
                    )),
                }
            }
            Message::ModifyRequest(id) => {
                let modify = ModifyExchangeServer::new(self.cx.next_exchange_id(), peer, id);
                self.exchanges.start(Box::new(modify), &mut self.cx).map(|_| ())
            }
            other => {
                trace!(%peer, kind = %other.kind(), "unclaimed message dropped");
                Ok(())
            }
        }
    }

    fn accept_share(&mut self, peer: PeerId, placement: Placement) -> ProtocolResult<()> {
        if !self.cx.confirmed.contains(&peer) {
            debug!(%peer, "share from unconfirmed peer ignored");
            return Ok(());
        }
        if let Some(existing) = self.cx.services.registry.get(&placement.id) {
            debug!(%peer, placement = %placement.id, "placement already registered");
            return self.cx.send(peer, &Message::RegisterMetadata(existing));
        }
        let downloading = self.exchanges.iter().any(|e| {
            !e.is_finished()
                && e.kind() == ExchangeKind::Download
                && e.placement() == Some(placement.id)
        });
        if downloading {
            return Ok(());
        }

        if self.cx.services.store.local_state(&placement).is_present() {
            return self.register(placement);
        }
        let download = DownloadExchange::new(self.cx.next_exchange_id(), peer, placement);
        self.exchanges
            .start(Box::new(download), &mut self.cx)
            .map(|_| ())
    }

    fn register(&mut self, placement: Placement) -> ProtocolResult<()> {
        self.cx.services.registry.add(placement.clone())?;
        info!(placement = %placement.id, name = %placement.name, "placement registered");
        self.cx.broadcast(&Message::RegisterMetadata(placement));
        Ok(())
    }

    /// React to exchanges that reached a terminal state
    fn settle(&mut self) {
        for mut exchange in self.exchanges.take_finished() {
            if exchange.kind() != ExchangeKind::Download {
                continue;
            }
            let partner = exchange.partner();
            let Some(download) = exchange.as_any_mut().downcast_mut::<DownloadExchange>() else {
                continue;
            };
            let placement = download.placement_record().clone();

            if !download.is_successful() {
                warn!(peer = %partner, placement = %placement.id, "shared placement not received");
                continue;
            }
            if let Err(e) = self.register(placement) {
                warn!(peer = %partner, error = %e, "shared placement not registered");
            }
        }
    }
}
