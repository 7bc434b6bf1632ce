use std::collections::HashMap;
use std::sync::Arc;

use blueprint_core::{PeerId, Placement, PlacementId, PlacementOrigin, Severity, StoreError};
use tracing::{debug, info, trace, warn};

use super::{ExchangeSet, Routed, answer_feature_request, ingest, serve_download};
use crate::channel::ChannelNegotiator;
use crate::config::ClientConfig;
use crate::context::{Collaborators, ProtocolContext};
use crate::endpoint::{Outbound, PeerEndpoint, PeerLink};
use crate::error::{ProtocolError, ProtocolResult};
use crate::exchange::{
    DownloadExchange, Exchange, ExchangeId, ExchangeKind, HandshakeClient, ModifyExchangeClient,
};
use crate::feature::Feature;
use crate::message::{Message, ModifyFinish, ModifyUpdate};

/// Subordinate side of the star: mirrors the host registry
pub struct ClientDispatcher {
    cx: ProtocolContext,
    exchanges: ExchangeSet,
    channels: ChannelNegotiator,
    outbound: Arc<dyn Outbound>,
    host: Option<PeerId>,
    /// Placements announced to the host but not yet registered by it
    sharing: HashMap<PlacementId, Placement>,
}

impl ClientDispatcher {
    pub fn new(
        config: &ClientConfig,
        services: Collaborators,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            cx: ProtocolContext::for_client(config, services),
            exchanges: ExchangeSet::new(),
            channels: ChannelNegotiator::new(),
            outbound,
            host: None,
            sharing: HashMap::new(),
        }
    }

    pub fn context(&self) -> &ProtocolContext {
        &self.cx
    }

    pub fn exchanges(&self) -> &ExchangeSet {
        &self.exchanges
    }

    /// Whether the host's registry has been received
    pub fn is_started(&self) -> bool {
        self.cx.started
    }

    pub fn host(&self) -> Option<PeerId> {
        self.host
    }

    pub fn is_sharing(&self, id: &PlacementId) -> bool {
        self.sharing.contains_key(id)
    }

    /// Connected to a host; wait for its version announcement
    pub fn on_connect(&mut self, peer: PeerId, link: PeerLink) -> ProtocolResult<()> {
        if !link.is_host() {
            return Err(ProtocolError::InvalidState(format!(
                "client cannot accept a client link from {peer}"
            )));
        }
        info!(%peer, server = %link.persistent_name(), "connected to host");
        self.cx
            .peers
            .insert(peer, PeerEndpoint::new(peer, link, self.outbound.clone()));
        self.host = Some(peer);

        let handshake = HandshakeClient::new(self.cx.next_exchange_id(), peer);
        self.exchanges
            .start(Box::new(handshake), &mut self.cx)
            .map(|_| ())
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

    /// The connection to the host dropped
    pub fn on_disconnect(&mut self, peer: PeerId) {
        let closed = self.exchanges.close_peer(peer, &mut self.cx);
        self.settle();
        self.cx.peers.remove(&peer);
        self.channels.reset();
        if self.host == Some(peer) {
            self.host = None;
            self.cx.started = false;
            self.sharing.clear();
        }
        info!(%peer, closed, "disconnected from host");
    }

    /// Fetch a placement's artifact from the host
    ///
    /// Returns `None` when the bytes are already present locally, in which
    /// case the placement is rendered right away.
    pub fn request_download(&mut self, id: PlacementId) -> ProtocolResult<Option<ExchangeId>> {
        let host = self.started_host()?;
        let mut placement = self
            .cx
            .services
            .registry
            .get(&id)
            .ok_or(ProtocolError::UnknownPlacement(id))?;

        if self.cx.services.store.local_state(&placement).is_present() {
            self.mark_downloaded(&mut placement)?;
            return Ok(None);
        }
        if self.has_open(ExchangeKind::Download, id) {
            return Err(ProtocolError::InvalidState(format!(
                "download of {id} already running"
            )));
        }

        let download = DownloadExchange::new(self.cx.next_exchange_id(), host, placement);
        let result = self.exchanges.start(Box::new(download), &mut self.cx);
        self.settle();
        result.map(Some)
    }

    /// Announce a locally held placement to the host
    pub fn share(&mut self, placement: Placement) -> ProtocolResult<()> {
        let host = self.started_host()?;
        if !self.cx.services.store.local_state(&placement).is_present() {
            return Err(StoreError::NotFound(placement.id).into());
        }
        debug!(placement = %placement.id, name = %placement.name, "sharing placement");
        self.cx
            .send(host, &Message::RegisterMetadata(placement.clone()))?;
        self.sharing.insert(placement.id, placement);
        Ok(())
    }

    /// Ask the host for the modify lock on a placement
    pub fn request_modify(&mut self, id: PlacementId) -> ProtocolResult<ExchangeId> {
        let host = self.started_host()?;
        if !self.cx.has_feature(host, Feature::Modify) {
            return Err(ProtocolError::InvalidState(
                "host does not support modification".into(),
            ));
        }
        if self.has_open(ExchangeKind::ModifyClient, id) {
            return Err(ProtocolError::InvalidState(format!(
                "modification of {id} already requested"
            )));
        }

        let modify = ModifyExchangeClient::new(self.cx.next_exchange_id(), host, id);
        let result = self.exchanges.start(Box::new(modify), &mut self.cx);
        self.settle();
        result
    }

    /// Whether the host granted the modify lock for `id`
    pub fn holds_modify_lock(&mut self, id: PlacementId) -> bool {
        self.exchanges
            .find_mut::<ModifyExchangeClient>(|e| e.placement_id() == id)
            .is_some_and(|e| e.is_accepted())
    }

    /// Submit the edited origin for a placement whose lock is held
    pub fn finish_modify(&mut self, id: PlacementId, origin: PlacementOrigin) -> ProtocolResult<()> {
        let exchange = self
            .exchanges
            .find_mut::<ModifyExchangeClient>(|e| e.placement_id() == id)
            .ok_or_else(|| ProtocolError::InvalidState(format!("no modification of {id} open")))?;
        let result = exchange.conclude(origin, &mut self.cx);
        self.settle();
        result
    }

    /// Abandon a modification, releasing the lock if it was granted
    pub fn cancel_modify(&mut self, id: PlacementId) {
        self.exchanges.close_where(true, &mut self.cx, |e| {
            e.kind() == ExchangeKind::ModifyClient && e.placement() == Some(id)
        });
        self.settle();
    }

    /// Ask the host to remove a placement
    pub fn request_removal(&mut self, id: PlacementId) -> ProtocolResult<()> {
        let host = self.started_host()?;
        self.cx.send(host, &Message::RemovePlacement(id))
    }

    fn started_host(&self) -> ProtocolResult<PeerId> {
        match self.host {
            Some(host) if self.cx.started => Ok(host),
            _ => Err(ProtocolError::InvalidState("not connected to a started host".into())),
        }
    }

    fn has_open(&self, kind: ExchangeKind, id: PlacementId) -> bool {
        self.exchanges
            .iter()
            .any(|e| !e.is_finished() && e.kind() == kind && e.placement() == Some(id))
    }

    fn mark_downloaded(&self, placement: &mut Placement) -> ProtocolResult<()> {
        placement.downloaded = true;
        self.cx.services.registry.update(placement.clone())?;
        self.cx.services.renderer.render(placement);
        Ok(())
    }

    fn handle_unclaimed(&mut self, peer: PeerId, message: Message) -> ProtocolResult<()> {
        match message {
            Message::FeatureRequest => answer_feature_request(&self.cx, peer),
            Message::RequestDownload(id) => {
                let placement = self
                    .sharing
                    .get(&id)
                    .cloned()
                    .or_else(|| self.cx.services.registry.get(&id));
                serve_download(&mut self.exchanges, &mut self.cx, peer, id, placement)
            }
            Message::RegisterMetadata(placement) => self.on_register_metadata(placement),
            Message::RemovePlacement(id) => self.on_remove(id),
            Message::Modify(update) => self.on_modify(update),
            Message::Notice(notice) => {
                self.cx
                    .services
                    .notifier
                    .notify(notice.severity(), &notice.text);
                Ok(())
            }
            Message::RegisterVersion(_) => self.restart_handshake(peer, message),
            Message::ModifyAccept(id) => self.release_stale_lock(peer, id),
            Message::CancelTransfer(id) => {
                if self.sharing.remove(&id).is_some() {
                    debug!(placement = %id, "host declined shared placement");
                }
                Ok(())
            }
            other => {
                trace!(%peer, kind = %other.kind(), "unclaimed message dropped");
                Ok(())
            }
        }
    }

    fn on_register_metadata(&mut self, mut placement: Placement) -> ProtocolResult<()> {
        let registry = self.cx.services.registry.clone();
        let shared_by_us = self.sharing.remove(&placement.id).is_some();
        if registry.contains(&placement.id) {
            trace!(placement = %placement.id, "placement already known");
            return Ok(());
        }

        placement.downloaded = self.cx.services.store.local_state(&placement).is_present();
        registry.add(placement.clone())?;
        debug!(placement = %placement.id, shared_by_us, "placement registered by host");

        if shared_by_us && placement.downloaded {
            self.cx.services.renderer.render(&placement);
        }
        Ok(())
    }

    fn on_remove(&mut self, id: PlacementId) -> ProtocolResult<()> {
        self.exchanges.close_where(false, &mut self.cx, |e| {
            e.kind() == ExchangeKind::ModifyClient && e.placement() == Some(id)
        });

        let Some(placement) = self.cx.services.registry.remove(&id) else {
            return Ok(());
        };
        if self.cx.services.renderer.is_rendered(&id) {
            self.cx.services.renderer.unrender(&placement);
        }
        debug!(placement = %id, "placement removed by host");
        Ok(())
    }

    fn on_modify(&mut self, update: ModifyUpdate) -> ProtocolResult<()> {
        let registry = self.cx.services.registry.clone();
        let Some(mut placement) = registry.get(&update.placement) else {
            trace!(placement = %update.placement, "modify for unknown placement");
            return Ok(());
        };
        placement.origin = update.origin;
        if update.last_modified_by.is_some() {
            placement.last_modified_by = update.last_modified_by;
        }
        registry.update(placement.clone())?;
        self.cx.services.renderer.update_rendered(&placement);
        Ok(())
    }

    /// A host that announces its version again restarts the session
    fn restart_handshake(&mut self, peer: PeerId, message: Message) -> ProtocolResult<()> {
        if self.host != Some(peer) {
            return Ok(());
        }
        info!(%peer, "host restarted handshake");

        self.exchanges.close_peer(peer, &mut self.cx);
        self.settle();
        let services = &self.cx.services;
        for placement in services.registry.list() {
            if services.renderer.is_rendered(&placement.id) {
                services.renderer.unrender(&placement);
            }
        }
        services.registry.clear();
        self.cx.started = false;
        self.sharing.clear();
        self.cx.peer_mut(peer)?.clear_features();

        let handshake = HandshakeClient::new(self.cx.next_exchange_id(), peer);
        self.exchanges.start(Box::new(handshake), &mut self.cx)?;
        match self.exchanges.route(peer, message, &mut self.cx) {
            Routed::Claimed(result) => result,
            Routed::Unclaimed(_) => Err(ProtocolError::InvalidState(
                "fresh handshake did not claim version".into(),
            )),
        }
    }

    /// Answer an accept for a modification we no longer track with a finish
    fn release_stale_lock(&mut self, peer: PeerId, id: PlacementId) -> ProtocolResult<()> {
        let Some(placement) = self.cx.services.registry.get(&id) else {
            return Ok(());
        };
        debug!(placement = %id, "releasing stale modify lock");
        let finish = ModifyFinish {
            placement: id,
            origin: placement.origin,
            editor: self.cx.local_identity.clone(),
        };
        self.cx.send(peer, &Message::ModifyFinish(finish))
    }

    fn settle(&mut self) {
        for mut exchange in self.exchanges.take_finished() {
            if exchange.kind() == ExchangeKind::Upload {
                if let Some(id) = exchange.placement().filter(|_| !exchange.is_successful()) {
                    if self.sharing.remove(&id).is_some() {
                        debug!(placement = %id, "shared placement upload failed");
                    }
                }
                continue;
            }
            if exchange.kind() != ExchangeKind::Download {
                continue;
            }
            let Some(download) = exchange.as_any_mut().downcast_mut::<DownloadExchange>() else {
                continue;
            };
            let mut placement = download.placement_record().clone();

            if !download.is_successful() {
                self.cx.services.notifier.notify(
                    Severity::Error,
                    &format!("Download of {} failed", placement.name),
                );
                continue;
            }
            if let Err(e) = self.mark_downloaded(&mut placement) {
                warn!(placement = %placement.id, error = %e, "downloaded placement not recorded");
            }
        }
    }
}
