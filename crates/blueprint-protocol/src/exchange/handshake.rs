//! Version handshake
//!
//! The host opens by announcing its version. Each side checks the partner's
//! version against its compatibility predicate, maps it to a feature set
//! (falling back to an explicit feature request for unknown versions), and
//! the client then announces its own version. The host finishes by sending
//! the full placement registry in one `confirm_user` message.

use std::any::Any;

use blueprint_core::{PeerId, Placement, Severity};
use tracing::{debug, info, warn};

use super::{Exchange, ExchangeId, ExchangeKind, Lifecycle};
use crate::context::ProtocolContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::feature::FeatureSet;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerStage {
    AwaitingVersion,
    AwaitingFeatures,
}

/// Host side of the handshake
pub struct HandshakeServer {
    id: ExchangeId,
    partner: PeerId,
    lifecycle: Lifecycle,
    stage: ServerStage,
    announce: bool,
}

impl HandshakeServer {
    /// Handshake for a fresh connection; announces the host version on init
    pub fn new(id: ExchangeId, partner: PeerId) -> Self {
        Self {
            id,
            partner,
            lifecycle: Lifecycle::new(),
            stage: ServerStage::AwaitingVersion,
            announce: true,
        }
    }

    /// Handshake opened by a client announcing its version on its own
    pub fn answering(id: ExchangeId, partner: PeerId) -> Self {
        Self {
            announce: false,
            ..Self::new(id, partner)
        }
    }

    fn confirm(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        let placements = cx.services.registry.list();
        debug!(peer = %self.partner, count = placements.len(), "confirming user");
        cx.send(self.partner, &Message::ConfirmUser(placements))?;
        cx.confirmed.insert(self.partner);
        self.succeed(cx);
        Ok(())
    }
}

impl Exchange for HandshakeServer {
    fn id(&self) -> ExchangeId {
        self.id
    }

    fn kind(&self) -> ExchangeKind {
        ExchangeKind::HandshakeServer
    }

    fn partner(&self) -> PeerId {
        self.partner
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn check_packet(&self, message: &Message) -> bool {
        match (self.stage, message) {
            (ServerStage::AwaitingVersion, Message::RegisterVersion(_)) => true,
            (ServerStage::AwaitingFeatures, Message::Feature(_)) => true,
            _ => false,
        }
    }

    fn init(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        if !self.announce {
            return Ok(());
        }
        cx.send(self.partner, &Message::RegisterVersion(cx.local_version.clone()))
    }

    fn handle(&mut self, message: Message, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        match message {
            Message::RegisterVersion(version) => {
                if !cx.version_policy.accepts(&cx.local_version, &version) {
                    warn!(peer = %self.partner, %version, "rejecting incompatible client");
                    self.close(false, cx);
                    cx.disconnect(self.partner, "incompatible protocol version");
                    return Err(ProtocolError::VersionRejected {
                        local: cx.local_version.clone(),
                        remote: version,
                    });
                }

                let known = cx.peer(self.partner)?.feature_set().is_some();
                if known {
                    return self.confirm(cx);
                }
                match FeatureSet::from_version_string(&version) {
                    Some(features) => {
                        cx.peer_mut(self.partner)?.attach_features(features);
                        self.confirm(cx)
                    }
                    None => {
                        debug!(peer = %self.partner, %version, "unknown version, requesting features");
                        self.stage = ServerStage::AwaitingFeatures;
                        cx.send(self.partner, &Message::FeatureRequest)
                    }
                }
            }
            Message::Feature(tags) => {
                let features = FeatureSet::from_tags(&tags);
                cx.peer_mut(self.partner)?.attach_features(features);
                self.confirm(cx)
            }
            other => Err(unexpected(&other)),
        }
    }

    fn cancel_message(&self) -> Option<Message> {
        None
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStage {
    AwaitingVersion,
    AwaitingFeatures,
    AwaitingConfirm,
}

/// Client side of the handshake
pub struct HandshakeClient {
    id: ExchangeId,
    partner: PeerId,
    lifecycle: Lifecycle,
    stage: ClientStage,
}

impl HandshakeClient {
    pub fn new(id: ExchangeId, partner: PeerId) -> Self {
        Self {
            id,
            partner,
            lifecycle: Lifecycle::new(),
            stage: ClientStage::AwaitingVersion,
        }
    }

    fn announce(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        self.stage = ClientStage::AwaitingConfirm;
        cx.send(self.partner, &Message::RegisterVersion(cx.local_version.clone()))
    }

    fn ingest(&mut self, placements: Vec<Placement>, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        let registry = &cx.services.registry;
        let count = placements.len();
        for placement in placements {
            if registry.contains(&placement.id) {
                registry.update(placement)?;
            } else {
                registry.add(placement)?;
            }
        }
        cx.services.renderer.commit_pending_load();
        cx.started = true;
        info!(peer = %self.partner, placements = count, "registry bootstrapped");
        self.succeed(cx);
        Ok(())
    }
}

impl Exchange for HandshakeClient {
    fn id(&self) -> ExchangeId {
        self.id
    }

    fn kind(&self) -> ExchangeKind {
        ExchangeKind::HandshakeClient
    }

    fn partner(&self) -> PeerId {
        self.partner
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn check_packet(&self, message: &Message) -> bool {
        match (self.stage, message) {
            (ClientStage::AwaitingVersion, Message::RegisterVersion(_)) => true,
            (ClientStage::AwaitingFeatures, Message::Feature(_)) => true,
            (ClientStage::AwaitingConfirm, Message::ConfirmUser(_)) => true,
            (_, Message::FeatureRequest) => true,
            _ => false,
        }
    }

    fn init(&mut self, _cx: &mut ProtocolContext) -> ProtocolResult<()> {
        Ok(())
    }

    fn handle(&mut self, message: Message, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        match message {
            Message::RegisterVersion(version) => {
                if !cx.version_policy.accepts(&cx.local_version, &version) {
                    warn!(peer = %self.partner, %version, "host version incompatible");
                    cx.services.notifier.notify(
                        Severity::Error,
                        &format!("Incompatible host version {version}"),
                    );
                    self.close(false, cx);
                    cx.disconnect(self.partner, "incompatible protocol version");
                    return Err(ProtocolError::VersionRejected {
                        local: cx.local_version.clone(),
                        remote: version,
                    });
                }

                if cx.peer(self.partner)?.feature_set().is_some() {
                    return self.announce(cx);
                }
                match FeatureSet::from_version_string(&version) {
                    Some(features) => {
                        cx.peer_mut(self.partner)?.attach_features(features);
                        self.announce(cx)
                    }
                    None => {
                        debug!(peer = %self.partner, %version, "unknown host version, requesting features");
                        self.stage = ClientStage::AwaitingFeatures;
                        cx.send(self.partner, &Message::FeatureRequest)
                    }
                }
            }
            Message::Feature(tags) => {
                let features = FeatureSet::from_tags(&tags);
                cx.peer_mut(self.partner)?.attach_features(features);
                self.announce(cx)
            }
            Message::FeatureRequest => {
                cx.send(self.partner, &Message::Feature(cx.local_features.tags()))
            }
            Message::ConfirmUser(placements) => self.ingest(placements, cx),
            other => Err(unexpected(&other)),
        }
    }

    fn cancel_message(&self) -> Option<Message> {
        None
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn unexpected(message: &Message) -> ProtocolError {
    ProtocolError::InvalidState(format!("handshake cannot handle {}", message.kind()))
}
