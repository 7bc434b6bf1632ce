//! Modify-lock exchanges
//!
//! The host is the lock authority. A request is accepted only if the
//! placement exists and nobody else holds its lock; the first accepted
//! request wins and every competitor is denied explicitly. The lock entry is
//! dropped whenever the holding exchange terminates, but only if that
//! exchange is still the recorded holder.

use std::any::Any;

use blueprint_core::{Identity, PeerId, PlacementId, PlacementOrigin, Severity};
use tracing::{debug, info};

use super::{Exchange, ExchangeId, ExchangeKind, Lifecycle};
use crate::context::ProtocolContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Message, ModifyFinish};

/// Host side: grants the lock and applies the editor's result
pub struct ModifyExchangeServer {
    id: ExchangeId,
    partner: PeerId,
    placement: PlacementId,
    lifecycle: Lifecycle,
}

impl ModifyExchangeServer {
    pub fn new(id: ExchangeId, partner: PeerId, placement: PlacementId) -> Self {
        Self {
            id,
            partner,
            placement,
            lifecycle: Lifecycle::new(),
        }
    }

    fn apply(&mut self, finish: ModifyFinish, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        let registry = cx.services.registry.clone();
        let mut placement = registry
            .get(&self.placement)
            .ok_or(ProtocolError::UnknownPlacement(self.placement))?;

        let editor = cx
            .services
            .identities
            .create_or_get(finish.editor.id, &finish.editor.name);
        placement.origin = finish.origin;
        placement.last_modified_by = Some(editor.clone());
        registry.update(placement.clone())?;

        info!(placement = %self.placement, editor = %editor, "placement modified");
        cx.broadcast_modify(&placement);
        self.succeed(cx);
        Ok(())
    }
}

impl Exchange for ModifyExchangeServer {
    fn id(&self) -> ExchangeId {
        self.id
    }

    fn kind(&self) -> ExchangeKind {
        ExchangeKind::ModifyServer
    }

    fn partner(&self) -> PeerId {
        self.partner
    }

    fn placement(&self) -> Option<PlacementId> {
        Some(self.placement)
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn check_packet(&self, message: &Message) -> bool {
        matches!(message, Message::ModifyFinish(finish) if finish.placement == self.placement)
    }

    fn init(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        if !cx.services.registry.contains(&self.placement) {
            debug!(placement = %self.placement, "modify denied, placement unknown");
            self.close(true, cx);
            return Ok(());
        }
        if let Err(holder) = cx.locks.try_acquire(self.placement, self.id) {
            debug!(placement = %self.placement, %holder, "modify denied, lock held");
            self.close(true, cx);
            return Ok(());
        }
        debug!(placement = %self.placement, peer = %self.partner, "modify lock granted");
        cx.send(self.partner, &Message::ModifyAccept(self.placement))
    }

    fn handle(&mut self, message: Message, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        match message {
            Message::ModifyFinish(finish) => self.apply(finish, cx),
            other => Err(ProtocolError::InvalidState(format!(
                "modify cannot handle {}",
                other.kind()
            ))),
        }
    }

    fn cancel_message(&self) -> Option<Message> {
        Some(Message::ModifyDeny(self.placement))
    }

    fn on_close(&mut self, cx: &mut ProtocolContext) {
        cx.locks.release_if_holder(&self.placement, self.id);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Client side: requests the lock and later submits the new origin
pub struct ModifyExchangeClient {
    id: ExchangeId,
    partner: PeerId,
    placement: PlacementId,
    lifecycle: Lifecycle,
    original_origin: Option<PlacementOrigin>,
    editor: Identity,
    accepted: bool,
}

impl ModifyExchangeClient {
    pub fn new(id: ExchangeId, partner: PeerId, placement: PlacementId) -> Self {
        Self {
            id,
            partner,
            placement,
            lifecycle: Lifecycle::new(),
            original_origin: None,
            editor: Identity::unknown(),
            accepted: false,
        }
    }

    pub fn placement_id(&self) -> PlacementId {
        self.placement
    }

    /// Whether the host granted the lock
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    /// Submit the edited origin and release the lock
    pub fn conclude(
        &mut self,
        origin: PlacementOrigin,
        cx: &mut ProtocolContext,
    ) -> ProtocolResult<()> {
        if !self.accepted || self.is_finished() {
            return Err(ProtocolError::InvalidState(format!(
                "no granted modify lock for {}",
                self.placement
            )));
        }
        let finish = ModifyFinish {
            placement: self.placement,
            origin,
            editor: cx.local_identity.clone(),
        };
        cx.send(self.partner, &Message::ModifyFinish(finish))?;
        self.succeed(cx);
        Ok(())
    }
}

impl Exchange for ModifyExchangeClient {
    fn id(&self) -> ExchangeId {
        self.id
    }

    fn kind(&self) -> ExchangeKind {
        ExchangeKind::ModifyClient
    }

    fn partner(&self) -> PeerId {
        self.partner
    }

    fn placement(&self) -> Option<PlacementId> {
        Some(self.placement)
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn check_packet(&self, message: &Message) -> bool {
        match message {
            Message::ModifyAccept(id) | Message::ModifyDeny(id) => {
                !self.accepted && *id == self.placement
            }
            _ => false,
        }
    }

    fn init(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        let placement = cx
            .services
            .registry
            .get(&self.placement)
            .ok_or(ProtocolError::UnknownPlacement(self.placement))?;
        self.original_origin = Some(placement.origin);
        self.editor = cx.local_identity.clone();
        cx.send(self.partner, &Message::ModifyRequest(self.placement))
    }

    fn handle(&mut self, message: Message, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        match message {
            Message::ModifyAccept(_) => {
                debug!(placement = %self.placement, "modify lock acquired");
                self.accepted = true;
                Ok(())
            }
            Message::ModifyDeny(_) => {
                cx.services.notifier.notify(
                    Severity::Error,
                    &format!("Modification of {} was denied", self.placement.short()),
                );
                self.close(false, cx);
                Ok(())
            }
            other => Err(ProtocolError::InvalidState(format!(
                "modify cannot handle {}",
                other.kind()
            ))),
        }
    }

    /// An accepted lock is released by finishing with the unchanged origin
    fn cancel_message(&self) -> Option<Message> {
        if !self.accepted {
            return None;
        }
        self.original_origin.clone().map(|origin| {
            Message::ModifyFinish(ModifyFinish {
                placement: self.placement,
                origin,
                editor: self.editor.clone(),
            })
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
