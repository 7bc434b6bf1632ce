//! Exchanges: bounded, single-purpose dialogues with one peer
//!
//! Every variant implements [`Exchange`]. The dispatcher asks each open
//! exchange whether it claims an inbound message through the pure
//! [`Exchange::check_packet`] predicate and only then calls
//! [`Exchange::handle`]. Termination goes through [`Exchange::succeed`] or
//! [`Exchange::close`], both of which run the variant's release hook exactly
//! once.

mod handshake;
mod modify;
mod transfer;

pub use handshake::{HandshakeClient, HandshakeServer};
pub use modify::{ModifyExchangeClient, ModifyExchangeServer};
pub use transfer::{CHUNK_SIZE, DownloadExchange, UploadExchange};

use std::any::Any;

use blueprint_core::{PeerId, PlacementId};
use derive_more::Display;
use tracing::{debug, warn};

use crate::context::ProtocolContext;
use crate::error::ProtocolResult;
use crate::message::Message;

/// Process-unique exchange handle
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("exchange#{_0}")]
pub struct ExchangeId(pub u64);

/// Lifecycle state of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Created,
    Initialized,
    Succeeded,
    Failed,
}

/// Tracks the lifecycle of one exchange
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ExchangeState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ExchangeState::Created,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn mark_initialized(&mut self) {
        if self.state == ExchangeState::Created {
            self.state = ExchangeState::Initialized;
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ExchangeState::Succeeded | ExchangeState::Failed)
    }

    pub fn is_successful(&self) -> bool {
        self.state == ExchangeState::Succeeded
    }

    /// Move to a terminal state; returns `false` if already terminal
    pub fn finish(&mut self, success: bool) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = if success {
            ExchangeState::Succeeded
        } else {
            ExchangeState::Failed
        };
        true
    }
}

/// The dialogue an exchange implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    HandshakeServer,
    HandshakeClient,
    Upload,
    Download,
    ModifyServer,
    ModifyClient,
}

/// A stateful dialogue with exactly one peer
pub trait Exchange: Send {
    fn id(&self) -> ExchangeId;

    fn kind(&self) -> ExchangeKind;

    fn partner(&self) -> PeerId;

    /// Placement this exchange is correlated with, if any
    fn placement(&self) -> Option<PlacementId> {
        None
    }

    fn lifecycle(&self) -> &Lifecycle;

    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Whether this exchange claims `message`
    ///
    /// Must not have side effects.
    fn check_packet(&self, message: &Message) -> bool;

    /// Leave the created state; may send the first message or terminate
    fn init(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()>;

    /// Advance on a claimed message
    fn handle(&mut self, message: Message, cx: &mut ProtocolContext) -> ProtocolResult<()>;

    /// Message sent to the partner when closing with notification
    fn cancel_message(&self) -> Option<Message>;

    /// Release held resources; runs once on every terminal path
    fn on_close(&mut self, _cx: &mut ProtocolContext) {}

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn is_finished(&self) -> bool {
        self.lifecycle().is_finished()
    }

    fn is_successful(&self) -> bool {
        self.lifecycle().is_successful()
    }

    /// Terminate successfully; no-op if already terminal
    fn succeed(&mut self, cx: &mut ProtocolContext) {
        if self.lifecycle_mut().finish(true) {
            debug!(exchange = %self.id(), kind = ?self.kind(), "exchange succeeded");
            self.on_close(cx);
        }
    }

    /// Terminate as failed, optionally sending the cancellation message first
    fn close(&mut self, notify_partner: bool, cx: &mut ProtocolContext) {
        if !self.lifecycle_mut().finish(false) {
            return;
        }
        debug!(exchange = %self.id(), kind = ?self.kind(), notify_partner, "exchange closed");
        if notify_partner {
            if let Some(message) = self.cancel_message() {
                if let Err(e) = cx.send(self.partner(), &message) {
                    warn!(exchange = %self.id(), error = %e, "cancellation send failed");
                }
            }
        }
        self.on_close(cx);
    }
}
