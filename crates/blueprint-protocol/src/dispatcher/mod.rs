//! Exchange dispatchers
//!
//! A dispatcher is the message-ingestion entry point for one process. Every
//! inbound message is offered to the open exchanges first; the first one
//! whose `check_packet` claims it handles it. Messages nobody claims fall
//! through to a small set of top-level handlers, and anything left after
//! that is dropped.

mod client;
mod host;

pub use client::ClientDispatcher;
pub use host::HostDispatcher;

use blueprint_core::{PeerId, Placement, PlacementId, Severity};
use tracing::{debug, trace, warn};

use crate::channel::{ChannelNegotiator, REGISTER_CHANNEL, UNREGISTER_CHANNEL};
use crate::context::ProtocolContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::exchange::{Exchange, ExchangeId, UploadExchange};
use crate::message::{Message, MessageKind};

/// Outcome of offering a message to the open exchanges
pub enum Routed {
    /// An exchange claimed and handled the message
    Claimed(ProtocolResult<()>),
    /// No open exchange claimed the message
    Unclaimed(Message),
}

/// The exchanges currently open in one process
#[derive(Default)]
pub struct ExchangeSet {
    open: Vec<Box<dyn Exchange>>,
}

impl ExchangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of exchanges that are not yet terminal
    pub fn open_count(&self) -> usize {
        self.open.iter().filter(|e| !e.is_finished()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Exchange> + '_ {
        self.open.iter().map(|e| &**e)
    }

    /// Track and initialize an exchange
    ///
    /// An init failure closes the exchange with notification and is
    /// returned to the caller.
    pub fn start(
        &mut self,
        mut exchange: Box<dyn Exchange>,
        cx: &mut ProtocolContext,
    ) -> ProtocolResult<ExchangeId> {
        let id = exchange.id();
        debug!(exchange = %id, kind = ?exchange.kind(), peer = %exchange.partner(), "starting exchange");
        let result = exchange.init(cx);
        exchange.lifecycle_mut().mark_initialized();
        if let Err(e) = &result {
            warn!(exchange = %id, error = %e, "exchange init failed");
            exchange.close(true, cx);
        }
        self.open.push(exchange);
        result.map(|()| id)
    }

    /// Offer `message` from `peer` to the first open exchange that claims it
    pub fn route(&mut self, peer: PeerId, message: Message, cx: &mut ProtocolContext) -> Routed {
        let claimant = self
            .open
            .iter_mut()
            .find(|e| !e.is_finished() && e.partner() == peer && e.check_packet(&message));

        let Some(exchange) = claimant else {
            return Routed::Unclaimed(message);
        };

        let result = exchange.handle(message, cx);
        if let Err(e) = &result {
            warn!(exchange = %exchange.id(), error = %e, "exchange failed");
            exchange.close(true, cx);
        }
        Routed::Claimed(result)
    }

    /// Close every open exchange matching `predicate`
    pub fn close_where(
        &mut self,
        notify_partner: bool,
        cx: &mut ProtocolContext,
        predicate: impl Fn(&dyn Exchange) -> bool,
    ) -> usize {
        let mut closed = 0;
        for exchange in self.open.iter_mut() {
            if !exchange.is_finished() && predicate(&**exchange) {
                exchange.close(notify_partner, cx);
                closed += 1;
            }
        }
        closed
    }

    /// Close every exchange with `peer` without notifying it
    pub fn close_peer(&mut self, peer: PeerId, cx: &mut ProtocolContext) -> usize {
        self.close_where(false, cx, |e| e.partner() == peer)
    }

    /// Find an open exchange of concrete type `T`
    pub fn find_mut<T: Exchange + 'static>(
        &mut self,
        predicate: impl Fn(&T) -> bool,
    ) -> Option<&mut T> {
        self.open
            .iter_mut()
            .filter(|e| !e.is_finished())
            .filter_map(|e| e.as_any_mut().downcast_mut::<T>())
            .find(|e| predicate(e))
    }

    /// Remove and return every terminal exchange
    pub fn take_finished(&mut self) -> Vec<Box<dyn Exchange>> {
        let (finished, open) = std::mem::take(&mut self.open)
            .into_iter()
            .partition(|e| e.is_finished());
        self.open = open;
        finished
    }
}

/// Common front half of inbound handling
///
/// Answers channel discovery, drops unknown channels, logs the packet and
/// decodes it. Returns the decoded message for routing.
pub(crate) fn ingest(
    cx: &ProtocolContext,
    channels: &mut ChannelNegotiator,
    peer: PeerId,
    channel: &str,
    payload: &[u8],
) -> ProtocolResult<Option<Message>> {
    let endpoint = cx.peer(peer)?;

    if ChannelNegotiator::is_discovery_channel(channel) {
        if channel == UNREGISTER_CHANNEL {
            channels.on_unregister(cx.role, payload);
        } else if let Some(reply) = channels.on_register(cx.role, payload) {
            endpoint.send_raw(REGISTER_CHANNEL, reply)?;
        }
        return Ok(None);
    }

    let Some(kind) = MessageKind::from_identifier(channel) else {
        trace!(%peer, channel, "ignoring foreign channel");
        return Ok(None);
    };
    cx.packets.log_receive(channel, endpoint.persistent_name());
    Message::decode(kind, payload).map(Some)
}

/// Reply to a feature request nobody claimed
pub(crate) fn answer_feature_request(cx: &ProtocolContext, peer: PeerId) -> ProtocolResult<()> {
    cx.send(peer, &Message::Feature(cx.local_features.tags()))
}

/// Start serving `placement` to `peer`, or refuse with `cancel_transfer`
pub(crate) fn serve_download(
    exchanges: &mut ExchangeSet,
    cx: &mut ProtocolContext,
    peer: PeerId,
    id: PlacementId,
    placement: Option<Placement>,
) -> ProtocolResult<()> {
    let refuse = |cx: &ProtocolContext, reason: &str| -> ProtocolResult<()> {
        debug!(%peer, placement = %id, reason, "refusing download");
        cx.send(peer, &Message::CancelTransfer(id))
    };

    let Some(placement) = placement else {
        return refuse(cx, "unknown placement");
    };
    if !cx.services.store.local_state(&placement).is_present() {
        return refuse(cx, "artifact not present");
    }

    let name = cx.peer_name(peer);
    if cx.quota.is_over_quota(&name, 1) {
        cx.notify_peer(
            peer,
            Severity::Error,
            &format!("Transfer quota of {} bytes exhausted", cx.quota.limit()),
        );
        refuse(cx, "quota exhausted")?;
        return Err(ProtocolError::QuotaExceeded {
            peer: name,
            limit: cx.quota.limit(),
        });
    }

    let upload = UploadExchange::new(cx.next_exchange_id(), peer, placement);
    exchanges.start(Box::new(upload), cx).map(|_| ())
}
