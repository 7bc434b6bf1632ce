//! Channel capability discovery
//!
//! The transport announces the channels a peer can receive on through a
//! generic register channel. The negotiator filters such announcements down
//! to this protocol's own identifiers and re-advertises that subset, once per
//! direction, until the connection drops.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::context::Role;
use crate::message::MessageKind;

/// Generic channel used by the transport to announce receivable channels
pub const REGISTER_CHANNEL: &str = "minecraft:register";

/// Generic channel used by the transport to withdraw receivable channels
pub const UNREGISTER_CHANNEL: &str = "minecraft:unregister";

const TERMINATOR: u8 = 0x00;

/// Per-process discovery state, one advertised list per direction
#[derive(Debug, Default)]
pub struct ChannelNegotiator {
    client_advertised: Vec<String>,
    host_advertised: Vec<String>,
}

impl ChannelNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `channel` is one of the two generic discovery channels
    pub fn is_discovery_channel(channel: &str) -> bool {
        channel == REGISTER_CHANNEL || channel == UNREGISTER_CHANNEL
    }

    /// Handle a register announcement observed by `role`
    ///
    /// Returns the payload to send back on [`REGISTER_CHANNEL`], or `None`
    /// when there is nothing new to advertise.
    pub fn on_register(&mut self, role: Role, payload: &[u8]) -> Option<Bytes> {
        let advertised = self.advertised_mut(role);
        let mut reply = BytesMut::new();

        for identifier in parse_channel_list(payload) {
            if MessageKind::from_identifier(&identifier).is_none() {
                trace!(channel = %identifier, "ignoring foreign channel");
                continue;
            }
            if advertised.contains(&identifier) {
                continue;
            }
            debug!(channel = %identifier, ?role, "advertising channel");
            reply.put_slice(identifier.as_bytes());
            reply.put_u8(TERMINATOR);
            advertised.push(identifier);
        }

        (!reply.is_empty()).then(|| reply.freeze())
    }

    /// Handle an unregister announcement observed by `role`
    pub fn on_unregister(&mut self, role: Role, payload: &[u8]) {
        let removed = parse_channel_list(payload);
        self.advertised_mut(role)
            .retain(|identifier| !removed.contains(identifier));
    }

    pub fn advertised(&self, role: Role) -> &[String] {
        match role {
            Role::Client => &self.client_advertised,
            Role::Host => &self.host_advertised,
        }
    }

    /// Clear both directions; called when a connection drops
    pub fn reset(&mut self) {
        self.client_advertised.clear();
        self.host_advertised.clear();
    }

    fn advertised_mut(&mut self, role: Role) -> &mut Vec<String> {
        match role {
            Role::Client => &mut self.client_advertised,
            Role::Host => &mut self.host_advertised,
        }
    }
}

/// Split a discovery payload into channel identifiers
///
/// Entries are NUL-terminated UTF-8; anything after the first `/` or `\` is
/// dropped. A trailing entry without a terminator and entries that are not
/// valid UTF-8 are skipped.
pub fn parse_channel_list(payload: &[u8]) -> Vec<String> {
    let mut identifiers = Vec::new();
    let mut rest = payload;

    while let Some(end) = rest.iter().position(|b| *b == TERMINATOR) {
        let (entry, tail) = rest.split_at(end);
        rest = &tail[1..];

        let Ok(entry) = std::str::from_utf8(entry) else {
            continue;
        };
        let head = entry.split(['/', '\\']).next().unwrap_or_default();
        if !head.is_empty() {
            identifiers.push(head.to_string());
        }
    }
    identifiers
}
