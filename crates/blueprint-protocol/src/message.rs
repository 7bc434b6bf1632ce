//! Wire messages
//!
//! Every protocol message travels on its own named channel. The channel
//! identifier selects the [`MessageKind`]; the payload is the postcard
//! encoding of that kind's fields, in the order listed below.
//!
//! | Kind | Payload |
//! |---|---|
//! | `register_metadata` | placement record |
//! | `remove_syncmatic` | placement id |
//! | `modify_request` / `modify_accept` / `modify_deny` | placement id |
//! | `modify_finish` | placement id, origin, editor identity |
//! | `modify` | placement id, origin, optional last modifier |
//! | `request_download` | placement id |
//! | `send_chunk` | placement id, byte count, raw bytes |
//! | `received_chunk` / `finished_transfer` / `cancel_transfer` | placement id |
//! | `register_version` | version string |
//! | `confirm_user` | placement count, then that many records |
//! | `feature_request` / `feature` | nothing / capability tags |
//! | `message` | severity tag, text |

use blueprint_core::{Identity, Placement, PlacementId, PlacementOrigin, Severity};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Namespace prefix shared by every protocol channel
pub const NAMESPACE: &str = "blueprint";

/// Largest payload accepted on a protocol channel (1 MB)
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// The closed set of protocol message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    RegisterMetadata,
    RemovePlacement,
    RequestDownload,
    SendChunk,
    ReceivedChunk,
    FinishedTransfer,
    CancelTransfer,
    RegisterVersion,
    ConfirmUser,
    FeatureRequest,
    Feature,
    Modify,
    ModifyRequest,
    ModifyDeny,
    ModifyAccept,
    ModifyFinish,
    Notice,
}

impl MessageKind {
    pub const ALL: [MessageKind; 17] = [
        MessageKind::RegisterMetadata,
        MessageKind::RemovePlacement,
        MessageKind::RequestDownload,
        MessageKind::SendChunk,
        MessageKind::ReceivedChunk,
        MessageKind::FinishedTransfer,
        MessageKind::CancelTransfer,
        MessageKind::RegisterVersion,
        MessageKind::ConfirmUser,
        MessageKind::FeatureRequest,
        MessageKind::Feature,
        MessageKind::Modify,
        MessageKind::ModifyRequest,
        MessageKind::ModifyDeny,
        MessageKind::ModifyAccept,
        MessageKind::ModifyFinish,
        MessageKind::Notice,
    ];

    /// Stable channel identifier
    pub fn identifier(&self) -> &'static str {
        match self {
            MessageKind::RegisterMetadata => "blueprint:register_metadata",
            MessageKind::RemovePlacement => "blueprint:remove_syncmatic",
            MessageKind::RequestDownload => "blueprint:request_download",
            MessageKind::SendChunk => "blueprint:send_chunk",
            MessageKind::ReceivedChunk => "blueprint:received_chunk",
            MessageKind::FinishedTransfer => "blueprint:finished_transfer",
            MessageKind::CancelTransfer => "blueprint:cancel_transfer",
            MessageKind::RegisterVersion => "blueprint:register_version",
            MessageKind::ConfirmUser => "blueprint:confirm_user",
            MessageKind::FeatureRequest => "blueprint:feature_request",
            MessageKind::Feature => "blueprint:feature",
            MessageKind::Modify => "blueprint:modify",
            MessageKind::ModifyRequest => "blueprint:modify_request",
            MessageKind::ModifyDeny => "blueprint:modify_deny",
            MessageKind::ModifyAccept => "blueprint:modify_accept",
            MessageKind::ModifyFinish => "blueprint:modify_finish",
            MessageKind::Notice => "blueprint:message",
        }
    }

    /// Look up the kind carried on a channel identifier
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.identifier() == identifier)
    }

    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        let id = self.identifier();
        &id[NAMESPACE.len() + 1..]
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

/// One chunk of artifact bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub placement: PlacementId,
    pub byte_count: u32,
    pub data: Bytes,
}

impl ChunkPayload {
    pub fn new(placement: PlacementId, data: Bytes) -> Self {
        Self {
            placement,
            byte_count: data.len() as u32,
            data,
        }
    }
}

/// A placement origin change republished by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyUpdate {
    pub placement: PlacementId,
    pub origin: PlacementOrigin,
    pub last_modified_by: Option<Identity>,
}

/// The editing client's final origin for a locked placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyFinish {
    pub placement: PlacementId,
    pub origin: PlacementOrigin,
    pub editor: Identity,
}

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: String,
    pub text: String,
}

impl Notice {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity: severity.tag().to_string(),
            text: text.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::from_tag(&self.severity)
    }
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RegisterMetadata(Placement),
    RemovePlacement(PlacementId),
    RequestDownload(PlacementId),
    SendChunk(ChunkPayload),
    ReceivedChunk(PlacementId),
    FinishedTransfer(PlacementId),
    CancelTransfer(PlacementId),
    RegisterVersion(String),
    ConfirmUser(Vec<Placement>),
    FeatureRequest,
    Feature(Vec<String>),
    Modify(ModifyUpdate),
    ModifyRequest(PlacementId),
    ModifyDeny(PlacementId),
    ModifyAccept(PlacementId),
    ModifyFinish(ModifyFinish),
    Notice(Notice),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::RegisterMetadata(_) => MessageKind::RegisterMetadata,
            Message::RemovePlacement(_) => MessageKind::RemovePlacement,
            Message::RequestDownload(_) => MessageKind::RequestDownload,
            Message::SendChunk(_) => MessageKind::SendChunk,
            Message::ReceivedChunk(_) => MessageKind::ReceivedChunk,
            Message::FinishedTransfer(_) => MessageKind::FinishedTransfer,
            Message::CancelTransfer(_) => MessageKind::CancelTransfer,
            Message::RegisterVersion(_) => MessageKind::RegisterVersion,
            Message::ConfirmUser(_) => MessageKind::ConfirmUser,
            Message::FeatureRequest => MessageKind::FeatureRequest,
            Message::Feature(_) => MessageKind::Feature,
            Message::Modify(_) => MessageKind::Modify,
            Message::ModifyRequest(_) => MessageKind::ModifyRequest,
            Message::ModifyDeny(_) => MessageKind::ModifyDeny,
            Message::ModifyAccept(_) => MessageKind::ModifyAccept,
            Message::ModifyFinish(_) => MessageKind::ModifyFinish,
            Message::Notice(_) => MessageKind::Notice,
        }
    }

    /// The placement id this message is correlated with, if any
    pub fn placement_id(&self) -> Option<PlacementId> {
        match self {
            Message::RegisterMetadata(p) => Some(p.id),
            Message::RemovePlacement(id)
            | Message::RequestDownload(id)
            | Message::ReceivedChunk(id)
            | Message::FinishedTransfer(id)
            | Message::CancelTransfer(id)
            | Message::ModifyRequest(id)
            | Message::ModifyDeny(id)
            | Message::ModifyAccept(id) => Some(*id),
            Message::SendChunk(chunk) => Some(chunk.placement),
            Message::Modify(update) => Some(update.placement),
            Message::ModifyFinish(finish) => Some(finish.placement),
            Message::RegisterVersion(_)
            | Message::ConfirmUser(_)
            | Message::FeatureRequest
            | Message::Feature(_)
            | Message::Notice(_) => None,
        }
    }

    /// Encode the payload for this message's channel
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let encoded = match self {
            Message::RegisterMetadata(p) => to_payload(p),
            Message::RemovePlacement(id)
            | Message::RequestDownload(id)
            | Message::ReceivedChunk(id)
            | Message::FinishedTransfer(id)
            | Message::CancelTransfer(id)
            | Message::ModifyRequest(id)
            | Message::ModifyDeny(id)
            | Message::ModifyAccept(id) => to_payload(id),
            Message::SendChunk(chunk) => to_payload(chunk),
            Message::RegisterVersion(version) => to_payload(version),
            Message::ConfirmUser(placements) => to_payload(placements),
            Message::FeatureRequest => Ok(Vec::new()),
            Message::Feature(tags) => to_payload(tags),
            Message::Modify(update) => to_payload(update),
            Message::ModifyFinish(finish) => to_payload(finish),
            Message::Notice(notice) => to_payload(notice),
        }?;

        if encoded.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::Encode(format!(
                "{} payload is {} bytes (max: {})",
                self.kind().name(),
                encoded.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(Bytes::from(encoded))
    }

    /// Decode a payload received on the channel for `kind`
    pub fn decode(kind: MessageKind, payload: &[u8]) -> ProtocolResult<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(malformed(kind, format!("payload of {} bytes", payload.len())));
        }
        let message = match kind {
            MessageKind::RegisterMetadata => Message::RegisterMetadata(from_payload(kind, payload)?),
            MessageKind::RemovePlacement => Message::RemovePlacement(from_payload(kind, payload)?),
            MessageKind::RequestDownload => Message::RequestDownload(from_payload(kind, payload)?),
            MessageKind::SendChunk => {
                let chunk: ChunkPayload = from_payload(kind, payload)?;
                if chunk.byte_count as usize != chunk.data.len() {
                    return Err(malformed(
                        kind,
                        format!(
                            "byte count {} does not match {} data bytes",
                            chunk.byte_count,
                            chunk.data.len()
                        ),
                    ));
                }
                Message::SendChunk(chunk)
            }
            MessageKind::ReceivedChunk => Message::ReceivedChunk(from_payload(kind, payload)?),
            MessageKind::FinishedTransfer => Message::FinishedTransfer(from_payload(kind, payload)?),
            MessageKind::CancelTransfer => Message::CancelTransfer(from_payload(kind, payload)?),
            MessageKind::RegisterVersion => Message::RegisterVersion(from_payload(kind, payload)?),
            MessageKind::ConfirmUser => Message::ConfirmUser(from_payload(kind, payload)?),
            MessageKind::FeatureRequest => Message::FeatureRequest,
            MessageKind::Feature => Message::Feature(from_payload(kind, payload)?),
            MessageKind::Modify => Message::Modify(from_payload(kind, payload)?),
            MessageKind::ModifyRequest => Message::ModifyRequest(from_payload(kind, payload)?),
            MessageKind::ModifyDeny => Message::ModifyDeny(from_payload(kind, payload)?),
            MessageKind::ModifyAccept => Message::ModifyAccept(from_payload(kind, payload)?),
            MessageKind::ModifyFinish => Message::ModifyFinish(from_payload(kind, payload)?),
            MessageKind::Notice => Message::Notice(from_payload(kind, payload)?),
        };
        Ok(message)
    }
}

fn to_payload<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn from_payload<T: DeserializeOwned>(kind: MessageKind, payload: &[u8]) -> ProtocolResult<T> {
    postcard::from_bytes(payload).map_err(|e| malformed(kind, e.to_string()))
}

fn malformed(kind: MessageKind, reason: String) -> ProtocolError {
    ProtocolError::Malformed {
        kind: kind.name(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use blueprint_core::{BlockPos, Checksum};

    use super::*;

    #[test]
    fn test_identifiers_are_unique_and_namespaced() {
        let ids: HashSet<&str> = MessageKind::ALL.iter().map(|k| k.identifier()).collect();
        assert_eq!(ids.len(), MessageKind::ALL.len());
        for kind in MessageKind::ALL {
            assert!(kind.identifier().starts_with("blueprint:"));
            assert_eq!(MessageKind::from_identifier(kind.identifier()), Some(kind));
        }
        assert_eq!(MessageKind::from_identifier("minecraft:register"), None);
        assert_eq!(MessageKind::SendChunk.name(), "send_chunk");
    }

    #[test]
    fn test_confirm_user_carries_all_records() {
        let placements: Vec<Placement> = (0..3)
            .map(|i| {
                Placement::new(
                    format!("build-{i}"),
                    Checksum::of(&[i as u8]),
                    Identity::unknown(),
                    PlacementOrigin::new(BlockPos::new(i, 0, 0), "overworld"),
                )
            })
            .collect();
        let msg = Message::ConfirmUser(placements.clone());
        let payload = msg.encode().unwrap();
        match Message::decode(MessageKind::ConfirmUser, &payload).unwrap() {
            Message::ConfirmUser(decoded) => assert_eq!(decoded, placements),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_chunk_byte_count_mismatch_is_malformed() {
        let mut chunk = ChunkPayload::new(PlacementId::from_u128(9), Bytes::from_static(b"abcd"));
        chunk.byte_count = 10;
        let payload = Message::SendChunk(chunk).encode().unwrap();
        let result = Message::decode(MessageKind::SendChunk, &payload);
        assert!(matches!(
            result,
            Err(ProtocolError::Malformed { kind: "send_chunk", .. })
        ));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let payload = Message::ModifyRequest(PlacementId::from_u128(1)).encode().unwrap();
        let result = Message::decode(MessageKind::ModifyRequest, &payload[..4]);
        assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn test_feature_request_has_empty_payload() {
        assert!(Message::FeatureRequest.encode().unwrap().is_empty());
        assert_eq!(
            Message::decode(MessageKind::FeatureRequest, &[]).unwrap(),
            Message::FeatureRequest
        );
    }

    #[test]
    fn test_placement_correlation() {
        let id = PlacementId::from_u128(77);
        assert_eq!(Message::ReceivedChunk(id).placement_id(), Some(id));
        assert_eq!(
            Message::SendChunk(ChunkPayload::new(id, Bytes::new())).placement_id(),
            Some(id)
        );
        assert_eq!(Message::RegisterVersion("0.3.2".into()).placement_id(), None);
    }

    #[test]
    fn test_notice_severity() {
        let notice = Notice::new(Severity::Warning, "careful");
        assert_eq!(notice.severity, "WARNING");
        assert_eq!(notice.severity(), Severity::Warning);
    }
}
