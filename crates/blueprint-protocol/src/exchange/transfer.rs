//! Chunked artifact transfer
//!
//! Transfers are pull-paced: the uploader sends one chunk, then waits for
//! the receiver's `received_chunk` acknowledgement before reading the next.
//! An empty read ends the transfer with `finished_transfer`. Either side may
//! abort with `cancel_transfer`; the side receiving it closes silently.

use std::any::Any;
use std::io::{ErrorKind, Read};

use blueprint_core::{ArtifactSink, ChecksumHasher, PeerId, Placement, PlacementId, Severity};
use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::{Exchange, ExchangeId, ExchangeKind, Lifecycle};
use crate::context::ProtocolContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{ChunkPayload, Message};

/// Maximum artifact bytes carried by one `send_chunk`
pub const CHUNK_SIZE: usize = 16384;

/// Fill `buf` as far as the source allows; returns the number of bytes read
fn read_chunk(source: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Serves an artifact's bytes to a requesting peer
pub struct UploadExchange {
    id: ExchangeId,
    partner: PeerId,
    placement: Placement,
    lifecycle: Lifecycle,
    source: Option<Box<dyn Read + Send>>,
    sent_bytes: u64,
}

impl UploadExchange {
    pub fn new(id: ExchangeId, partner: PeerId, placement: Placement) -> Self {
        Self {
            id,
            partner,
            placement,
            lifecycle: Lifecycle::new(),
            source: None,
            sent_bytes: 0,
        }
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    fn send_next_chunk(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| ProtocolError::InvalidState("upload source not open".into()))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let read = read_chunk(&mut **source, &mut buf)
            .map_err(|e| ProtocolError::TransferIo(e.to_string()))?;

        if read == 0 {
            debug!(
                placement = %self.placement.id,
                bytes = self.sent_bytes,
                "upload complete"
            );
            cx.send(self.partner, &Message::FinishedTransfer(self.placement.id))?;
            self.succeed(cx);
            return Ok(());
        }

        buf.truncate(read);
        let chunk = ChunkPayload::new(self.placement.id, Bytes::from(buf));
        cx.send(self.partner, &Message::SendChunk(chunk))?;
        self.sent_bytes += read as u64;

        let name = cx.peer_name(self.partner);
        cx.quota.progress_quota(&name, read as u64);
        trace!(placement = %self.placement.id, bytes = read, "chunk sent");
        Ok(())
    }
}

impl Exchange for UploadExchange {
    fn id(&self) -> ExchangeId {
        self.id
    }

    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Upload
    }

    fn partner(&self) -> PeerId {
        self.partner
    }

    fn placement(&self) -> Option<PlacementId> {
        Some(self.placement.id)
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn check_packet(&self, message: &Message) -> bool {
        match message {
            Message::ReceivedChunk(id) | Message::CancelTransfer(id) => *id == self.placement.id,
            _ => false,
        }
    }

    fn init(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        self.source = Some(cx.services.store.open_read(&self.placement)?);
        self.send_next_chunk(cx)
    }

    fn handle(&mut self, message: Message, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        match message {
            Message::ReceivedChunk(_) => self.send_next_chunk(cx),
            Message::CancelTransfer(_) => {
                debug!(placement = %self.placement.id, "upload cancelled by receiver");
                self.close(false, cx);
                Ok(())
            }
            other => Err(ProtocolError::InvalidState(format!(
                "upload cannot handle {}",
                other.kind()
            ))),
        }
    }

    fn cancel_message(&self) -> Option<Message> {
        Some(Message::CancelTransfer(self.placement.id))
    }

    fn on_close(&mut self, _cx: &mut ProtocolContext) {
        self.source = None;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Pulls an artifact's bytes from a peer into a staging sink
pub struct DownloadExchange {
    id: ExchangeId,
    partner: PeerId,
    placement: Placement,
    lifecycle: Lifecycle,
    sink: Option<Box<dyn ArtifactSink>>,
    hasher: ChecksumHasher,
    received_bytes: u64,
}

impl DownloadExchange {
    pub fn new(id: ExchangeId, partner: PeerId, placement: Placement) -> Self {
        Self {
            id,
            partner,
            placement,
            lifecycle: Lifecycle::new(),
            sink: None,
            hasher: ChecksumHasher::new(),
            received_bytes: 0,
        }
    }

    pub fn placement_record(&self) -> &Placement {
        &self.placement
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    fn receive_chunk(&mut self, chunk: ChunkPayload, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        let len = chunk.data.len() as u64;
        let name = cx.peer_name(self.partner);
        if cx.quota.is_over_quota(&name, len) {
            warn!(peer = %name, placement = %self.placement.id, "transfer quota exceeded");
            cx.notify_peer(
                self.partner,
                Severity::Error,
                &format!("Transfer quota of {} bytes exceeded", cx.quota.limit()),
            );
            return Err(ProtocolError::QuotaExceeded {
                peer: name,
                limit: cx.quota.limit(),
            });
        }

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| ProtocolError::InvalidState("download sink not open".into()))?;
        sink.write_chunk(&chunk.data)?;
        self.hasher.update(&chunk.data);
        self.received_bytes += len;
        cx.quota.progress_quota(&name, len);

        cx.send(self.partner, &Message::ReceivedChunk(self.placement.id))
    }

    fn finish(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        let actual = self.hasher.finalize();
        if actual != self.placement.checksum {
            warn!(placement = %self.placement.id, "downloaded bytes fail checksum");
            self.close(false, cx);
            return Err(ProtocolError::ChecksumMismatch {
                placement: self.placement.id,
                expected: self.placement.checksum,
                actual,
            });
        }

        let sink = self
            .sink
            .take()
            .ok_or_else(|| ProtocolError::InvalidState("download sink not open".into()))?;
        let stored = sink.commit()?;
        if stored != self.placement.checksum {
            warn!(placement = %self.placement.id, %stored, "store committed different bytes");
            self.close(false, cx);
            return Err(ProtocolError::ChecksumMismatch {
                placement: self.placement.id,
                expected: self.placement.checksum,
                actual: stored,
            });
        }
        debug!(
            placement = %self.placement.id,
            bytes = self.received_bytes,
            "download complete"
        );
        self.succeed(cx);
        Ok(())
    }
}

impl Exchange for DownloadExchange {
    fn id(&self) -> ExchangeId {
        self.id
    }

    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Download
    }

    fn partner(&self) -> PeerId {
        self.partner
    }

    fn placement(&self) -> Option<PlacementId> {
        Some(self.placement.id)
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn check_packet(&self, message: &Message) -> bool {
        match message {
            Message::SendChunk(chunk) => chunk.placement == self.placement.id,
            Message::FinishedTransfer(id) | Message::CancelTransfer(id) => {
                *id == self.placement.id
            }
            _ => false,
        }
    }

    fn init(&mut self, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        self.sink = Some(cx.services.store.create_write(&self.placement)?);
        cx.send(self.partner, &Message::RequestDownload(self.placement.id))
    }

    fn handle(&mut self, message: Message, cx: &mut ProtocolContext) -> ProtocolResult<()> {
        match message {
            Message::SendChunk(chunk) => self.receive_chunk(chunk, cx),
            Message::FinishedTransfer(_) => self.finish(cx),
            Message::CancelTransfer(_) => {
                debug!(placement = %self.placement.id, "download cancelled by sender");
                self.close(false, cx);
                Ok(())
            }
            other => Err(ProtocolError::InvalidState(format!(
                "download cannot handle {}",
                other.kind()
            ))),
        }
    }

    fn cancel_message(&self) -> Option<Message> {
        Some(Message::CancelTransfer(self.placement.id))
    }

    fn on_close(&mut self, _cx: &mut ProtocolContext) {
        if let Some(sink) = self.sink.take() {
            sink.discard();
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos == self.data.len() {
                return Ok(0);
            }
            // at most 100 bytes per call
            let n = buf.len().min(100).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_read_chunk_fills_buffer_from_short_reads() {
        let mut source = Trickle {
            data: vec![7u8; 1000],
            pos: 0,
        };
        let mut buf = vec![0u8; 512];
        assert_eq!(read_chunk(&mut source, &mut buf).unwrap(), 512);
        assert_eq!(read_chunk(&mut source, &mut buf).unwrap(), 488);
        assert_eq!(read_chunk(&mut source, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_chunk_empty_source() {
        let mut source = Cursor::new(Vec::<u8>::new());
        let mut buf = vec![0u8; CHUNK_SIZE];
        assert_eq!(read_chunk(&mut source, &mut buf).unwrap(), 0);
    }
}
