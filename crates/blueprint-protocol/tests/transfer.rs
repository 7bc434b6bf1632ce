//! Chunked transfer, sharing and quota enforcement

mod common;

use blueprint_core::{Checksum, Placement, PlacementRegistry, Severity};
use blueprint_protocol::{
    CHUNK_SIZE, ClientConfig, HostConfig, Message, MessageKind, Node, ProtocolConfig,
    ProtocolError, QuotaConfig,
};

use common::{Star, artifact, origin, player};

fn quota_host(limit: u64) -> HostConfig {
    HostConfig::default().with_protocol(ProtocolConfig {
        quota: QuotaConfig {
            enabled: true,
            limit,
        },
        ..ProtocolConfig::default()
    })
}

/// Download `len` bytes from the host and return the chunk payload sizes
fn download(len: usize) -> (Star, Placement, Vec<usize>) {
    let mut star = Star::started(1);
    let placement = star.publish(artifact(len), "artifact.litematic");
    star.net.run_until_idle();
    star.net.clear_frames();

    let started = star.net.client_mut(0).request_download(placement.id).unwrap();
    assert!(started.is_some());
    star.net.run_until_idle();

    let sizes = star
        .sent(Node::Host, MessageKind::SendChunk)
        .into_iter()
        .map(|m| match m {
            Message::SendChunk(chunk) => chunk.data.len(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    (star, placement, sizes)
}

#[test]
fn test_forty_kilobyte_upload_is_ack_paced() {
    let (star, placement, sizes) = download(40_000);
    assert_eq!(sizes, vec![16_384, 16_384, 7_232]);

    use MessageKind::*;
    assert_eq!(
        star.kinds(),
        vec![
            RequestDownload,
            SendChunk,
            ReceivedChunk,
            SendChunk,
            ReceivedChunk,
            SendChunk,
            ReceivedChunk,
            FinishedTransfer,
        ]
    );
    assert!(
        star.net
            .frames()
            .iter()
            .filter_map(|f| f.kind().map(|_| common::decode(f)))
            .all(|m| m.placement_id() == Some(placement.id))
    );
}

#[test]
fn test_reassembled_bytes_match_original() {
    for len in [0, 1, CHUNK_SIZE, 2 * CHUNK_SIZE, CHUNK_SIZE + 1, 40_000] {
        let (star, placement, sizes) = download(len);
        let side = &star.clients[0];

        assert_eq!(side.store.bytes(&placement.checksum), Some(artifact(len)));
        assert_eq!(sizes.len(), len.div_ceil(CHUNK_SIZE), "chunks for {len} bytes");
        assert_eq!(sizes.iter().sum::<usize>(), len);
        assert_eq!(star.sent(Node::Host, MessageKind::FinishedTransfer).len(), 1);
        assert_eq!(side.store.staging_count(), 0);
    }
}

#[test]
fn test_download_marks_and_renders() {
    let (star, placement, _) = download(1_000);
    let side = &star.clients[0];

    assert!(side.placement(&placement).unwrap().downloaded);
    assert!(side.renderer.rendered(&placement.id).is_some());
    assert!(star.net.errors().is_empty());
    assert!(star.net.host().exchanges().iter().next().is_none());
}

#[test]
fn test_present_artifact_is_not_fetched() {
    let mut star = Star::started(1);
    let bytes = artifact(300);
    let placement = star.publish(bytes.clone(), "local.litematic");
    star.net.run_until_idle();
    star.clients[0].store.insert(bytes);
    star.net.clear_frames();

    let started = star.net.client_mut(0).request_download(placement.id).unwrap();
    assert!(started.is_none());
    assert!(star.clients[0].renderer.rendered(&placement.id).is_some());
    assert_eq!(star.net.pending(), 0);
}

#[test]
fn test_read_failure_cancels_only_the_transfer() {
    let mut star = Star::started(1);
    let placement = star.publish(artifact(40_000), "broken.litematic");
    star.host.store.poison_reads(placement.checksum, 20_000);
    star.net.run_until_idle();
    star.net.clear_frames();

    star.net.client_mut(0).request_download(placement.id).unwrap();
    star.net.run_until_idle();

    assert_eq!(star.sent(Node::Host, MessageKind::SendChunk).len(), 1);
    assert_eq!(star.sent(Node::Host, MessageKind::CancelTransfer).len(), 1);
    assert!(star.sent(Node::Host, MessageKind::FinishedTransfer).is_empty());
    // the receiver does not echo the cancellation
    assert!(star.sent(Node::Client(0), MessageKind::CancelTransfer).is_empty());

    assert!(matches!(
        star.net.errors(),
        [(Node::Host, ProtocolError::TransferIo(_))]
    ));
    let side = &star.clients[0];
    assert_eq!(side.store.bytes(&placement.checksum), None);
    assert_eq!(side.store.staging_count(), 0);
    assert_eq!(side.errors().len(), 1);
    assert!(star.net.is_connected(0));
}

#[test]
fn test_checksum_mismatch_discards_download() {
    let mut star = Star::started(1);
    let placement = star.publish(artifact(5_000), "tampered.litematic");
    star.net.run_until_idle();

    let mut wrong = star.clients[0].placement(&placement).unwrap();
    wrong.checksum = Checksum::of(b"something else");
    star.clients[0].registry.update(wrong.clone()).unwrap();

    star.net.client_mut(0).request_download(placement.id).unwrap();
    star.net.run_until_idle();

    assert!(matches!(
        star.net.errors(),
        [(Node::Client(0), ProtocolError::ChecksumMismatch { .. })]
    ));
    let side = &star.clients[0];
    assert_eq!(side.store.bytes(&placement.checksum), None);
    assert_eq!(side.store.staging_count(), 0);
    assert!(!side.placement(&placement).unwrap().downloaded);
}

#[test]
fn test_store_commit_mismatch_fails_download() {
    let mut star = Star::started(1);
    let placement = star.publish(artifact(20_000), "drifted.litematic");
    star.net.run_until_idle();
    star.clients[0].store.corrupt_commit(placement.id);

    star.net.client_mut(0).request_download(placement.id).unwrap();
    star.net.run_until_idle();

    let [(Node::Client(0), ProtocolError::ChecksumMismatch { expected, actual, .. })] =
        star.net.errors()
    else {
        panic!("unexpected errors: {:?}", star.net.errors());
    };
    assert_eq!(*expected, placement.checksum);
    assert_ne!(*actual, placement.checksum);

    let side = &star.clients[0];
    assert_eq!(side.store.bytes(&placement.checksum), None);
    assert!(!side.placement(&placement).unwrap().downloaded);
    assert!(side.renderer.rendered(&placement.id).is_none());
}

#[test]
fn test_unknown_placement_request_is_refused() {
    let mut star = Star::started(1);
    let ghost = Placement::new("ghost", Checksum::of(b"ghost"), player(5), origin());
    star.clients[0].registry.add(ghost.clone()).unwrap();

    star.net.client_mut(0).request_download(ghost.id).unwrap();
    star.net.run_until_idle();

    assert_eq!(
        star.sent(Node::Host, MessageKind::CancelTransfer),
        vec![Message::CancelTransfer(ghost.id)]
    );
    assert_eq!(star.clients[0].store.staging_count(), 0);
    assert_eq!(star.clients[0].errors().len(), 1);
}

#[test]
fn test_share_uploads_to_host_and_broadcasts() {
    let mut star = Star::started(2);
    let bytes = artifact(20_000);
    let checksum = star.clients[0].store.insert(bytes.clone());
    let placement = Placement::new("shared.litematic", checksum, player(0), origin());

    star.net.client_mut(0).share(placement.clone()).unwrap();
    assert!(star.net.client(0).is_sharing(&placement.id));
    star.net.run_until_idle();

    assert!(star.net.errors().is_empty());
    assert_eq!(star.host.store.bytes(&checksum), Some(bytes));
    assert_eq!(star.host.placement(&placement).unwrap().owner, player(0));

    // the sharer renders its own placement, others only learn about it
    let sharer = &star.clients[0];
    assert!(sharer.placement(&placement).unwrap().downloaded);
    assert!(sharer.renderer.rendered(&placement.id).is_some());
    assert!(!star.net.client(0).is_sharing(&placement.id));
    let other = &star.clients[1];
    assert!(!other.placement(&placement).unwrap().downloaded);
    assert_eq!(other.renderer.rendered_count(), 0);

    assert_eq!(star.sent(Node::Host, MessageKind::RequestDownload).len(), 1);
    assert_eq!(star.sent(Node::Host, MessageKind::RegisterMetadata).len(), 2);
}

#[test]
fn test_share_of_known_artifact_registers_immediately() {
    let mut star = Star::started(1);
    let bytes = artifact(2_000);
    let checksum = star.clients[0].store.insert(bytes.clone());
    star.host.store.insert(bytes);
    let placement = Placement::new("dup.litematic", checksum, player(0), origin());

    star.net.client_mut(0).share(placement.clone()).unwrap();
    star.net.run_until_idle();

    assert!(star.sent(Node::Host, MessageKind::RequestDownload).is_empty());
    assert!(star.host.placement(&placement).is_some());
}

#[test]
fn test_share_requires_local_bytes() {
    let mut star = Star::started(1);
    let placement = Placement::new("missing", Checksum::of(b"nope"), player(0), origin());
    let err = star.net.client_mut(0).share(placement).unwrap_err();
    assert!(matches!(err, ProtocolError::Store(_)));
}

#[test]
fn test_quota_stops_oversized_share() {
    let mut star = Star::new(quota_host(50_000));
    star.add_client(ClientConfig::default());
    star.net.run_until_idle();

    let first = artifact(40_000);
    let checksum = star.clients[0].store.insert(first);
    let accepted = Placement::new("first", checksum, player(0), origin());
    star.net.client_mut(0).share(accepted.clone()).unwrap();
    star.net.run_until_idle();
    assert!(star.host.placement(&accepted).is_some());

    let second: Vec<u8> = artifact(40_000).into_iter().rev().collect();
    let checksum = star.clients[0].store.insert(second);
    let refused = Placement::new("second", checksum, player(0), origin());
    star.net.client_mut(0).share(refused.clone()).unwrap();
    star.net.run_until_idle();

    assert!(star.host.placement(&refused).is_none());
    assert_eq!(star.host.store.staging_count(), 0);
    assert!(matches!(
        star.net.errors(),
        [(Node::Host, ProtocolError::QuotaExceeded { limit: 50_000, .. })]
    ));
    let notices = star.clients[0].notifier.received();
    assert!(
        notices
            .iter()
            .any(|(severity, text)| *severity == Severity::Error && text.contains("quota"))
    );
    assert_eq!(star.net.host().context().quota.usage(&session_name(0)), 40_000);
    assert!(!star.net.client(0).is_sharing(&refused.id));
}

#[test]
fn test_share_of_registered_placement_is_settled() {
    let mut star = Star::started(1);
    let bytes = artifact(3_000);
    let placement = star.publish(bytes.clone(), "known.litematic");
    star.net.run_until_idle();
    star.clients[0].store.insert(bytes);
    star.net.clear_frames();

    star.net.client_mut(0).share(placement.clone()).unwrap();
    star.net.run_until_idle();

    assert!(star.net.errors().is_empty());
    assert!(star.sent(Node::Host, MessageKind::RequestDownload).is_empty());
    assert_eq!(
        star.sent(Node::Host, MessageKind::RegisterMetadata),
        vec![Message::RegisterMetadata(placement.clone())]
    );
    assert!(!star.net.client(0).is_sharing(&placement.id));
}

#[test]
fn test_declined_share_is_forgotten() {
    let mut star = Star::started(1);
    let checksum = star.clients[0].store.insert(artifact(1_000));
    let placement = Placement::new("declined.litematic", checksum, player(0), origin());

    star.net.client_mut(0).share(placement.clone()).unwrap();
    let cancel = Message::CancelTransfer(placement.id).encode().unwrap();
    star.net
        .inject_to_client(0, MessageKind::CancelTransfer.identifier(), cancel);
    star.net.run_until_idle();

    assert!(!star.net.client(0).is_sharing(&placement.id));
}

#[test]
fn test_quota_refuses_new_downloads_once_exhausted() {
    let mut star = Star::new(quota_host(50_000));
    star.add_client(ClientConfig::default());
    star.net.run_until_idle();
    let placements: Vec<_> = (0..3u8)
        .map(|n| {
            let bytes: Vec<u8> = artifact(30_000).into_iter().map(|b| b ^ n).collect();
            star.publish(bytes, &format!("p{n}"))
        })
        .collect();
    star.net.run_until_idle();

    for placement in &placements {
        star.net.client_mut(0).request_download(placement.id).unwrap();
        star.net.run_until_idle();
    }

    let side = &star.clients[0];
    assert!(side.store.bytes(&placements[0].checksum).is_some());
    assert!(side.store.bytes(&placements[1].checksum).is_some());
    assert!(side.store.bytes(&placements[2].checksum).is_none());
    assert_eq!(side.store.staging_count(), 0);
    assert!(matches!(
        star.net.errors(),
        [(Node::Host, ProtocolError::QuotaExceeded { .. })]
    ));

    let quota = &star.net.host().context().quota;
    assert_eq!(quota.usage(&session_name(0)), 60_000);
    assert!(quota.is_over_quota(&session_name(0), 0));
}

#[test]
fn test_clients_never_enforce_quota() {
    let star = Star::started(1);
    assert!(!star.net.client(0).context().quota.is_enabled());
    assert!(!star.net.host().context().quota.is_enabled());
}

fn session_name(index: usize) -> String {
    uuid::Uuid::from_u128(index as u128 + 1).to_string()
}

#[test]
fn test_packet_logging_leaves_traffic_unchanged() {
    let logged = HostConfig::default().with_protocol(ProtocolConfig {
        debug: blueprint_protocol::DebugConfig {
            packet_logging: true,
        },
        ..ProtocolConfig::default()
    });
    let mut star = Star::new(logged);
    star.add_client(ClientConfig::default());
    star.net.run_until_idle();
    assert!(star.net.host().context().packets.is_enabled());

    let placement = star.publish(artifact(20_000), "logged.litematic");
    star.net.run_until_idle();
    star.net.client_mut(0).request_download(placement.id).unwrap();
    star.net.run_until_idle();

    assert_eq!(star.sent(Node::Host, MessageKind::SendChunk).len(), 2);
    assert!(star.clients[0].store.bytes(&placement.checksum).is_some());
}
