//! Host and client dispatchers on their own serialized tasks

mod common;

use std::sync::Arc;

use blueprint_core::{PeerId, Placement, PlacementRegistry};
use blueprint_protocol::{
    ChannelOutbound, ClientConfig, ClientDispatcher, Dispatch, DispatcherRuntime, HostConfig,
    HostDispatcher, InboundEvent, OutboundEvent, PeerLink, RuntimeHandle,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use common::{Side, artifact, origin, player};

const HOST_AS_SEEN_BY_CLIENT: PeerId = PeerId(0);
const CLIENT_AS_SEEN_BY_HOST: PeerId = PeerId(1);

/// Pipe one side's outbound traffic into the other side's mailbox
fn forward<D: Dispatch>(
    mut rx: mpsc::UnboundedReceiver<OutboundEvent>,
    to: RuntimeHandle<D>,
    from: PeerId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let inbound = match event {
                OutboundEvent::Send {
                    channel, payload, ..
                } => InboundEvent::Message {
                    peer: from,
                    channel,
                    payload,
                },
                OutboundEvent::Disconnect { .. } => InboundEvent::Disconnected { peer: from },
            };
            if to.submit(inbound).is_err() {
                break;
            }
        }
    })
}

async fn wait_for<D, F>(handle: &RuntimeHandle<D>, check: F) -> bool
where
    D: Dispatch,
    F: Fn(&mut D) -> bool + Clone + Send + 'static,
{
    for _ in 0..10_000 {
        if handle.call(check.clone()).await.unwrap() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    false
}

#[tokio::test]
async fn test_runtimes_sync_and_transfer() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let host_side = Side::new();
    let checksum = host_side.store.insert(artifact(50_000));
    let placement = Placement::new("remote.litematic", checksum, player(9), origin());
    host_side.registry.add(placement.clone()).unwrap();

    let client_side = Side::new();

    let (host_out, host_rx) = ChannelOutbound::new();
    let (client_out, client_rx) = ChannelOutbound::new();
    let host = DispatcherRuntime::spawn(HostDispatcher::new(
        &HostConfig::default(),
        host_side.services(),
        Arc::new(host_out),
    ));
    let client = DispatcherRuntime::spawn(ClientDispatcher::new(
        &ClientConfig::default().with_identity(player(0)),
        client_side.services(),
        Arc::new(client_out),
    ));
    let to_client = forward(host_rx, client.handle(), HOST_AS_SEEN_BY_CLIENT);
    let to_host = forward(client_rx, host.handle(), CLIENT_AS_SEEN_BY_HOST);

    client
        .handle()
        .submit(InboundEvent::Connected {
            peer: HOST_AS_SEEN_BY_CLIENT,
            link: PeerLink::Host {
                server_name: "runtime-test".into(),
            },
        })
        .unwrap();
    host.handle()
        .submit(InboundEvent::Connected {
            peer: CLIENT_AS_SEEN_BY_HOST,
            link: PeerLink::Client {
                session: Uuid::from_u128(1),
            },
        })
        .unwrap();

    let client_handle = client.handle();
    assert!(wait_for(&client_handle, |c: &mut ClientDispatcher| c.is_started()).await);
    assert!(client_side.registry.contains(&placement.id));

    let id = placement.id;
    let started = client_handle
        .call(move |c: &mut ClientDispatcher| c.request_download(id))
        .await
        .unwrap()
        .unwrap();
    assert!(started.is_some());

    let store = client_side.store.clone();
    assert!(wait_for(&client_handle, move |_: &mut ClientDispatcher| {
        store.bytes(&checksum).is_some()
    })
    .await);
    assert_eq!(client_side.store.bytes(&checksum), Some(artifact(50_000)));

    host.shutdown().await.unwrap();
    client.shutdown().await.unwrap();
    to_client.abort();
    to_host.abort();
}
