//! # Blueprint Protocol
//!
//! Exchange-based sync protocol keeping a host's placement registry
//! mirrored on its clients.
//!
//! Every dialogue between two peers is an [`Exchange`]: the version
//! handshake, chunked uploads and downloads, and modify-lock acquisition.
//! A [`HostDispatcher`] or [`ClientDispatcher`] routes inbound messages to
//! the exchange that claims them and handles the rest at top level.
//!
//! ## Features
//!
//! - Version handshake with feature negotiation and feature-request fallback
//! - Pull-paced chunked transfer with per-chunk acknowledgement
//! - Single-writer modify locks with the host as authority
//! - Channel capability discovery filtered to the protocol's own channels
//! - Per-peer transfer quota
//! - Serialized tokio runtime and an in-process loopback network
//!
//! ## Example
//!
//! ```rust,ignore
//! use blueprint_protocol::{ClientConfig, HostConfig, LoopbackNetwork};
//!
//! let mut net = LoopbackNetwork::new(&HostConfig::default(), host_services);
//! let client = net.add_client(&ClientConfig::default(), client_services)?;
//! net.run_until_idle();
//!
//! let id = net.client(client).context().services.registry.list()[0].id;
//! net.client_mut(client).request_download(id)?;
//! net.run_until_idle();
//! ```

pub mod channel;
pub mod config;
pub mod context;
pub mod debug;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod feature;
pub mod lock;
pub mod loopback;
pub mod message;
pub mod quota;
pub mod runtime;

pub use channel::{ChannelNegotiator, REGISTER_CHANNEL, UNREGISTER_CHANNEL, parse_channel_list};
pub use config::{
    ClientConfig, DebugConfig, HostConfig, ProtocolConfig, QuotaConfig, client_features,
    host_features,
};
pub use context::{Collaborators, ProtocolContext, Role};
pub use debug::PacketLogger;
pub use dispatcher::{ClientDispatcher, ExchangeSet, HostDispatcher, Routed};
pub use endpoint::{Outbound, PeerEndpoint, PeerLink};
pub use error::{ProtocolError, ProtocolResult};
pub use exchange::{
    CHUNK_SIZE, DownloadExchange, Exchange, ExchangeId, ExchangeKind, ExchangeState,
    HandshakeClient, HandshakeServer, Lifecycle, ModifyExchangeClient, ModifyExchangeServer,
    UploadExchange,
};
pub use feature::{Feature, FeatureSet, PROTOCOL_VERSION, VersionPolicy};
pub use lock::ModifyLockTable;
pub use loopback::{Frame, HOST_PEER, LoopbackNetwork, Node, client_peer};
pub use message::{
    ChunkPayload, MAX_PAYLOAD_SIZE, Message, MessageKind, ModifyFinish, ModifyUpdate, NAMESPACE,
    Notice,
};
pub use quota::{DEFAULT_QUOTA_LIMIT, QuotaGuard};
pub use runtime::{
    ChannelOutbound, Dispatch, DispatcherRuntime, InboundEvent, OutboundEvent, RuntimeHandle,
};
