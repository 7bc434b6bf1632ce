//! Configuration types for the protocol core
//!
//! The persisted part is [`ProtocolConfig`], a small JSON document with two
//! sections. Every field has a default, so an empty object is valid.

use std::path::Path;

use blueprint_core::Identity;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::feature::{Feature, FeatureSet, PROTOCOL_VERSION, VersionPolicy};
use crate::quota::DEFAULT_QUOTA_LIMIT;

/// Transfer quota configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Whether the host enforces the per-peer limit
    pub enabled: bool,

    /// Per-peer cumulative limit in bytes
    pub limit: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: DEFAULT_QUOTA_LIMIT,
        }
    }
}

/// Debug configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Log every inbound and outbound protocol packet
    #[serde(alias = "doPackageLogging")]
    pub packet_logging: bool,
}

/// Persisted protocol configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub quota: QuotaConfig,
    pub debug: DebugConfig,
}

impl ProtocolConfig {
    pub fn from_json_str(json: &str) -> ProtocolResult<Self> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Config(e.to_string()))
    }

    /// Load from a JSON file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> ProtocolResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json_str(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no protocol config, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ProtocolError::Config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn to_json_pretty(&self) -> ProtocolResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ProtocolError::Config(e.to_string()))
    }
}

/// Capabilities a host announces
pub fn host_features() -> FeatureSet {
    FeatureSet::new([
        Feature::Debug,
        Feature::Core,
        Feature::Feature,
        Feature::Modify,
        Feature::Message,
        Feature::CoreEx,
        Feature::Quota,
    ])
}

/// Capabilities a client announces
pub fn client_features() -> FeatureSet {
    FeatureSet::new([
        Feature::Debug,
        Feature::Core,
        Feature::Feature,
        Feature::Modify,
        Feature::Message,
        Feature::CoreEx,
    ])
}

/// Host-side settings
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Version string announced to clients
    pub version: String,

    /// Compatibility predicate applied to client versions
    pub version_policy: VersionPolicy,

    /// Capabilities answered to feature requests
    pub features: FeatureSet,

    pub protocol: ProtocolConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            version_policy: VersionPolicy::default(),
            features: host_features(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Client-side settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Version string announced to the host
    pub version: String,

    /// Compatibility predicate applied to the host version
    pub version_policy: VersionPolicy,

    /// Capabilities answered to feature requests
    pub features: FeatureSet,

    /// Identity used as owner of shared placements and as editor
    pub local_identity: Identity,

    /// Name of the world/server the client is connected to
    pub server_name: String,

    pub protocol: ProtocolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            version_policy: VersionPolicy::default(),
            features: client_features(),
            local_identity: Identity::unknown(),
            server_name: "localhost".to_string(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.local_identity = identity;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }
}
