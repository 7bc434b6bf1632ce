//! Transfer quota
//!
//! Tracks cumulative transferred bytes per peer identity and enforces a
//! hard limit. A disabled guard records nothing and never reports a peer
//! as over quota.

use std::collections::HashMap;

use crate::config::QuotaConfig;

/// Default per-peer limit in bytes
pub const DEFAULT_QUOTA_LIMIT: u64 = 40_000_000;

/// Per-peer cumulative byte ledger with a hard limit
#[derive(Debug, Clone)]
pub struct QuotaGuard {
    enabled: bool,
    limit: u64,
    progress: HashMap<String, u64>,
}

impl Default for QuotaGuard {
    fn default() -> Self {
        Self::disabled()
    }
}

impl QuotaGuard {
    pub fn new(enabled: bool, limit: u64) -> Self {
        Self {
            enabled,
            limit,
            progress: HashMap::new(),
        }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.enabled, config.limit)
    }

    /// A guard that never blocks anything
    pub fn disabled() -> Self {
        Self::new(false, DEFAULT_QUOTA_LIMIT)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Whether attributing `new_data` more bytes to `peer` would exceed the limit
    pub fn is_over_quota(&self, peer: &str, new_data: u64) -> bool {
        if !self.enabled {
            return false;
        }
        self.usage(peer).saturating_add(new_data) > self.limit
    }

    /// Attribute transferred bytes to `peer`
    pub fn progress_quota(&mut self, peer: &str, new_data: u64) {
        if self.enabled {
            let entry = self.progress.entry(peer.to_string()).or_insert(0);
            *entry = entry.saturating_add(new_data);
        }
    }

    /// Bytes attributed to `peer` so far
    pub fn usage(&self, peer: &str) -> u64 {
        self.progress.get(peer).copied().unwrap_or(0)
    }
}
