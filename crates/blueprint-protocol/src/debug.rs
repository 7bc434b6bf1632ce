//! Packet logging

use tracing::info;

/// Logs every protocol packet when enabled by configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketLogger {
    enabled: bool,
}

impl PacketLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_receive(&self, channel: &str, source: &str) {
        if self.enabled {
            info!(kind = channel, peer = source, "received packet");
        }
    }

    pub fn log_send(&self, channel: &str, target: &str) {
        if self.enabled {
            info!(kind = channel, peer = target, "sending packet");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        assert!(!PacketLogger::default().is_enabled());
        assert!(PacketLogger::new(true).is_enabled());
    }
}
