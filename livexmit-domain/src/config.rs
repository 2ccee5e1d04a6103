//! Process-wide transfer settings.
//!
//! Built once from the command line and passed by reference to the medium
//! factory and the transfer loop.

use std::time::Duration;

// ---

/// Default maximum chunk size: seven 188-byte transport stream packets.
pub const DEFAULT_CHUNK_SIZE: usize = 1316;

/// Upper bound on one readiness wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Reads per ready source per loop iteration.
pub const DEFAULT_READ_AHEAD: usize = 10;

// ---------------------------------------------------------------------------
// TransmitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TransmitConfig {
    // ---
    /// Maximum bytes per read.
    pub chunk_size: usize,

    /// True when the chunk size was set explicitly. Connection-oriented
    /// media then forward it as their payload size.
    pub chunk_override: bool,

    pub verbose: bool,
    pub quiet: bool,

    /// Recreate a source or target slot after it disconnects.
    pub auto_reconnect: bool,

    /// Log a bandwidth line every N reads on connection-oriented sources
    /// (0 disables).
    pub bw_report: u64,

    /// Log medium statistics every N reads on connection-oriented sources
    /// (0 disables).
    pub stats_report: u64,

    /// Register the `file` scheme (files and console) with the factory.
    pub allow_file_media: bool,

    pub poll_timeout: Duration,
    pub read_ahead: usize,
}

impl Default for TransmitConfig {
    // ---
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_override: false,
            verbose: false,
            quiet: false,
            auto_reconnect: true,
            bw_report: 0,
            stats_report: 0,
            allow_file_media: false,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            read_ahead: DEFAULT_READ_AHEAD,
        }
    }
}

impl TransmitConfig {
    // ---

    /// The payload size to pass to connection-oriented media, if any.
    pub fn payload_override(&self) -> Option<usize> {
        (self.chunk_override && self.chunk_size != DEFAULT_CHUNK_SIZE).then_some(self.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn payload_override_only_when_non_default() {
        // ---
        let mut cfg = TransmitConfig::default();
        assert_eq!(cfg.payload_override(), None);

        cfg.chunk_override = true;
        assert_eq!(cfg.payload_override(), None, "explicit default is not an override");

        cfg.chunk_size = 1000;
        assert_eq!(cfg.payload_override(), Some(1000));
    }
}
