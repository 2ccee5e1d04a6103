//! Transfer counters and the end-of-run bandwidth line.

use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// TransferSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TransferSummary {
    // ---
    pub chunks_read: u64,
    pub bytes_read: u64,
    pub chunks_written: u64,
    pub bytes_written: u64,
    /// Chunks read while no target was open.
    pub chunks_dropped: u64,
    /// Slots released for recreation after a disconnect.
    pub reconnects: u64,
    started: Instant,
}

impl Default for TransferSummary {
    // ---
    fn default() -> Self {
        Self {
            chunks_read: 0,
            bytes_read: 0,
            chunks_written: 0,
            bytes_written: 0,
            chunks_dropped: 0,
            reconnects: 0,
            started: Instant::now(),
        }
    }
}

impl TransferSummary {
    // ---

    pub fn on_read(&mut self, len: usize) {
        self.chunks_read += 1;
        self.bytes_read += len as u64;
    }

    pub fn on_written(&mut self, len: usize) {
        self.chunks_written += 1;
        self.bytes_written += len as u64;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `+++/+++LRT TRANSFER: <bytes>B DURATION: <ms>ms SPEED: <kB/s>kB/s`
    pub fn bandwidth_line(&self) -> String {
        // ---
        format_bandwidth(self.bytes_written, self.elapsed())
    }
}

fn format_bandwidth(bytes: u64, elapsed: Duration) -> String {
    // ---
    let ms = elapsed.as_millis().max(1) as u64;
    let kbps = bytes as f64 / ms as f64 * 1000.0 / 1024.0;
    format!("+++/+++LRT TRANSFER: {bytes}B DURATION: {ms}ms SPEED: {kbps:.3}kB/s")
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn bandwidth_line_format() {
        // ---
        let line = format_bandwidth(1_024_000, Duration::from_secs(2));
        assert_eq!(
            line,
            "+++/+++LRT TRANSFER: 1024000B DURATION: 2000ms SPEED: 500.000kB/s"
        );
    }

    // ---

    #[test]
    fn zero_duration_does_not_divide_by_zero() {
        // ---
        let line = format_bandwidth(10, Duration::ZERO);
        assert!(line.contains("DURATION: 1ms"), "got: {line}");
    }

    // ---

    #[test]
    fn counters() {
        // ---
        let mut s = TransferSummary::default();
        s.on_read(100);
        s.on_read(50);
        s.on_written(100);
        assert_eq!((s.chunks_read, s.bytes_read), (2, 150));
        assert_eq!((s.chunks_written, s.bytes_written), (1, 100));
    }
}
