//! # Reception Statistics
//!
//! Cumulative counters shared by the three pipeline stages. Every frame
//! message folds its tallies into the shared record on destruction; the
//! record prints itself every 600 frames and at decoder teardown.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Process-lifetime counters for one receive stream.
#[derive(Debug, Default, Clone)]
pub struct CumulativeStats {
    pub received_bytes_total: u64,
    pub expected_bytes_total: u64,
    pub displayed: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub missing: u64,
    pub fec_ok: u64,
    pub fec_corrected: u64,
    pub fec_nok: u64,
    pub nano_per_frame_decompress: u64,
    pub nano_per_frame_error_correction: u64,
    pub nano_per_frame_expected: u64,
    pub reported_frames: u64,
}

impl CumulativeStats {
    /// Emit the cumulative summary line.
    pub fn print(&self) {
        let mut line = format!(
            "Video dec stats (cumulative): {} total / {} disp / {} drop / {} corr / {} missing.",
            self.displayed + self.dropped + self.missing,
            self.displayed,
            self.dropped,
            self.corrupted,
            self.missing
        );
        if self.fec_ok + self.fec_nok + self.fec_corrected > 0 {
            line.push_str(&format!(
                " FEC noerr/OK/NOK: {}/{}/{}",
                self.fec_ok, self.fec_corrected, self.fec_nok
            ));
        }
        info!("{line}");
    }
}

/// Stats handle shared across stages and frame messages.
pub type SharedStats = Arc<Mutex<CumulativeStats>>;

/// Per-participant counters owned by the packet source and updated by the
/// receiver stage.
#[derive(Debug, Default, Clone)]
pub struct ReceiverStats {
    /// Cumulative packets received across all buffers (source-maintained).
    pub received_pkts_cum: u64,
    /// Cumulative packets expected across all buffers (source-maintained).
    pub expected_pkts_cum: u64,
    /// Largest frame seen so far, in bytes.
    pub max_frame_size: usize,
    /// Buffers handed to `decode_frame`.
    pub decoded: u64,
}

/// A warning that fires at most once per interval.
#[derive(Debug)]
pub struct ThrottledWarning {
    interval: Duration,
    last: Option<Instant>,
}

impl ThrottledWarning {
    pub fn new(interval: Duration) -> ThrottledWarning {
        ThrottledWarning {
            interval,
            last: None,
        }
    }

    pub fn emit(&mut self, message: &str) {
        let due = self
            .last
            .map(|at| at.elapsed() >= self.interval)
            .unwrap_or(true);
        if due {
            warn!("{message}");
            self.last = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_warning_interval() {
        let mut w = ThrottledWarning::new(Duration::from_secs(3600));
        w.emit("first");
        let before = w.last;
        w.emit("suppressed");
        assert_eq!(w.last, before);
    }
}
