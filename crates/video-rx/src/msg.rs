//! # Stage Messages
//!
//! [`FrameMsg`] is the unit crossing the stage queues. It owns the received
//! frame, the per-tile packet maps and timing measurements; its destructor
//! folds everything into the shared statistics and emits one structured
//! status line, on every exit path alike. A message with no received frame is
//! the poison pill that terminates the worker threads.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;
use video_core::{VideoDesc, VideoFrame};

use crate::control::ControlSink;
use crate::fec::sum_map;
use crate::stats::SharedStats;

/// Post-FEC view of one tile.
#[derive(Debug)]
pub(crate) enum NofecTile {
    /// FEC stage has not produced this tile yet.
    Pending,
    /// No FEC in the stream; the received tile's bytes are the payload.
    Received,
    /// FEC-recovered payload (video header already stripped).
    Recovered(Vec<u8>),
    /// A line decoder already wrote the recovered payload into the display
    /// framebuffer; only the decoded length remains relevant.
    InFramebuffer(usize),
}

/// The message crossing the fec and decompress queues.
pub(crate) struct FrameMsg {
    /// Received frame, FEC/compression still applied. `None` poisons the
    /// pipeline.
    pub recv_frame: Option<VideoFrame>,
    /// Post-FEC payload per tile, filled by the FEC stage.
    pub nofec: Vec<NofecTile>,
    /// Per-tile map of byte offset → received length.
    pub pckt_list: Vec<BTreeMap<u32, usize>>,
    /// Buffer id observed per tile.
    pub buffer_num: Vec<u32>,
    pub received_pkts_cum: u64,
    pub expected_pkts_cum: u64,
    /// Nominal nanoseconds per frame at the display rate.
    pub nanos_expected: u64,
    pub nanos_fec: u64,
    pub nanos_decompress: u64,
    pub is_displayed: bool,
    pub is_corrupted: bool,
    stats: SharedStats,
    control: Arc<dyn ControlSink>,
}

impl FrameMsg {
    pub fn new(
        recv_frame: VideoFrame,
        tile_count: usize,
        stats: SharedStats,
        control: Arc<dyn ControlSink>,
    ) -> FrameMsg {
        FrameMsg {
            recv_frame: Some(recv_frame),
            nofec: (0..tile_count).map(|_| NofecTile::Pending).collect(),
            pckt_list: vec![BTreeMap::new(); tile_count],
            buffer_num: vec![0; tile_count],
            received_pkts_cum: 0,
            expected_pkts_cum: 0,
            nanos_expected: 0,
            nanos_fec: 0,
            nanos_decompress: 0,
            is_displayed: false,
            is_corrupted: false,
            stats,
            control,
        }
    }

    /// The shutdown sentinel.
    pub fn poison(stats: SharedStats, control: Arc<dyn ControlSink>) -> FrameMsg {
        FrameMsg {
            recv_frame: None,
            nofec: Vec::new(),
            pckt_list: Vec::new(),
            buffer_num: Vec::new(),
            received_pkts_cum: 0,
            expected_pkts_cum: 0,
            nanos_expected: 0,
            nanos_fec: 0,
            nanos_decompress: 0,
            is_displayed: false,
            is_corrupted: false,
            stats,
            control,
        }
    }

    pub fn is_poison(&self) -> bool {
        self.recv_frame.is_none()
    }

    /// Bytes actually received across all tiles.
    pub fn received_bytes(&self) -> usize {
        self.pckt_list.iter().map(sum_map).sum()
    }

    /// Post-FEC payload length of one tile.
    pub fn nofec_len(&self, pos: usize) -> usize {
        match &self.nofec[pos] {
            NofecTile::Pending => 0,
            NofecTile::Received => self
                .recv_frame
                .as_ref()
                .map(|f| f.tiles[pos].data_len)
                .unwrap_or(0),
            NofecTile::Recovered(data) => data.len(),
            NofecTile::InFramebuffer(len) => *len,
        }
    }
}

impl Drop for FrameMsg {
    fn drop(&mut self) {
        let Some(frame) = self.recv_frame.as_ref() else {
            return; // poison carries no tallies
        };

        let received_bytes = self.received_bytes() as u64;
        let expected_bytes = frame.total_data_len() as u64;

        let mut stats = self.stats.lock().unwrap();
        if frame.fec_params.is_some() {
            if self.is_corrupted {
                stats.fec_nok += 1;
            } else if received_bytes == expected_bytes {
                stats.fec_ok += 1;
            } else {
                stats.fec_corrected += 1;
            }
        }
        stats.expected_bytes_total += expected_bytes;
        stats.received_bytes_total += received_bytes;
        stats.corrupted += self.is_corrupted as u64;
        if self.is_displayed {
            stats.displayed += 1;
        } else {
            stats.dropped += 1;
        }
        stats.nano_per_frame_decompress += self.nanos_decompress;
        stats.nano_per_frame_error_correction += self.nanos_fec;
        stats.nano_per_frame_expected += self.nanos_expected;
        stats.reported_frames += 1;

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let line = format!(
            "RECV bufferId {} expectedPackets {} receivedPackets {} expectedBytes {} \
             receivedBytes {} isCorrupted {} isDisplayed {} timestamp {} \
             nanoPerFrameDecompress {} nanoPerFrameErrorCorrection {} nanoPerFrameExpected {} \
             reportedFrames {}",
            self.buffer_num.first().copied().unwrap_or(0),
            self.expected_pkts_cum,
            self.received_pkts_cum,
            stats.expected_bytes_total,
            stats.received_bytes_total,
            stats.corrupted,
            stats.displayed,
            timestamp_ms,
            stats.nano_per_frame_decompress,
            stats.nano_per_frame_error_correction,
            stats.nano_per_frame_expected,
            stats.reported_frames,
        );

        if (stats.displayed + stats.dropped + stats.missing) % 600 == 599 {
            stats.print();
        }
        drop(stats);

        debug!("{line}");
        self.control.report_stats(&line);
    }
}

/// Request from the FEC stage back to the receiver: the wire format changed
/// under an in-flight frame (or a forced rebuild is needed).
pub(crate) struct ReconfigureRequest {
    pub desc: VideoDesc,
    /// The frame that triggered the change, replayed after reconfiguration.
    pub last_frame: Option<FrameMsg>,
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::NoopControl;
    use std::sync::Mutex;
    use video_core::{FecDesc, FecKind};

    fn shared() -> SharedStats {
        Arc::new(Mutex::new(Default::default()))
    }

    #[test]
    fn test_poison_folds_nothing() {
        let stats = shared();
        drop(FrameMsg::poison(stats.clone(), Arc::new(NoopControl)));
        let s = stats.lock().unwrap();
        assert_eq!(s.reported_frames, 0);
        assert_eq!(s.dropped, 0);
    }

    #[test]
    fn test_drop_classifies_fec_outcomes() {
        let stats = shared();

        // complete + FEC + not corrupted → fec_ok
        let mut frame = VideoFrame::empty(1);
        frame.fec_params = Some(FecDesc::new(FecKind::Ldgm, 4, 2, 6, 1));
        frame.tiles[0].data_len = 10;
        let mut msg = FrameMsg::new(frame, 1, stats.clone(), Arc::new(NoopControl));
        msg.pckt_list[0].insert(0, 10);
        msg.is_displayed = true;
        drop(msg);

        // incomplete + FEC + not corrupted → fec_corrected
        let mut frame = VideoFrame::empty(1);
        frame.fec_params = Some(FecDesc::new(FecKind::Ldgm, 4, 2, 6, 1));
        frame.tiles[0].data_len = 10;
        let mut msg = FrameMsg::new(frame, 1, stats.clone(), Arc::new(NoopControl));
        msg.pckt_list[0].insert(0, 6);
        msg.is_displayed = true;
        drop(msg);

        // corrupted + FEC → fec_nok
        let mut frame = VideoFrame::empty(1);
        frame.fec_params = Some(FecDesc::new(FecKind::Ldgm, 4, 2, 6, 1));
        frame.tiles[0].data_len = 10;
        let mut msg = FrameMsg::new(frame, 1, stats.clone(), Arc::new(NoopControl));
        msg.is_corrupted = true;
        drop(msg);

        let s = stats.lock().unwrap();
        assert_eq!(s.fec_ok, 1);
        assert_eq!(s.fec_corrected, 1);
        assert_eq!(s.fec_nok, 1);
        assert_eq!(s.displayed, 2);
        assert_eq!(s.dropped, 1);
        assert_eq!(s.reported_frames, 3);
    }
}
