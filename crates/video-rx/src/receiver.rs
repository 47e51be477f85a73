//! # Receiver Stage
//!
//! Per-buffer packet intake, running on the caller's network thread. Each
//! call handles the ordered packet list of one logical frame: classify and
//! (maybe) decrypt every packet, watch the embedded metadata for format
//! changes, and either stream pixels straight into the display framebuffer
//! (line-decoder path) or assemble tile buffers for the downstream stages.
//! One frame message per buffer is handed to the FEC stage.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use video_core::{FecDesc, VideoFrame, VideoMode};

use crate::decoder::{DecoderBackend, VideoDecoder};
use crate::msg::FrameMsg;
use crate::stats::ReceiverStats;
use crate::wire::{
    parse_crypto_mode, parse_fec_params, parse_video_desc, MainHeader, Packet, PayloadType,
    ProtocolError, CRYPTO_HDR_LEN, VIDEO_HDR_LEN,
};

const ENCRYPTED_ERR: &str = "Receiving encrypted video data but no decryption key entered!";
const NOT_ENCRYPTED_ERR: &str = "Receiving unencrypted video data while expecting encrypted.";

/// Per-buffer assembly state.
struct Assembly {
    frame: VideoFrame,
    pckt_list: Vec<BTreeMap<u32, usize>>,
    buffer_num: Vec<u32>,
    fec: Option<FecDesc>,
    pt: Option<PayloadType>,
    ssrc: u32,
    buffer_number: Option<u32>,
    claimed: bool,
    overflow_count: usize,
}

/// How the intake loop ended.
#[derive(PartialEq, Eq)]
enum Intake {
    /// All packets consumed; hand the buffer downstream.
    Accepted,
    /// Buffer dropped, but per-stream accounting still applies.
    Dropped,
    /// Buffer dropped before any accounting is meaningful (no display frame
    /// bound, typically right after a failed reconfiguration).
    DroppedSilently,
}

impl VideoDecoder {
    /// Decode one participant buffer (one logical frame).
    ///
    /// Returns whether the buffer was accepted for downstream processing.
    /// Acceptance does not guarantee display; later stages may still drop the
    /// frame asynchronously.
    pub fn decode_frame(&mut self, packets: &[Packet], rx_stats: &mut ReceiverStats) -> bool {
        // drain reconfigure requests sent back by the FEC stage
        while let Some(req) = self.shared.msg_queue.try_pop() {
            self.reconfigure_if_needed(req.desc, req.force);
            if let Some(last_frame) = req.last_frame {
                self.shared.fec_queue.push(last_frame);
            }
        }

        if self.shared.fatal.load(Ordering::Relaxed) {
            return false;
        }
        if packets.is_empty() {
            return false;
        }

        let max_substreams = self.shared.run.read().unwrap().max_substreams;
        let mut asm = Assembly {
            frame: VideoFrame::empty(max_substreams),
            pckt_list: vec![BTreeMap::new(); max_substreams],
            buffer_num: vec![0; max_substreams],
            fec: None,
            pt: None,
            ssrc: 0,
            buffer_number: None,
            claimed: false,
            overflow_count: 0,
        };

        let outcome = self.intake(packets, max_substreams, &mut asm);
        let seen_buffer_number = asm.buffer_number;

        if outcome != Intake::Accepted && asm.claimed {
            // nothing downstream will release the claimed framebuffer
            self.shared.gate.release();
            asm.claimed = false;
        }

        let accepted = match outcome {
            Intake::Accepted => self.enqueue(asm, rx_stats, max_substreams),
            Intake::Dropped => false,
            Intake::DroppedSilently => return false,
        };

        rx_stats.decoded += 1;

        if let Some(buffer_number) = seen_buffer_number {
            if let Some(last) = self.last_buffer_number {
                let delta = buffer_number.wrapping_sub((last + 1) & 0x3f_ffff) & 0x3f_ffff;
                let mut stats = self.shared.stats.lock().unwrap();
                if delta < 1 << 21 {
                    stats.missing += delta as u64;
                } else {
                    // frames may have been reordered, add arbitrary 1
                    stats.missing += 1;
                }
            }
            self.last_buffer_number = Some(buffer_number);
        }

        accepted
    }

    /// Run the per-packet loop. On any outcome other than `Accepted` the
    /// assembly is discarded by the caller.
    fn intake(&mut self, packets: &[Packet], max_substreams: usize, asm: &mut Assembly) -> Intake {
        for pckt in packets {
            let header = match MainHeader::parse(&pckt.data) {
                Ok(h) => h,
                Err(e) => {
                    warn!("[decoder] {e}");
                    return Intake::Dropped;
                }
            };
            let Some(pt) = PayloadType::from_u8(pckt.pt) else {
                warn!("[decoder] Unknown packet type: {}.", pckt.pt);
                return Intake::Dropped;
            };

            if pt.is_encrypted() && self.decrypt.is_none() {
                error!("{ENCRYPTED_ERR}");
                return Intake::Dropped;
            }
            if !pt.is_encrypted() && self.decrypt.is_some() {
                error!("{NOT_ENCRYPTED_ERR}");
                return Intake::Dropped;
            }

            // recorded before decryption: a buffer whose packets all fail
            // authentication still counts against the sequence
            asm.pt = Some(pt);
            asm.buffer_number = Some(header.buffer_number);
            asm.ssrc = pckt.ssrc;

            if let Some(kind) = pt.fec_kind() {
                match parse_fec_params(&pckt.data, kind) {
                    Ok(fec) => asm.fec = Some(fec),
                    Err(e) => {
                        warn!("[decoder] {e}");
                        return Intake::Dropped;
                    }
                }
            }

            let substream = header.substream as usize;
            if substream >= max_substreams {
                warn!(
                    "[decoder] received substream ID {substream}. Expecting at most \
                     {max_substreams} substreams. Did you set the video mode?"
                );
                // the guess is valid - the highest substream number arrives
                // first since it holds the marker bit
                match VideoMode::guess_from_substreams(substream + 1) {
                    Some(mode) => {
                        info!("[decoder] Guessing mode: {mode}. Check if it is correct.");
                        let mut run = self.shared.run.write().unwrap();
                        run.video_mode = mode;
                        run.max_substreams = mode.tile_count();
                        // force a reconfiguration on the next buffer
                        run.received_desc = None;
                        return Intake::Dropped;
                    }
                    None => {
                        error!("[decoder] Unknown video mode!");
                        self.shared.fatal.store(true, Ordering::Relaxed);
                        return Intake::Dropped;
                    }
                }
            }

            let media_len = pt.media_header_len();
            let skip = media_len + if pt.is_encrypted() { CRYPTO_HDR_LEN } else { 0 };
            if pckt.data.len() < skip {
                warn!("[decoder] {}", ProtocolError::ShortPacket(pckt.data.len()));
                return Intake::Dropped;
            }

            let decrypted;
            let payload: &[u8] = if pt.is_encrypted() {
                let mode =
                    match parse_crypto_mode(&pckt.data[media_len..media_len + CRYPTO_HDR_LEN]) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("{e}");
                            return Intake::Dropped;
                        }
                    };
                let aad = &pckt.data[..media_len];
                match self
                    .decrypt
                    .as_ref()
                    .expect("checked above")
                    .decrypt(&pckt.data[skip..], aad, mode)
                {
                    Some(plain) if !plain.is_empty() => {
                        decrypted = plain;
                        &decrypted
                    }
                    _ => {
                        trace!("Warning: Packet dropped AES - wrong CRC!");
                        continue;
                    }
                }
            } else {
                &pckt.data[media_len..]
            };

            if !pt.has_fec() {
                // critical section: the format observed on the wire governs
                // everything downstream
                if pckt.data.len() >= VIDEO_HDR_LEN {
                    if let Err(e) = self.check_for_mode_change(&pckt.data) {
                        warn!("{e}");
                        return Intake::Dropped;
                    }
                }
                // hereafter the display framebuffer is needed
                if self.shared.frame.lock().unwrap().is_none() {
                    return Intake::DroppedSilently;
                }
            }

            asm.buffer_num[substream] = header.buffer_number;
            asm.frame.tiles[substream].data_len = header.buffer_length as usize;
            asm.pckt_list[substream].insert(header.data_pos, payload.len());

            let line_mode = matches!(
                self.shared.run.read().unwrap().backend,
                DecoderBackend::Line(_)
            );
            if !pt.has_fec() && line_mode {
                // claim the display framebuffer on the first streamed packet
                if !asm.claimed {
                    self.shared.gate.claim();
                    asm.claimed = true;
                }
                let run = self.shared.run.read().unwrap();
                let DecoderBackend::Line(decoders) = &run.backend else {
                    continue;
                };
                let mut guard = self.shared.frame.lock().unwrap();
                let Some(display_frame) = guard.as_mut() else {
                    return Intake::DroppedSilently;
                };
                let tile_index = if run.merged_fb { 0 } else { substream };
                if let (Some(decoder), Some(tile)) = (
                    decoders.get(substream),
                    display_frame.tiles.get_mut(tile_index),
                ) {
                    decoder.decode_packet(tile, header.data_pos, payload, &mut asm.overflow_count);
                }
            } else {
                // FEC-bearing or opaque payload: copy into the tile assembly
                // buffer, allocated on first touch
                let tile = &mut asm.frame.tiles[substream];
                if tile.data.is_empty() {
                    tile.allocate(header.buffer_length as usize, self.padding);
                }
                let start = header.data_pos as usize;
                let end = start.saturating_add(payload.len());
                if end <= tile.data.len() {
                    tile.data[start..end].copy_from_slice(payload);
                } else {
                    debug!(
                        "[decoder] packet at offset {start} overruns tile buffer of {} bytes",
                        tile.data.len()
                    );
                }
            }
        }

        // plain (non-FEC) payload needs a bound display framebuffer
        if matches!(
            asm.pt,
            Some(PayloadType::Video) | Some(PayloadType::EncryptedVideo)
        ) && self.shared.frame.lock().unwrap().is_none()
        {
            return Intake::Dropped;
        }

        Intake::Accepted
    }

    /// Build the frame message and hand it to the FEC stage, measuring how
    /// long the single-slot queue keeps us waiting.
    fn enqueue(&mut self, asm: Assembly, rx_stats: &mut ReceiverStats, tile_count: usize) -> bool {
        let Assembly {
            mut frame,
            pckt_list,
            buffer_num,
            fec,
            ssrc,
            ..
        } = asm;

        let frame_size = frame.total_data_len();
        rx_stats.max_frame_size = rx_stats.max_frame_size.max(frame_size);

        frame.fec_params = fec;
        frame.ssrc = ssrc;

        let display_fps = {
            let run = self.shared.run.read().unwrap();
            run.display_desc.map(|d| d.fps).filter(|f| *f > 0.0)
        };

        let mut msg = FrameMsg::new(
            frame,
            tile_count,
            Arc::clone(&self.shared.stats),
            Arc::clone(&self.shared.control),
        );
        msg.pckt_list = pckt_list;
        msg.buffer_num = buffer_num;
        msg.received_pkts_cum = rx_stats.received_pkts_cum;
        msg.expected_pkts_cum = rx_stats.expected_pkts_cum;
        msg.nanos_expected = display_fps.map(|f| (1e9 / f) as u64).unwrap_or(0);

        let t0 = Instant::now();
        self.shared.fec_queue.push(msg);
        let waited = t0.elapsed().as_secs_f64();

        if let Some(fps) = display_fps {
            let displayed = self.shared.stats.lock().unwrap().displayed;
            if waited > 1.0 / fps && displayed > 20 {
                self.slow_warning
                    .emit("Your computer may be too SLOW to play this !!!");
            }
        }
        true
    }

    /// Parse the embedded video header of a plain packet and reconfigure when
    /// the format differs from the current one.
    fn check_for_mode_change(&mut self, header: &[u8]) -> Result<bool, ProtocolError> {
        let network_desc = parse_video_desc(header)?;
        Ok(self.reconfigure_if_needed(network_desc, false))
    }
}
