//! # Decoder State and Worker Stages
//!
//! The pipeline runs in three stages. The receiver stage executes on the
//! caller's network thread (see `receiver.rs`); this module owns the other
//! two:
//!
//! 1. the FEC stage, popping frame messages from the fec queue, recovering
//!    lost ranges and parsing the embedded video header, and
//! 2. the decompress/display stage, dispatching tile decompression and
//!    cycling frames through the display's get/put protocol.
//!
//! Both queues hold a single message, so a stage cannot run ahead of its
//! consumer. The display framebuffer is handed between stages through
//! [`SwapGate`]: a writer waits for the swapped flag, clears it, writes, and
//! the display stage sets it again once the frame was submitted and a fresh
//! writable frame acquired.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use pipeline_common::{Mailbox, SyncQueue};
use video_core::{
    copy_line, copy_line_rgb, copy_line_rgba, get_line_conversion, il_lower_to_merged,
    il_merged_to_upper, il_upper_to_merged, ChangeIlFn, Codec, FecDesc, Interlacing, LineDecodeFn,
    VideoDesc, VideoFrame, VideoMode, DEFAULT_RGB_SHIFT,
};

use crate::config::{DecoderConfig, DropPolicy};
use crate::control::ControlSink;
use crate::decompress::{DecompressResult, DecompressorFactory, VideoDecompressor};
use crate::decrypt::PacketCrypto;
use crate::display::{FramebufferLayout, PutFrameFlag, VideoDisplay, DEFAULT_DISPLAY_INTERLACINGS};
use crate::fec::{sum_map, FecCodec, FecFactory};
use crate::line_decoder::LineDecoder;
use crate::msg::{FrameMsg, NofecTile, ReconfigureRequest};
use crate::stats::{CumulativeStats, SharedStats, ThrottledWarning};
use crate::wire::{parse_video_desc, VIDEO_HDR_LEN};

/// Decoder construction failure.
#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("unable to initialize packet decryption (empty key material)")]
    CryptoInit,
}

/// Framebuffer ownership gate between the writing stage and the display
/// stage.
pub(crate) struct SwapGate {
    swapped: Mutex<bool>,
    cv: Condvar,
}

impl SwapGate {
    fn new() -> SwapGate {
        SwapGate {
            swapped: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    /// Wait until the framebuffer is writable, then claim it.
    pub fn claim(&self) {
        let mut swapped = self.swapped.lock().unwrap();
        while !*swapped {
            swapped = self.cv.wait(swapped).unwrap();
        }
        *swapped = false;
    }

    /// Mark the framebuffer writable again and wake a waiting writer.
    pub fn release(&self) {
        *self.swapped.lock().unwrap() = true;
        self.cv.notify_one();
    }
}

/// How incoming video data gets decoded. Chosen at reconfiguration and
/// immutable until the next one.
pub(crate) enum DecoderBackend {
    Unset,
    /// Per-row streaming conversion into the display framebuffer, one decoder
    /// per source tile.
    Line(Vec<LineDecoder>),
    /// Opaque decompressor, one state per substream. Tile decodes of one
    /// frame may run concurrently, each state behind its own lock.
    External {
        states: Vec<Mutex<Box<dyn VideoDecompressor>>>,
        accepts_corrupted: bool,
    },
}

/// Interlacing conversion selected at reconfiguration, with per-tile scratch.
pub(crate) struct ChangeIl {
    pub func: ChangeIlFn,
    pub scratch: Mutex<Vec<Vec<u8>>>,
}

/// Pipeline configuration state, rebuilt by `reconfigure`.
///
/// Workers take read locks per message; the receiver takes the write lock
/// only while the workers are parked, so contention stays trivial.
pub(crate) struct RunState {
    pub video_mode: VideoMode,
    pub max_substreams: usize,
    pub backend: DecoderBackend,
    pub out_codec: Option<Codec>,
    pub pitch: usize,
    pub merged_fb: bool,
    pub change_il: Option<ChangeIl>,
    pub received_desc: Option<VideoDesc>,
    pub display_desc: Option<VideoDesc>,
    pub native_codecs: Vec<Codec>,
    pub supported_il: Vec<Interlacing>,
}

/// State shared between the receiver thread and the two workers.
pub(crate) struct Shared {
    pub fec_queue: SyncQueue<FrameMsg>,
    pub decompress_queue: SyncQueue<FrameMsg>,
    pub msg_queue: Mailbox<ReconfigureRequest>,
    pub gate: SwapGate,
    /// The writable display frame, if any. `None` after a failed
    /// reconfiguration; buffers drop until the next successful one.
    pub frame: Mutex<Option<VideoFrame>>,
    pub run: RwLock<RunState>,
    pub stats: SharedStats,
    pub display: Arc<dyn VideoDisplay>,
    pub control: Arc<dyn ControlSink>,
    pub fec_factory: FecFactory,
    pub drop_policy: DropPolicy,
    /// Set on unrecoverable initialization failures (e.g. FEC codec cannot
    /// be built for on-wire parameters); the receiver then refuses buffers.
    pub fatal: AtomicBool,
}

struct WorkerHandles {
    fec: JoinHandle<()>,
    decompress: JoinHandle<()>,
}

/// One receive stream's decoding pipeline.
///
/// Owns the FEC and decompress/display worker threads; `decode_frame` (the
/// receiver stage) runs on the caller's thread. The display is bound for the
/// decoder's whole lifetime.
pub struct VideoDecoder {
    pub(crate) shared: Arc<Shared>,
    workers: Option<WorkerHandles>,
    pub(crate) decrypt: Option<PacketCrypto>,
    pub(crate) decompress_factories: Vec<Arc<dyn DecompressorFactory>>,
    pub(crate) padding: usize,
    pub(crate) last_buffer_number: Option<u32>,
    pub(crate) slow_warning: ThrottledWarning,
}

impl VideoDecoder {
    /// Create a decoder for `video_mode`, bound to `display`.
    pub fn new(
        video_mode: VideoMode,
        display: Arc<dyn VideoDisplay>,
        config: DecoderConfig,
    ) -> Result<VideoDecoder, DecoderError> {
        let decrypt = match &config.encryption {
            Some(material) => {
                Some(PacketCrypto::new(material).ok_or(DecoderError::CryptoInit)?)
            }
            None => None,
        };

        let native_codecs = display.codecs();
        if native_codecs.is_empty() {
            error!("Failed to query codecs from video display.");
        }
        let supported_il = display
            .supported_interlacings()
            .unwrap_or_else(|| DEFAULT_DISPLAY_INTERLACINGS.to_vec());

        let shared = Arc::new(Shared {
            fec_queue: SyncQueue::new(1),
            decompress_queue: SyncQueue::new(1),
            msg_queue: Mailbox::new(),
            gate: SwapGate::new(),
            frame: Mutex::new(None),
            run: RwLock::new(RunState {
                video_mode,
                max_substreams: video_mode.tile_count(),
                backend: DecoderBackend::Unset,
                out_codec: None,
                pitch: 0,
                merged_fb: false,
                change_il: None,
                received_desc: None,
                display_desc: None,
                native_codecs,
                supported_il,
            }),
            stats: Arc::new(Mutex::new(CumulativeStats::default())),
            display,
            control: Arc::clone(&config.control),
            fec_factory: Arc::clone(&config.fec_factory),
            drop_policy: config.drop_policy,
            fatal: AtomicBool::new(false),
        });

        let mut decoder = VideoDecoder {
            shared,
            workers: None,
            decrypt,
            decompress_factories: config.decompress_factories,
            padding: config.padding,
            last_buffer_number: None,
            slow_warning: ThrottledWarning::new(Duration::from_secs(5)),
        };
        decoder.start_workers();
        Ok(decoder)
    }

    /// Current received format as a human-readable string (`get_format`).
    pub fn format(&self) -> Option<String> {
        self.shared
            .run
            .read()
            .unwrap()
            .received_desc
            .map(|d| d.to_string())
    }

    /// Snapshot of the cumulative statistics.
    pub fn stats(&self) -> CumulativeStats {
        self.shared.stats.lock().unwrap().clone()
    }

    fn start_workers(&mut self) {
        let fec_shared = Arc::clone(&self.shared);
        let dec_shared = Arc::clone(&self.shared);
        self.workers = Some(WorkerHandles {
            fec: thread::Builder::new()
                .name("video-fec".into())
                .spawn(move || fec_thread(fec_shared))
                .expect("spawn fec thread"),
            decompress: thread::Builder::new()
                .name("video-decompress".into())
                .spawn(move || decompress_thread(dec_shared))
                .expect("spawn decompress thread"),
        });
    }

    /// Stop both workers by poisoning the fec queue and joining.
    fn stop_workers(&mut self) {
        if let Some(workers) = self.workers.take() {
            self.shared.fec_queue.push(FrameMsg::poison(
                Arc::clone(&self.shared.stats),
                Arc::clone(&self.shared.control),
            ));
            let _ = workers.fec.join();
            let _ = workers.decompress.join();
        }
    }

    /// Reconfigure when the network format differs from the current one (or
    /// unconditionally with `force`). Returns whether a reconfiguration ran.
    pub(crate) fn reconfigure_if_needed(&mut self, desc: VideoDesc, force: bool) -> bool {
        let changed = {
            let run = self.shared.run.read().unwrap();
            !run.received_desc
                .map(|d| d.eq_ignoring_tile_count(&desc))
                .unwrap_or(false)
        };
        if !changed && !force {
            return false;
        }

        if changed {
            info!("New incoming video format detected: {desc}");
            self.shared
                .control
                .report_event(&format!("RECV received video changed - {desc}"));
            self.shared.run.write().unwrap().received_desc = Some(desc);
        }
        if force {
            debug!("forced reconf");
        }

        let current = self.shared.run.read().unwrap().received_desc;
        let Some(current) = current else {
            return true;
        };
        if !self.reconfigure(current) {
            error!("Reconfiguration failed!!!");
            if let Some(frame) = self.shared.frame.lock().unwrap().take() {
                self.shared.display.put_frame(frame, PutFrameFlag::Discard);
            }
        }
        true
    }

    /// Full pipeline rebuild for a new format.
    fn reconfigure(&mut self, mut desc: VideoDesc) -> bool {
        // flush the pipelined data: park workers, withdraw the in-flight
        // frame, then restart with empty queues
        self.stop_workers();
        if let Some(frame) = self.shared.frame.lock().unwrap().take() {
            self.shared.display.put_frame(frame, PutFrameFlag::Discard);
        }
        self.shared.gate.release();
        self.start_workers();

        let shared = Arc::clone(&self.shared);
        let mut run = shared.run.write().unwrap();
        run.backend = DecoderBackend::Unset;
        run.change_il = None;
        run.out_codec = None;

        let tiles_x = run.video_mode.tiles_x() as u32;
        let tiles_y = run.video_mode.tiles_y() as u32;
        desc.tile_count = tiles_x * tiles_y;

        let Some(selection) =
            choose_codec_and_decoder(&run, &desc, &self.decompress_factories)
        else {
            error!(
                "Unable to find decoder for input codec \"{}\"!!!",
                desc.color_spec
            );
            return false;
        };
        let out_codec = selection.out_codec();
        run.out_codec = Some(out_codec);

        let merged = self.shared.display.layout() == FramebufferLayout::Merged;

        let (display_il, change_fn) = select_il_transition(desc.interlacing, &run.supported_il);
        run.change_il = change_fn.map(|func| ChangeIl {
            func,
            scratch: Mutex::new(vec![Vec::new(); run.max_substreams]),
        });

        let mut display_desc = desc;
        display_desc.color_spec = out_codec;
        display_desc.interlacing = display_il;
        if merged {
            display_desc.width *= tiles_x;
            display_desc.height *= tiles_y;
            display_desc.tile_count = 1;
        }

        if run.display_desc.map(|d| d != display_desc).unwrap_or(true) {
            if !self
                .shared
                .display
                .reconfigure(&display_desc, run.video_mode)
            {
                error!("Unable to reconfigure display to {display_desc}");
                return false;
            }
            debug!("Successfully reconfigured display to {display_desc}");
            run.display_desc = Some(display_desc);
        }

        let rgb_shift = self.shared.display.rgb_shift().unwrap_or(DEFAULT_RGB_SHIFT);
        let linewidth = if merged { desc.width * tiles_x } else { desc.width };
        run.pitch = self
            .shared
            .display
            .pitch()
            .unwrap_or_else(|| out_codec.linesize(linewidth as usize));
        run.merged_fb = merged;

        match selection {
            Selection::Line { decode_line, .. } => {
                let src_linesize = desc.color_spec.linesize(desc.width as usize);
                let dst_linesize = out_codec.linesize(desc.width as usize);
                let mut decoders = Vec::with_capacity(run.max_substreams);
                for y in 0..tiles_y as usize {
                    for x in 0..tiles_x as usize {
                        let base_offset = if merged {
                            y * desc.height as usize * run.pitch
                                + out_codec.linesize((x as u32 * desc.width) as usize)
                        } else {
                            0
                        };
                        decoders.push(LineDecoder {
                            base_offset,
                            src_bpp: desc.color_spec.bpp(),
                            dst_bpp: out_codec.bpp(),
                            shifts: rgb_shift,
                            decode_line,
                            dst_linesize,
                            dst_pitch: if merged { run.pitch } else { dst_linesize },
                            src_linesize,
                        });
                    }
                }
                run.backend = DecoderBackend::Line(decoders);
            }
            Selection::External {
                mut states,
                accepts_corrupted,
                ..
            } => {
                for state in &mut states {
                    if state
                        .reconfigure(&desc, rgb_shift, run.pitch, out_codec)
                        .is_none()
                    {
                        return false;
                    }
                }
                run.backend = DecoderBackend::External {
                    states: states.into_iter().map(Mutex::new).collect(),
                    accepts_corrupted,
                };
            }
        }

        drop(run);
        *self.shared.frame.lock().unwrap() = Some(self.shared.display.get_frame());
        true
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.stop_workers();
        self.shared.control.report_event("RECV stream ended");
        if let Some(frame) = self.shared.frame.lock().unwrap().take() {
            self.shared.display.put_frame(frame, PutFrameFlag::Discard);
        }
        self.shared.stats.lock().unwrap().print();
    }
}

/// Codec/decoder choice produced by the selection passes.
enum Selection {
    Line {
        out_codec: Codec,
        decode_line: LineDecodeFn,
    },
    External {
        out_codec: Codec,
        states: Vec<Box<dyn VideoDecompressor>>,
        accepts_corrupted: bool,
    },
}

impl Selection {
    fn out_codec(&self) -> Codec {
        match self {
            Selection::Line { out_codec, .. } | Selection::External { out_codec, .. } => *out_codec,
        }
    }
}

/// Pick the output codec and decode path for `desc`, trying in order:
/// identity, fast line conversion, slow line conversion, external
/// decompressor.
fn choose_codec_and_decoder(
    run: &RunState,
    desc: &VideoDesc,
    factories: &[Arc<dyn DecompressorFactory>],
) -> Option<Selection> {
    for &cand in &run.native_codecs {
        if desc.color_spec == cand {
            // compressed textures cannot be tiled into a merged surface
            if matches!(cand, Codec::Dxt1 | Codec::Dxt1Yuv | Codec::Dxt5)
                && run.video_mode != VideoMode::Normal
            {
                continue;
            }
            let decode_line: LineDecodeFn = match cand {
                Codec::Rgba => copy_line_rgba,
                Codec::Rgb => copy_line_rgb,
                _ => copy_line,
            };
            return Some(Selection::Line {
                out_codec: cand,
                decode_line,
            });
        }
    }

    for include_slow in [false, true] {
        for &cand in &run.native_codecs {
            if let Some(decode_line) = get_line_conversion(desc.color_spec, cand, include_slow) {
                return Some(Selection::Line {
                    out_codec: cand,
                    decode_line,
                });
            }
        }
    }

    for &cand in &run.native_codecs {
        for factory in factories {
            if let Some(states) = factory.init_multi(desc.color_spec, cand, run.max_substreams) {
                let accepts_corrupted = states
                    .first()
                    .map(|s| s.accepts_corrupted_frame())
                    .unwrap_or(false);
                return Some(Selection::External {
                    out_codec: cand,
                    states,
                    accepts_corrupted,
                });
            }
        }
    }

    None
}

/// Find an interlacing transition towards something the display supports.
fn select_il_transition(
    incoming: Interlacing,
    supported: &[Interlacing],
) -> (Interlacing, Option<ChangeIlFn>) {
    if supported.contains(&incoming) {
        return (incoming, None);
    }

    const TRANSITIONS: [(Interlacing, Interlacing, ChangeIlFn); 3] = [
        (
            Interlacing::LowerFieldFirst,
            Interlacing::InterlacedMerged,
            il_lower_to_merged,
        ),
        (
            Interlacing::UpperFieldFirst,
            Interlacing::InterlacedMerged,
            il_upper_to_merged,
        ),
        (
            Interlacing::InterlacedMerged,
            Interlacing::UpperFieldFirst,
            il_merged_to_upper,
        ),
    ];

    for &sup in supported {
        for (from, to, func) in TRANSITIONS {
            if incoming == from && sup == to {
                return (to, Some(func));
            }
        }
    }

    warn!("Cannot find transition between incoming and display interlacing modes!");
    (incoming, None)
}

fn blacklist_current_out_codec(run: &mut RunState) -> bool {
    let Some(out) = run.out_codec else {
        return false;
    };
    debug!("Blacklisting codec {out}");
    run.native_codecs.retain(|c| *c != out);
    run.out_codec = None;
    true
}

/// FEC stage worker. Single consumer of the fec queue; forwards poison to the
/// decompress queue and exits.
fn fec_thread(shared: Arc<Shared>) {
    let mut fec_state: Option<(FecDesc, Box<dyn FecCodec>)> = None;

    loop {
        let msg = shared.fec_queue.pop();
        if msg.is_poison() {
            shared.decompress_queue.push(msg);
            break;
        }

        let t0 = Instant::now();
        if let Some(mut msg) = process_fec_msg(&shared, msg, &mut fec_state) {
            msg.nanos_fec = t0.elapsed().as_nanos() as u64;
            shared.decompress_queue.push(msg);
        }
    }
}

/// Run one message through FEC recovery. Returns the message to forward, or
/// `None` when it was dropped or re-queued for reconfiguration.
fn process_fec_msg(
    shared: &Shared,
    mut msg: FrameMsg,
    fec_state: &mut Option<(FecDesc, Box<dyn FecCodec>)>,
) -> Option<FrameMsg> {
    let fec_params = msg.recv_frame.as_ref().and_then(|f| f.fec_params);

    if let Some(desc) = fec_params {
        let stale = fec_state.as_ref().map(|(d, _)| *d != desc).unwrap_or(true);
        if stale {
            match (shared.fec_factory)(&desc) {
                Some(codec) => *fec_state = Some((desc, codec)),
                None => {
                    error!("[decoder] Unable to initialize FEC.");
                    shared.fatal.store(true, Ordering::Relaxed);
                    return None;
                }
            }
        }
    }

    let run = shared.run.read().unwrap();
    let mut claimed = false;

    let forward = if fec_params.is_some() {
        let (_, codec) = fec_state.as_mut().expect("fec codec initialized above");
        // a mode guess can grow the tile grid while this message is in
        // flight; the message's own tile vector is authoritative for it
        let tile_count = run.video_mode.tile_count().min(msg.nofec.len());

        let mut outcome = Ok(());
        for pos in 0..tile_count {
            let (declared, received) = {
                let tile = &msg.recv_frame.as_ref().unwrap().tiles[pos];
                (tile.data_len, sum_map(&msg.pckt_list[pos]))
            };
            if declared != received {
                debug!(
                    "Frame incomplete - substream {pos}, buffer {}: expected {declared} bytes, got {received}.",
                    msg.buffer_num[pos]
                );
            }

            let payload = {
                let frame = msg.recv_frame.as_ref().unwrap();
                let tile = &frame.tiles[pos];
                let input = &tile.data[..tile.data_len.min(tile.data.len())];
                let Some(out) = codec.decode(input, &msg.pckt_list[pos]) else {
                    debug!("[decoder] FEC: unable to reconstruct data.");
                    outcome = Err(());
                    msg.is_corrupted = true;
                    break;
                };
                if out.len() < VIDEO_HDR_LEN {
                    debug!("[decoder] FEC: reconstructed block shorter than video header.");
                    outcome = Err(());
                    msg.is_corrupted = true;
                    break;
                }
                let net_desc = match parse_video_desc(out) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("{e}");
                        outcome = Err(());
                        msg.is_corrupted = true;
                        break;
                    }
                };
                let matches = run
                    .received_desc
                    .map(|d| d.eq_ignoring_tile_count(&net_desc))
                    .unwrap_or(false);
                if !matches {
                    drop(run);
                    if claimed {
                        shared.gate.release();
                    }
                    shared.msg_queue.push(ReconfigureRequest {
                        desc: net_desc,
                        last_frame: Some(msg),
                        force: false,
                    });
                    return None;
                }
                out[VIDEO_HDR_LEN..].to_vec()
            };

            match &run.backend {
                DecoderBackend::External { .. } => {
                    msg.nofec[pos] = NofecTile::Recovered(payload);
                }
                DecoderBackend::Line(decoders) => {
                    if !claimed {
                        shared.gate.claim();
                        claimed = true;
                    }
                    let mut guard = shared.frame.lock().unwrap();
                    let Some(frame) = guard.as_mut() else {
                        outcome = Err(());
                        break;
                    };
                    let divisor = if run.merged_fb { 1 } else { run.max_substreams };
                    let tile_idx = pos % divisor;
                    let out_codec = frame.color_spec;
                    let dst_stride =
                        out_codec.linesize(frame.tiles[tile_idx].width as usize);
                    decoders[pos].decode_recovered(
                        &mut frame.tiles[tile_idx],
                        &payload,
                        dst_stride,
                    );
                    msg.nofec[pos] = NofecTile::InFramebuffer(payload.len());
                }
                DecoderBackend::Unset => {
                    outcome = Err(());
                    break;
                }
            }
        }
        outcome.is_ok()
    } else {
        let mut forward = true;
        for pos in 0..run.max_substreams.min(msg.nofec.len()) {
            msg.nofec[pos] = NofecTile::Received;
            let (declared, received) = {
                let tile = &msg.recv_frame.as_ref().unwrap().tiles[pos];
                (tile.data_len, sum_map(&msg.pckt_list[pos]))
            };
            if declared != received {
                let drops = matches!(
                    run.backend,
                    DecoderBackend::External {
                        accepts_corrupted: false,
                        ..
                    }
                );
                debug!(
                    "Frame incomplete - substream {pos}, buffer {}: expected {declared} bytes, got {received}.{}",
                    msg.buffer_num[pos],
                    if drops { " dropped." } else { "" }
                );
                msg.is_corrupted = true;
                if drops {
                    forward = false;
                    break;
                }
            }
        }
        forward
    };

    if !forward && claimed {
        shared.gate.release();
    }
    forward.then_some(msg)
}

/// Decompress/display stage worker. Single consumer of the decompress queue;
/// exits on poison.
fn decompress_thread(shared: Arc<Shared>) {
    loop {
        let mut msg = shared.decompress_queue.pop();
        if msg.is_poison() {
            break;
        }

        let t0 = Instant::now();
        let mut skip = false;
        let mut blacklist = false;

        {
            let run = shared.run.read().unwrap();
            match &run.backend {
                DecoderBackend::External { states, .. } => {
                    let mut guard = shared.frame.lock().unwrap();
                    match guard.as_mut() {
                        Some(frame) => {
                            let results = decompress_tiles(&run, states, frame, &msg);
                            if results.contains(&DecompressResult::CantDecode) {
                                blacklist = true;
                                skip = true;
                            } else if results.iter().any(|r| *r != DecompressResult::GotFrame) {
                                skip = true;
                            }
                        }
                        None => skip = true,
                    }
                }
                DecoderBackend::Line(_) => {
                    let mut guard = shared.frame.lock().unwrap();
                    match guard.as_mut() {
                        Some(frame) => {
                            if frame.decoder_overrides_data_len {
                                for i in 0..frame.tiles.len().min(msg.nofec.len()) {
                                    frame.tiles[i].data_len = msg.nofec_len(i);
                                }
                            }
                        }
                        None => skip = true,
                    }
                }
                DecoderBackend::Unset => skip = true,
            }

            msg.nanos_decompress = t0.elapsed().as_nanos() as u64;

            if !skip {
                if let Some(change_il) = &run.change_il {
                    let mut guard = shared.frame.lock().unwrap();
                    if let Some(frame) = guard.as_mut() {
                        let out_codec = frame.color_spec;
                        let mut scratch = change_il.scratch.lock().unwrap();
                        for (i, tile) in frame.tiles.iter_mut().enumerate() {
                            let linesize = out_codec.linesize(tile.width as usize);
                            if let Some(buf) = scratch.get_mut(i) {
                                (change_il.func)(
                                    &mut tile.data,
                                    linesize,
                                    tile.height as usize,
                                    buf,
                                );
                            }
                        }
                    }
                }
            }
        }

        if blacklist {
            let mut run = shared.run.write().unwrap();
            if blacklist_current_out_codec(&mut run) {
                if let Some(desc) = run.received_desc {
                    shared.msg_queue.push(ReconfigureRequest {
                        desc,
                        last_frame: None,
                        force: true,
                    });
                }
            }
        }

        if !skip {
            let flag = match shared.drop_policy {
                DropPolicy::NonBlocking => PutFrameFlag::NonBlocking,
                DropPolicy::Blocking => PutFrameFlag::Blocking,
            };
            let mut guard = shared.frame.lock().unwrap();
            if let Some(mut frame) = guard.take() {
                frame.ssrc = msg.recv_frame.as_ref().map(|f| f.ssrc).unwrap_or(0);
                if shared.display.put_frame(frame, flag) {
                    msg.is_displayed = true;
                }
                *guard = Some(shared.display.get_frame());
            }
        }

        // the framebuffer is writable again whether or not this frame made it
        shared.gate.release();
    }
}

/// Run one decompress task per tile against the state vector.
///
/// With separate per-tile framebuffers the tasks run concurrently on scoped
/// threads; a merged surface is written by one task at a time.
fn decompress_tiles(
    run: &RunState,
    states: &[Mutex<Box<dyn VideoDecompressor>>],
    frame: &mut VideoFrame,
    msg: &FrameMsg,
) -> Vec<DecompressResult> {
    let tiles_x = run.video_mode.tiles_x();
    let tile_count = run
        .video_mode
        .tile_count()
        .min(states.len())
        .min(msg.nofec.len());
    let (tile_w, tile_h) = run
        .received_desc
        .map(|d| (d.width as usize, d.height as usize))
        .unwrap_or((0, 0));
    let out_codec = run.out_codec.unwrap_or(frame.color_spec);

    let mut results;
    if run.merged_fb || tile_count <= 1 {
        results = Vec::with_capacity(tile_count);
        for pos in 0..tile_count {
            let Some(src) = tile_src(msg, pos) else {
                results.push(DecompressResult::NoFrame);
                continue;
            };
            let (x, y) = (pos % tiles_x, pos / tiles_x);
            let dst_index = if run.merged_fb { 0 } else { pos };
            let offset = if run.merged_fb {
                y * run.pitch * tile_h + out_codec.linesize(tile_w) * x
            } else {
                0
            };
            let Some(tile) = frame.tiles.get_mut(dst_index) else {
                results.push(DecompressResult::NoFrame);
                continue;
            };
            if offset >= tile.data.len() {
                results.push(DecompressResult::NoFrame);
                continue;
            }
            let mut state = states[pos].lock().unwrap();
            results.push(state.decompress(
                &mut tile.data[offset..],
                src,
                msg.buffer_num.get(pos).copied().unwrap_or(0),
            ));
        }
    } else {
        results = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(tile_count);
            for (pos, (tile, state)) in frame
                .tiles
                .iter_mut()
                .zip(states.iter())
                .enumerate()
                .take(tile_count)
            {
                let src = tile_src(msg, pos);
                let buffer_number = msg.buffer_num.get(pos).copied().unwrap_or(0);
                handles.push(scope.spawn(move || {
                    let Some(src) = src else {
                        return DecompressResult::NoFrame;
                    };
                    let mut state = state.lock().unwrap();
                    state.decompress(&mut tile.data, src, buffer_number)
                }));
            }
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(DecompressResult::NoFrame))
                .collect()
        });
    }

    while results.len() < run.video_mode.tile_count() {
        results.push(DecompressResult::NoFrame);
    }
    results
}

/// Source bytes for one tile's decompression, post-FEC.
fn tile_src(msg: &FrameMsg, pos: usize) -> Option<&[u8]> {
    match &msg.nofec[pos] {
        NofecTile::Received => {
            let tile = &msg.recv_frame.as_ref()?.tiles[pos];
            if tile.data.is_empty() {
                None
            } else {
                Some(&tile.data[..tile.data_len.min(tile.data.len())])
            }
        }
        NofecTile::Recovered(data) => Some(&data[..]),
        NofecTile::Pending | NofecTile::InFramebuffer(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_il_transition_native() {
        let (out, func) = select_il_transition(
            Interlacing::Progressive,
            &[Interlacing::Progressive, Interlacing::InterlacedMerged],
        );
        assert_eq!(out, Interlacing::Progressive);
        assert!(func.is_none());
    }

    #[test]
    fn test_select_il_transition_converted() {
        let (out, func) = select_il_transition(
            Interlacing::UpperFieldFirst,
            &[Interlacing::Progressive, Interlacing::InterlacedMerged],
        );
        assert_eq!(out, Interlacing::InterlacedMerged);
        assert!(func.is_some());
    }

    #[test]
    fn test_select_il_transition_missing() {
        let (out, func) =
            select_il_transition(Interlacing::SegmentedFrame, &[Interlacing::Progressive]);
        assert_eq!(out, Interlacing::SegmentedFrame);
        assert!(func.is_none());
    }

    #[test]
    fn test_swap_gate_claim_release() {
        let gate = SwapGate::new();
        gate.claim();
        assert!(!*gate.swapped.lock().unwrap());
        gate.release();
        assert!(*gate.swapped.lock().unwrap());
        gate.claim();
        gate.release();
    }
}
