//! # External Decompressor Seam
//!
//! Opaque codec modules that consume a whole tile's bytes and write pixels
//! into a provided buffer. One state exists per substream; tile decodes of a
//! single frame may run concurrently, each against its own state.
//!
//! Implementations backed by a shared native codec library must serialize
//! their open/close calls through [`shared_codec_lock`]; the library is not
//! reentrant across threads within one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use video_core::{Codec, VideoDesc};

/// Outcome of one tile decompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressResult {
    /// A frame was produced into the destination buffer.
    GotFrame,
    /// No output this time (e.g. decoder priming); drop the frame silently.
    NoFrame,
    /// The decoder cannot produce the configured output codec at all; the
    /// caller should pick a different one.
    CantDecode,
}

/// One decompressor instance bound to a substream.
pub trait VideoDecompressor: Send {
    /// Reconfigure for a new source format. Returns the required destination
    /// buffer size, or `None` on failure (which aborts the decoder
    /// reconfiguration).
    fn reconfigure(
        &mut self,
        desc: &VideoDesc,
        rgb_shift: [u8; 3],
        pitch: usize,
        out_codec: Codec,
    ) -> Option<usize>;

    /// Decode one tile buffer into `dst`.
    ///
    /// `buffer_number` is the frame's sequence id, usable for inter-frame
    /// bookkeeping (I-frame tracking). MJPEG implementations are expected to
    /// tolerate library-level decode errors on multi-reset-segment frames and
    /// still report [`DecompressResult::GotFrame`] when output was produced.
    fn decompress(&mut self, dst: &mut [u8], src: &[u8], buffer_number: u32) -> DecompressResult;

    /// Whether incomplete input tiles may still be submitted to this decoder.
    fn accepts_corrupted_frame(&self) -> bool {
        false
    }
}

/// Builds decompressor states for a `(source, destination)` codec pair.
pub trait DecompressorFactory: Send + Sync {
    /// Instantiate one state per substream, or `None` when the pair is
    /// unsupported.
    fn init_multi(
        &self,
        src: Codec,
        dst: Codec,
        substreams: usize,
    ) -> Option<Vec<Box<dyn VideoDecompressor>>>;
}

/// Name of the shared lock guarding the native codec library.
pub const LAVCD_LOCK_NAME: &str = "lavcd_lock";

static SHARED_LOCKS: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();

/// Process-wide named mutex.
///
/// All users of the same native codec library acquire the same lock around
/// library init/open/close, independent of which component they belong to.
pub fn shared_codec_lock(name: &str) -> Arc<Mutex<()>> {
    let locks = SHARED_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap();
    locks
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}
