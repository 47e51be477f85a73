//! Forward-error-correction codec seam.
//!
//! Concrete LDGM / Reed-Solomon algorithms live outside this crate; the FEC
//! stage drives them through [`FecCodec`] and builds them through the factory
//! installed in the decoder configuration. The stage rebuilds the codec
//! whenever any of `(k, m, c, seed)` changes on the wire.

use std::collections::BTreeMap;
use std::sync::Arc;

use video_core::FecDesc;

/// One FEC codec instance, parameterized by a [`FecDesc`].
pub trait FecCodec: Send {
    /// Recover one tile's logical buffer.
    ///
    /// `input` is the assembled buffer (received byte ranges in place, gaps
    /// undefined); `pckt_map` maps byte offsets to received lengths and tells
    /// the codec which symbols are present. Returns the recovered payload,
    /// owned by the codec until the next `decode` call, or `None` when the
    /// loss exceeds the redundancy.
    fn decode(&mut self, input: &[u8], pckt_map: &BTreeMap<u32, usize>) -> Option<&[u8]>;
}

/// Builds a codec for a parameter set, or `None` when the parameters are
/// unsupported. Creation failure mid-stream is fatal to the pipeline.
pub type FecFactory = Arc<dyn Fn(&FecDesc) -> Option<Box<dyn FecCodec>> + Send + Sync>;

/// A factory that cannot build anything. Default until the application
/// installs real codecs.
pub fn no_fec_factory() -> FecFactory {
    Arc::new(|_| None)
}

/// Sum of the received byte lengths in a packet map.
pub(crate) fn sum_map(map: &BTreeMap<u32, usize>) -> usize {
    map.values().sum()
}
