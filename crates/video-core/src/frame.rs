//! # Tiled Video Frames
//!
//! A frame is a set of tiles, one per substream. During reassembly a tile's
//! declared `data_len` (from the wire) can exceed the bytes actually received;
//! completeness checks compare the two.

use crate::{Codec, FecDesc, Interlacing, VideoDesc};

/// One spatial partition of a frame.
#[derive(Debug, Default, Clone)]
pub struct Tile {
    pub width: u32,
    pub height: u32,
    /// Tile payload. May be empty until the first packet of the tile arrives.
    pub data: Vec<u8>,
    /// Declared byte length of the tile's logical buffer.
    pub data_len: usize,
}

impl Tile {
    /// Allocate backing storage for `len` bytes plus codec-library padding.
    pub fn allocate(&mut self, len: usize, padding: usize) {
        self.data = vec![0u8; len + padding];
    }
}

/// A tiled video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub tiles: Vec<Tile>,
    pub color_spec: Codec,
    pub interlacing: Interlacing,
    pub fps: f64,
    pub ssrc: u32,
    /// FEC parameters the payload was protected with, if any.
    pub fec_params: Option<FecDesc>,
    /// Set by decompressors whose output length differs per frame; the
    /// display stage then copies tile lengths from the decoded frame.
    pub decoder_overrides_data_len: bool,
}

impl VideoFrame {
    /// An empty frame with `tile_count` unallocated tiles. Format fields are
    /// placeholders until assembly learns them from the wire.
    pub fn empty(tile_count: usize) -> VideoFrame {
        VideoFrame {
            tiles: vec![Tile::default(); tile_count],
            color_spec: Codec::Rgba,
            interlacing: Interlacing::Progressive,
            fps: 0.0,
            ssrc: 0,
            fec_params: None,
            decoder_overrides_data_len: false,
        }
    }

    /// A frame with storage allocated per `desc`, one tile per `tile_count`.
    ///
    /// Used by displays to produce writable framebuffers.
    pub fn from_desc(desc: &VideoDesc) -> VideoFrame {
        let linesize = desc.color_spec.linesize(desc.width as usize);
        let len = linesize * desc.height as usize;
        let tiles = (0..desc.tile_count.max(1))
            .map(|_| {
                let mut tile = Tile {
                    width: desc.width,
                    height: desc.height,
                    data: Vec::new(),
                    data_len: len,
                };
                tile.allocate(len, 0);
                tile
            })
            .collect();
        VideoFrame {
            tiles,
            color_spec: desc.color_spec,
            interlacing: desc.interlacing,
            fps: desc.fps,
            ssrc: 0,
            fec_params: None,
            decoder_overrides_data_len: false,
        }
    }

    /// Sum of the declared tile lengths.
    pub fn total_data_len(&self) -> usize {
        self.tiles.iter().map(|t| t.data_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_desc_allocates() {
        let mut desc = VideoDesc::new(64, 8, 25.0, Codec::Uyvy);
        desc.tile_count = 2;
        let frame = VideoFrame::from_desc(&desc);
        assert_eq!(frame.tiles.len(), 2);
        assert_eq!(frame.tiles[0].data.len(), 64 * 2 * 8);
        assert_eq!(frame.total_data_len(), 2 * 64 * 2 * 8);
    }

    #[test]
    fn test_empty_tiles() {
        let frame = VideoFrame::empty(4);
        assert_eq!(frame.tiles.len(), 4);
        assert!(frame.tiles.iter().all(|t| t.data.is_empty()));
    }
}
