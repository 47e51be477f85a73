//! # Streaming Line Decoder
//!
//! When the incoming pixel format only needs a per-row conversion (or none),
//! packets are decoded straight into the display framebuffer as they arrive,
//! row by row. One decoder exists per source tile; its base offset places the
//! tile inside a merged framebuffer.

use tracing::error;
use video_core::{LineDecodeFn, Tile};

/// Per-tile streaming decode state.
pub(crate) struct LineDecoder {
    /// Byte offset of this tile inside the destination framebuffer. Nonzero
    /// when multiple source tiles share one merged surface.
    pub base_offset: usize,
    /// Source bytes per pixel (fractional allowed).
    pub src_bpp: f64,
    /// Destination bytes per pixel.
    pub dst_bpp: f64,
    /// Requested R/G/B bit positions.
    pub shifts: [u8; 3],
    pub decode_line: LineDecodeFn,
    /// Used bytes per destination row.
    pub dst_linesize: usize,
    /// Destination row stride; can exceed `dst_linesize` when the
    /// framebuffer is wider than the data.
    pub dst_pitch: usize,
    /// Bytes per source row.
    pub src_linesize: usize,
}

impl LineDecoder {
    /// Convert a horizontal source byte position into a destination byte
    /// position (pixel-aligned truncation on both sides).
    fn to_dst_x(&self, src_x: usize) -> usize {
        ((src_x as f64 / self.src_bpp) as usize as f64 * self.dst_bpp) as usize
    }

    /// Decode one packet's payload into the destination tile.
    ///
    /// The payload may span several rows; each row is decoded separately so it
    /// can be clipped to the destination linesize. A write that would land
    /// past the tile's declared length discards the rest of the packet: it
    /// means a format change slipped past reconfiguration, and is reported
    /// (every 100th occurrence) rather than written.
    pub fn decode_packet(
        &self,
        tile: &mut Tile,
        data_pos: u32,
        data: &[u8],
        overflow_count: &mut usize,
    ) {
        let data_pos = data_pos as usize;
        // vertical position in source rows, as a destination byte offset
        let mut y = (data_pos / self.src_linesize) * self.dst_pitch;
        let mut s_x = data_pos % self.src_linesize;
        let mut d_x = self.to_dst_x(s_x);

        let mut remaining = data.len();
        let mut src_off = 0usize;

        while remaining > 0 {
            let mut l = self.to_dst_x(remaining);
            if l + d_x > self.dst_linesize {
                l = self.dst_linesize.saturating_sub(d_x);
            }
            let offset = y + d_x;

            if l + self.base_offset + offset <= tile.data_len {
                let dst_start = self.base_offset + offset;
                (self.decode_line)(
                    &mut tile.data[dst_start..dst_start + l],
                    &data[src_off..],
                    self.shifts[0],
                    self.shifts[1],
                    self.shifts[2],
                );
                let consumed = (self.src_linesize - s_x).min(remaining);
                remaining -= consumed;
                src_off += consumed;
            } else {
                if *overflow_count % 100 == 0 {
                    error!(
                        "Discarding input data as frame buffer is too small; \
                         expect troubles until the next reconfiguration."
                    );
                }
                *overflow_count += 1;
                remaining = 0;
            }

            // each new row starts at the beginning of the line
            d_x = 0;
            s_x = 0;
            y += self.dst_pitch;
        }
    }

    /// Decode a whole recovered tile buffer (FEC path) row by row.
    ///
    /// `dst_stride` is the destination row advance, computed from the display
    /// tile's width and codec.
    pub fn decode_recovered(&self, tile: &mut Tile, data: &[u8], dst_stride: usize) {
        let mut src_pos = 0usize;
        let mut dst = self.base_offset;
        while src_pos < data.len() {
            if dst + self.dst_linesize > tile.data.len() {
                break;
            }
            let src_avail = data.len() - src_pos;
            let take = if src_avail >= self.src_linesize {
                self.dst_linesize
            } else {
                self.to_dst_x(src_avail).min(self.dst_linesize)
            };
            (self.decode_line)(
                &mut tile.data[dst..dst + take],
                &data[src_pos..],
                self.shifts[0],
                self.shifts[1],
                self.shifts[2],
            );
            src_pos += self.src_linesize;
            dst += dst_stride;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use video_core::copy_line;

    fn identity(src_linesize: usize, dst_pitch: usize) -> LineDecoder {
        LineDecoder {
            base_offset: 0,
            src_bpp: 2.0,
            dst_bpp: 2.0,
            shifts: [0, 8, 16],
            decode_line: copy_line,
            dst_linesize: src_linesize,
            dst_pitch,
            src_linesize,
        }
    }

    fn tile(len: usize) -> Tile {
        Tile {
            width: 0,
            height: 0,
            data: vec![0u8; len],
            data_len: len,
        }
    }

    #[test]
    fn test_packet_spanning_rows() {
        // 8-byte rows, packet of 20 bytes starting at row boundary
        let ld = identity(8, 8);
        let mut t = tile(64);
        let payload: Vec<u8> = (1..=20).collect();
        let mut overflow = 0;
        ld.decode_packet(&mut t, 0, &payload, &mut overflow);
        assert_eq!(&t.data[..20], payload.as_slice());
        assert_eq!(overflow, 0);
    }

    #[test]
    fn test_packet_mid_row_offset() {
        let ld = identity(8, 8);
        let mut t = tile(64);
        let payload = [9u8; 4];
        let mut overflow = 0;
        ld.decode_packet(&mut t, 12, &payload, &mut overflow);
        assert_eq!(&t.data[12..16], &[9, 9, 9, 9]);
        assert_eq!(&t.data[..12], &[0u8; 12]);
    }

    #[test]
    fn test_pitch_larger_than_linesize() {
        // 8 data bytes per row placed on a 16-byte stride
        let mut ld = identity(8, 16);
        ld.dst_linesize = 8;
        let mut t = tile(64);
        let payload: Vec<u8> = (1..=16).collect();
        let mut overflow = 0;
        ld.decode_packet(&mut t, 0, &payload, &mut overflow);
        assert_eq!(&t.data[..8], &payload[..8]);
        assert_eq!(&t.data[16..24], &payload[8..]);
        assert_eq!(&t.data[8..16], &[0u8; 8]);
    }

    #[test]
    fn test_overflow_discards_rest() {
        let ld = identity(8, 8);
        let mut t = tile(16); // two rows only
        let payload = [5u8; 32]; // four rows
        let mut overflow = 0;
        ld.decode_packet(&mut t, 0, &payload, &mut overflow);
        assert_eq!(overflow, 1);
        assert_eq!(&t.data[..16], &[5u8; 16]);
    }

    #[test]
    fn test_recovered_rows_with_stride() {
        let ld = identity(8, 8);
        let mut t = tile(64);
        let payload: Vec<u8> = (1..=24).collect();
        ld.decode_recovered(&mut t, &payload, 16);
        assert_eq!(&t.data[..8], &payload[..8]);
        assert_eq!(&t.data[16..24], &payload[8..16]);
        assert_eq!(&t.data[32..40], &payload[16..24]);
    }
}
