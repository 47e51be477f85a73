//! # Interlacing Modes
//!
//! Wire-level interlacing description plus the in-place conversion passes a
//! decoder can apply when the display does not support the incoming mode.
//! Field-sequential layouts store the two fields one after another (first
//! field's lines, then the second field's); merged layouts interleave them.

/// Frame interlacing arrangement, as carried in the payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Interlacing {
    Progressive = 0,
    UpperFieldFirst = 1,
    LowerFieldFirst = 2,
    InterlacedMerged = 3,
    SegmentedFrame = 4,
}

impl Interlacing {
    /// Decode the 3-bit wire value.
    pub fn from_wire(value: u8) -> Option<Interlacing> {
        match value {
            0 => Some(Interlacing::Progressive),
            1 => Some(Interlacing::UpperFieldFirst),
            2 => Some(Interlacing::LowerFieldFirst),
            3 => Some(Interlacing::InterlacedMerged),
            4 => Some(Interlacing::SegmentedFrame),
            _ => None,
        }
    }

    /// Suffix used when formatting a video description (e.g. `1080p`, `1080i`).
    pub const fn suffix(self) -> &'static str {
        match self {
            Interlacing::Progressive => "p",
            Interlacing::UpperFieldFirst => "tff",
            Interlacing::LowerFieldFirst => "bff",
            Interlacing::InterlacedMerged => "i",
            Interlacing::SegmentedFrame => "psf",
        }
    }

    /// Whether the mode carries two temporal fields per frame.
    pub const fn is_interlaced(self) -> bool {
        matches!(
            self,
            Interlacing::UpperFieldFirst
                | Interlacing::LowerFieldFirst
                | Interlacing::InterlacedMerged
        )
    }
}

/// An in-place interlacing conversion over one tile.
///
/// `scratch` persists between frames of the same tile so the row shuffle does
/// not reallocate per frame.
pub type ChangeIlFn = fn(buf: &mut [u8], linesize: usize, height: usize, scratch: &mut Vec<u8>);

fn shuffle_rows(
    buf: &mut [u8],
    linesize: usize,
    height: usize,
    scratch: &mut Vec<u8>,
    src_row: impl Fn(usize) -> usize,
) {
    let rows = height & !1;
    let used = rows * linesize;
    if buf.len() < used {
        return;
    }
    scratch.clear();
    scratch.extend_from_slice(&buf[..used]);
    for dst in 0..rows {
        let src = src_row(dst);
        buf[dst * linesize..(dst + 1) * linesize]
            .copy_from_slice(&scratch[src * linesize..(src + 1) * linesize]);
    }
}

/// Lower-field-first sequential → merged: even output rows come from the
/// second (upper) field block, odd rows from the first (lower) block.
pub fn il_lower_to_merged(buf: &mut [u8], linesize: usize, height: usize, scratch: &mut Vec<u8>) {
    let half = (height & !1) / 2;
    shuffle_rows(buf, linesize, height, scratch, |dst| {
        if dst % 2 == 0 { half + dst / 2 } else { dst / 2 }
    });
}

/// Upper-field-first sequential → merged: even output rows come from the
/// first (upper) field block, odd rows from the second block.
pub fn il_upper_to_merged(buf: &mut [u8], linesize: usize, height: usize, scratch: &mut Vec<u8>) {
    let half = (height & !1) / 2;
    shuffle_rows(buf, linesize, height, scratch, |dst| {
        if dst % 2 == 0 { dst / 2 } else { half + dst / 2 }
    });
}

/// Merged → upper-field-first sequential. Inverse of [`il_upper_to_merged`].
pub fn il_merged_to_upper(buf: &mut [u8], linesize: usize, height: usize, scratch: &mut Vec<u8>) {
    let half = (height & !1) / 2;
    shuffle_rows(buf, linesize, height, scratch, |dst| {
        if dst < half { dst * 2 } else { (dst - half) * 2 + 1 }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of_rows(rows: &[u8]) -> Vec<u8> {
        // one byte per "row" with linesize 1
        rows.to_vec()
    }

    #[test]
    fn test_upper_to_merged() {
        // upper field (rows 0,2) stored first, lower field (rows 1,3) second
        let mut buf = frame_of_rows(&[0, 2, 1, 3]);
        let mut scratch = Vec::new();
        il_upper_to_merged(&mut buf, 1, 4, &mut scratch);
        assert_eq!(buf, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_lower_to_merged() {
        let mut buf = frame_of_rows(&[1, 3, 0, 2]);
        let mut scratch = Vec::new();
        il_lower_to_merged(&mut buf, 1, 4, &mut scratch);
        assert_eq!(buf, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_merged_upper_round_trip() {
        let mut buf = frame_of_rows(&[10, 11, 12, 13, 14, 15]);
        let mut scratch = Vec::new();
        il_merged_to_upper(&mut buf, 1, 6, &mut scratch);
        assert_eq!(buf, vec![10, 12, 14, 11, 13, 15]);
        il_upper_to_merged(&mut buf, 1, 6, &mut scratch);
        assert_eq!(buf, vec![10, 11, 12, 13, 14, 15]);
    }
}
