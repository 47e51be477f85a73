//! # Video Descriptors
//!
//! [`VideoDesc`] is the immutable description of a video format as negotiated
//! from the wire: geometry, rate, codec, interlacing and tile count. The
//! frame rate travels as a packed `(fps, divisor, NTSC-drop, reciprocal)`
//! tuple; [`FpsCode`] converts between that tuple and a plain `f64`.

use std::fmt::Display;

use crate::{Codec, Interlacing};

/// Packed frame-rate code as carried in the payload header.
///
/// The decoded rate is `fps_pt / fpsd`, divided by 1.001 when `fd` is set
/// (NTSC-style fractional rates), and inverted when `fi` is set (rates below
/// one frame per second).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpsCode {
    /// Base rate, 10 bits.
    pub fps_pt: u16,
    /// Denominator, 4 bits, at least 1.
    pub fpsd: u8,
    /// Divide by 1.001.
    pub fd: bool,
    /// Reciprocal rate (seconds per frame instead of frames per second).
    pub fi: bool,
}

impl FpsCode {
    /// Encode an `f64` rate into the packed form.
    pub fn from_fps(fps: f64) -> FpsCode {
        if fps > 0.0 && fps < 1.0 {
            let inv = 1.0 / fps;
            return FpsCode {
                fps_pt: inv.round() as u16,
                fpsd: 1,
                fd: false,
                fi: true,
            };
        }
        let rounded = fps.round();
        if (fps - rounded).abs() < 0.005 {
            return FpsCode {
                fps_pt: rounded as u16,
                fpsd: 1,
                fd: false,
                fi: false,
            };
        }
        let ntsc = fps * 1.001;
        if (ntsc - ntsc.round()).abs() < 0.005 {
            return FpsCode {
                fps_pt: ntsc.round() as u16,
                fpsd: 1,
                fd: true,
                fi: false,
            };
        }
        FpsCode {
            fps_pt: rounded as u16,
            fpsd: 1,
            fd: false,
            fi: false,
        }
    }

    /// Decode the packed form back into frames per second.
    pub fn fps(&self) -> f64 {
        let mut res = self.fps_pt as f64;
        if self.fd {
            res /= 1.001;
        }
        res /= self.fpsd.max(1) as f64;
        if self.fi { 1.0 / res } else { res }
    }
}

/// Description of a video format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoDesc {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub color_spec: Codec,
    pub interlacing: Interlacing,
    pub tile_count: u32,
}

impl VideoDesc {
    pub fn new(width: u32, height: u32, fps: f64, color_spec: Codec) -> VideoDesc {
        VideoDesc {
            width,
            height,
            fps,
            color_spec,
            interlacing: Interlacing::Progressive,
            tile_count: 1,
        }
    }

    /// Equality ignoring the tile count.
    ///
    /// Reconfiguration decisions use this form: the tile count is derived from
    /// the configured video mode rather than from any single packet header.
    pub fn eq_ignoring_tile_count(&self, other: &VideoDesc) -> bool {
        self.width == other.width
            && self.height == other.height
            && (self.fps - other.fps).abs() < 0.01
            && self.color_spec == other.color_spec
            && self.interlacing == other.interlacing
    }
}

impl Display for VideoDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // interlaced modes are conventionally described by their field rate
        let rate_mult = if self.interlacing.is_interlaced() {
            2.0
        } else {
            1.0
        };
        write!(
            f,
            "{}x{} @{:.2}{}, codec {}",
            self.width,
            self.height,
            self.fps * rate_mult,
            self.interlacing.suffix(),
            self.color_spec
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_integer_round_trip() {
        for fps in [24.0, 25.0, 30.0, 50.0, 60.0] {
            let code = FpsCode::from_fps(fps);
            assert!((code.fps() - fps).abs() < 0.01, "fps {fps}");
        }
    }

    #[test]
    fn test_fps_ntsc() {
        let code = FpsCode::from_fps(29.97);
        assert!(code.fd);
        assert_eq!(code.fps_pt, 30);
        assert!((code.fps() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_fps_below_one() {
        let code = FpsCode::from_fps(0.25);
        assert!(code.fi);
        assert!((code.fps() - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_eq_ignoring_tile_count() {
        let a = VideoDesc::new(1920, 1080, 25.0, Codec::Uyvy);
        let mut b = a;
        b.tile_count = 4;
        assert!(a.eq_ignoring_tile_count(&b));
        assert_ne!(a, b);
        b.width = 1280;
        assert!(!a.eq_ignoring_tile_count(&b));
    }

    #[test]
    fn test_display_format() {
        let desc = VideoDesc::new(1920, 1080, 25.0, Codec::Uyvy);
        assert_eq!(desc.to_string(), "1920x1080 @25.00p, codec UYVY");
        let mut interlaced = desc;
        interlaced.interlacing = Interlacing::InterlacedMerged;
        assert_eq!(interlaced.to_string(), "1920x1080 @50.00i, codec UYVY");
    }
}
