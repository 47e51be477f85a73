//! # Video Modes
//!
//! A video mode describes how a logical frame is partitioned into spatially
//! distinct substreams (tiles). The receiver derives the expected substream
//! count from the mode, and can guess the mode from an out-of-range substream
//! id observed on the wire.

use std::fmt::Display;

/// Spatial partitioning of a frame into substreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    /// Single tile.
    Normal,
    /// Two tiles stacked vertically (dual-link).
    DualLink,
    /// Two tiles side by side (stereoscopic 3D).
    Stereo,
    /// Three tiles side by side.
    ThreeByOne,
    /// 2x2 tile grid (tiled 4K).
    Tiled4K,
}

impl VideoMode {
    pub const fn tiles_x(self) -> usize {
        match self {
            VideoMode::Normal | VideoMode::DualLink => 1,
            VideoMode::Stereo | VideoMode::Tiled4K => 2,
            VideoMode::ThreeByOne => 3,
        }
    }

    pub const fn tiles_y(self) -> usize {
        match self {
            VideoMode::Normal | VideoMode::Stereo | VideoMode::ThreeByOne => 1,
            VideoMode::DualLink | VideoMode::Tiled4K => 2,
        }
    }

    /// Total number of substreams carried by this mode.
    pub const fn tile_count(self) -> usize {
        self.tiles_x() * self.tiles_y()
    }

    pub const fn name(self) -> &'static str {
        match self {
            VideoMode::Normal => "normal",
            VideoMode::DualLink => "dual-link",
            VideoMode::Stereo => "3D",
            VideoMode::ThreeByOne => "3x1",
            VideoMode::Tiled4K => "tiled-4k",
        }
    }

    /// Guess a mode from an observed substream count.
    ///
    /// The highest substream id is always seen first (it owns the frame
    /// metadata), so `substreams = id + 1` is a usable guess. Dual-link is
    /// indistinguishable from stereo on the wire and is never guessed.
    pub fn guess_from_substreams(substreams: usize) -> Option<VideoMode> {
        match substreams {
            1 => Some(VideoMode::Normal),
            2 => Some(VideoMode::Stereo),
            3 => Some(VideoMode::ThreeByOne),
            4 => Some(VideoMode::Tiled4K),
            _ => None,
        }
    }
}

impl Display for VideoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
