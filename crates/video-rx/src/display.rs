//! # Display Seam
//!
//! The decoder drives a display through this trait: it queries capabilities
//! during reconfiguration, then cycles frames through a get/put protocol,
//! holding at most one writable frame at a time.

use video_core::{Codec, Interlacing, VideoDesc, VideoFrame, VideoMode};

/// How the display arranges a multi-tile frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferLayout {
    /// All tiles share a single surface at tile-indexed offsets.
    Merged,
    /// Each tile has its own framebuffer.
    SeparateTiles,
}

/// Frame submission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutFrameFlag {
    /// Drop the frame if the display is busy.
    NonBlocking,
    /// Wait for the display.
    Blocking,
    /// The frame is being withdrawn, not shown (pipeline flush).
    Discard,
}

/// Interlacing modes assumed when the display does not report its own.
pub const DEFAULT_DISPLAY_INTERLACINGS: [Interlacing; 3] = [
    Interlacing::Progressive,
    Interlacing::InterlacedMerged,
    Interlacing::SegmentedFrame,
];

/// A video display (or any frame consumer standing in for one).
pub trait VideoDisplay: Send + Sync {
    /// Output codecs the display accepts natively, in preference order.
    fn codecs(&self) -> Vec<Codec>;

    /// Interlacing modes the display can present. `None` selects
    /// [`DEFAULT_DISPLAY_INTERLACINGS`].
    fn supported_interlacings(&self) -> Option<Vec<Interlacing>> {
        None
    }

    fn layout(&self) -> FramebufferLayout {
        FramebufferLayout::Merged
    }

    /// Requested R/G/B channel bit positions. `None` selects `{0, 8, 16}`.
    fn rgb_shift(&self) -> Option<[u8; 3]> {
        None
    }

    /// Requested framebuffer pitch. `None` selects the computed linesize.
    fn pitch(&self) -> Option<usize> {
        None
    }

    /// Switch the display to a new output format. Returning `false` aborts
    /// the decoder reconfiguration.
    fn reconfigure(&self, desc: &VideoDesc, mode: VideoMode) -> bool;

    /// Hand out the next writable framebuffer.
    fn get_frame(&self) -> VideoFrame;

    /// Submit a frame. Returns whether it was (or will be) shown; a `false`
    /// under [`PutFrameFlag::NonBlocking`] means the frame was dropped.
    fn put_frame(&self, frame: VideoFrame, flag: PutFrameFlag) -> bool;
}
