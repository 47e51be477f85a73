//! # Video Core
//!
//! Format model shared by the reception pipeline: codec identifiers, video
//! descriptors, tile grids, interlacing handling, tiled frames and the pixel
//! line-conversion registry.

pub mod codec;
pub mod convert;
pub mod desc;
pub mod fec;
pub mod frame;
pub mod interlacing;
pub mod mode;

pub use codec::{fourcc, Codec};
pub use convert::{
    copy_line, copy_line_rgb, copy_line_rgba, get_line_conversion, LineDecodeFn, DEFAULT_RGB_SHIFT,
};
pub use desc::{FpsCode, VideoDesc};
pub use fec::{FecDesc, FecKind};
pub use frame::{Tile, VideoFrame};
pub use interlacing::{
    il_lower_to_merged, il_merged_to_upper, il_upper_to_merged, ChangeIlFn, Interlacing,
};
pub use mode::VideoMode;
