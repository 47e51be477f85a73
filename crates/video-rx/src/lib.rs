//! # Video RX
//!
//! Reception and decoding pipeline for an RTP-style realtime video
//! transport. Inbound packets belonging to one logical video buffer are
//! reassembled into per-substream byte regions, optionally decrypted and
//! FEC-corrected, decompressed (or converted in place, row by row), and the
//! completed frame is handed to a display sink.
//!
//! ## Pipeline
//!
//! ```text
//! Receiver ──► [fec_queue] ──► FEC stage ──► [decompress_queue] ──► Decompress/Display
//! ```
//!
//! The receiver stage runs on the caller's network thread
//! ([`VideoDecoder::decode_frame`]); the other two stages are worker threads
//! owned by the decoder. Both handoff queues hold a single message, which
//! bounds memory and gives strict backpressure. An out-of-band mailbox
//! carries reconfiguration requests from the FEC stage back to the receiver.
//!
//! External collaborators plug in through traits: [`VideoDisplay`] consumes
//! frames, [`VideoDecompressor`]/[`DecompressorFactory`] decode opaque
//! bitstreams, [`FecCodec`] recovers lost packet ranges and [`ControlSink`]
//! receives telemetry.

pub mod config;
pub mod control;
pub mod decoder;
pub mod decompress;
pub mod decrypt;
pub mod display;
pub mod fec;
mod line_decoder;
mod msg;
mod receiver;
pub mod stats;
pub mod wire;

pub use config::{DecoderConfig, DecoderConfigBuilder, DropPolicy};
pub use control::{ControlSink, NoopControl};
pub use decoder::{DecoderError, VideoDecoder};
pub use decompress::{
    shared_codec_lock, DecompressResult, DecompressorFactory, VideoDecompressor, LAVCD_LOCK_NAME,
};
pub use decrypt::{CipherMode, PacketCrypto};
pub use display::{FramebufferLayout, PutFrameFlag, VideoDisplay};
pub use fec::{no_fec_factory, FecCodec, FecFactory};
pub use stats::{CumulativeStats, ReceiverStats};
pub use wire::{Packet, PayloadType, ProtocolError};
