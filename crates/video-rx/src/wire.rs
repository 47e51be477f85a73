//! # Wire Framing
//!
//! Every packet of a video buffer starts with a common 3-word header:
//!
//! ```text
//! ┌──────────────────────────────┬──────────────┬───────────────┐
//! │ substream:10 | buffer_no:22  │   data_pos   │ buffer_length │
//! └──────────────────────────────┴──────────────┴───────────────┘
//! ```
//!
//! Plain video packets extend it to six words with the frame metadata
//! (geometry, FourCC, interlacing and the packed fps tuple); FEC-bearing
//! packets extend it to five words with `k:13|m:13|c:6` and a seed. Encrypted
//! variants append one crypto word *after* the media header, followed by the
//! ciphertext. All words are big-endian.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use thiserror::Error;
use video_core::{Codec, FecDesc, FecKind, FpsCode, Interlacing, VideoDesc};

use crate::decrypt::CipherMode;

/// Length of the plain video payload header (6 words).
pub const VIDEO_HDR_LEN: usize = 24;
/// Length of the FEC payload header (5 words).
pub const FEC_HDR_LEN: usize = 20;
/// Length of the crypto header (1 word).
pub const CRYPTO_HDR_LEN: usize = 4;

/// Wire parsing failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("packet too short: {0} bytes")]
    ShortPacket(usize),
    #[error("unknown FourCC {0:#010x}")]
    UnknownCodec(u32),
    #[error("unknown cipher mode: {0}")]
    UnknownCipherMode(u8),
    #[error("unknown payload type: {0}")]
    UnknownPayloadType(u8),
    #[error("invalid interlacing value: {0}")]
    InvalidInterlacing(u8),
}

/// RTP payload type discriminating the packet shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    Video = 20,
    EncryptedVideo = 21,
    VideoRs = 22,
    EncryptedVideoRs = 23,
    VideoLdgm = 24,
    EncryptedVideoLdgm = 25,
}

impl PayloadType {
    pub fn from_u8(value: u8) -> Option<PayloadType> {
        match value {
            20 => Some(PayloadType::Video),
            21 => Some(PayloadType::EncryptedVideo),
            22 => Some(PayloadType::VideoRs),
            23 => Some(PayloadType::EncryptedVideoRs),
            24 => Some(PayloadType::VideoLdgm),
            25 => Some(PayloadType::EncryptedVideoLdgm),
            _ => None,
        }
    }

    pub const fn is_encrypted(self) -> bool {
        matches!(
            self,
            PayloadType::EncryptedVideo
                | PayloadType::EncryptedVideoRs
                | PayloadType::EncryptedVideoLdgm
        )
    }

    pub const fn fec_kind(self) -> Option<FecKind> {
        match self {
            PayloadType::VideoRs | PayloadType::EncryptedVideoRs => Some(FecKind::ReedSolomon),
            PayloadType::VideoLdgm | PayloadType::EncryptedVideoLdgm => Some(FecKind::Ldgm),
            _ => None,
        }
    }

    pub const fn has_fec(self) -> bool {
        self.fec_kind().is_some()
    }

    /// Length of the media header preceding the payload (and the crypto word,
    /// if any).
    pub const fn media_header_len(self) -> usize {
        if self.has_fec() { FEC_HDR_LEN } else { VIDEO_HDR_LEN }
    }
}

/// One packet as delivered by the packet source, payload headers included.
#[derive(Debug, Clone)]
pub struct Packet {
    pub pt: u8,
    pub ssrc: u32,
    pub data: Bytes,
}

/// The common first three header words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainHeader {
    pub substream: u16,
    pub buffer_number: u32,
    pub data_pos: u32,
    pub buffer_length: u32,
}

impl MainHeader {
    pub fn parse(data: &[u8]) -> Result<MainHeader, ProtocolError> {
        if data.len() < 12 {
            return Err(ProtocolError::ShortPacket(data.len()));
        }
        let mut rdr = Cursor::new(data);
        let word0 = rdr.read_u32::<BigEndian>().unwrap();
        let data_pos = rdr.read_u32::<BigEndian>().unwrap();
        let buffer_length = rdr.read_u32::<BigEndian>().unwrap();
        Ok(MainHeader {
            substream: (word0 >> 22) as u16,
            buffer_number: word0 & 0x3f_ffff,
            data_pos,
            buffer_length,
        })
    }
}

/// Parse the six-word video payload header into a descriptor.
///
/// The tile count is taken from the substream field plus one, which is
/// authoritative only on the substream owning the marker bit.
pub fn parse_video_desc(hdr: &[u8]) -> Result<VideoDesc, ProtocolError> {
    if hdr.len() < VIDEO_HDR_LEN {
        return Err(ProtocolError::ShortPacket(hdr.len()));
    }
    let mut rdr = Cursor::new(hdr);
    let word0 = rdr.read_u32::<BigEndian>().unwrap();
    let _data_pos = rdr.read_u32::<BigEndian>().unwrap();
    let _length = rdr.read_u32::<BigEndian>().unwrap();
    let geometry = rdr.read_u32::<BigEndian>().unwrap();
    let fcc = rdr.read_u32::<BigEndian>().unwrap();
    let rate = rdr.read_u32::<BigEndian>().unwrap();

    let color_spec = Codec::from_fourcc(fcc).ok_or(ProtocolError::UnknownCodec(fcc))?;
    let il_raw = (rate >> 29) as u8;
    let interlacing =
        Interlacing::from_wire(il_raw).ok_or(ProtocolError::InvalidInterlacing(il_raw))?;
    let fps = FpsCode {
        fps_pt: ((rate >> 19) & 0x3ff) as u16,
        fpsd: ((rate >> 15) & 0xf) as u8,
        fd: (rate >> 14) & 1 == 1,
        fi: (rate >> 13) & 1 == 1,
    }
    .fps();

    Ok(VideoDesc {
        width: geometry >> 16,
        height: geometry & 0xffff,
        fps,
        color_spec,
        interlacing,
        tile_count: (word0 >> 22) + 1,
    })
}

/// Parse the FEC parameters out of a five-word FEC payload header.
pub fn parse_fec_params(hdr: &[u8], kind: FecKind) -> Result<FecDesc, ProtocolError> {
    if hdr.len() < FEC_HDR_LEN {
        return Err(ProtocolError::ShortPacket(hdr.len()));
    }
    let mut rdr = Cursor::new(&hdr[12..]);
    let kmc = rdr.read_u32::<BigEndian>().unwrap();
    let seed = rdr.read_u32::<BigEndian>().unwrap();
    Ok(FecDesc {
        kind,
        k: (kmc >> 19) as u16,
        m: ((kmc >> 6) & 0x1fff) as u16,
        c: (kmc & 0x3f) as u8,
        seed,
    })
}

/// Parse the crypto word following the media header.
pub fn parse_crypto_mode(word: &[u8]) -> Result<CipherMode, ProtocolError> {
    if word.len() < CRYPTO_HDR_LEN {
        return Err(ProtocolError::ShortPacket(word.len()));
    }
    let mode = word[0];
    CipherMode::from_wire(mode).ok_or(ProtocolError::UnknownCipherMode(mode))
}

fn write_main_header(
    buf: &mut Vec<u8>,
    substream: u16,
    buffer_number: u32,
    data_pos: u32,
    buffer_length: u32,
) {
    buf.write_u32::<BigEndian>(((substream as u32) << 22) | (buffer_number & 0x3f_ffff))
        .unwrap();
    buf.write_u32::<BigEndian>(data_pos).unwrap();
    buf.write_u32::<BigEndian>(buffer_length).unwrap();
}

/// Serialize a plain video payload header.
pub fn write_video_header(
    desc: &VideoDesc,
    substream: u16,
    buffer_number: u32,
    data_pos: u32,
    buffer_length: u32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(VIDEO_HDR_LEN);
    write_main_header(&mut buf, substream, buffer_number, data_pos, buffer_length);
    buf.write_u32::<BigEndian>((desc.width << 16) | (desc.height & 0xffff))
        .unwrap();
    buf.write_u32::<BigEndian>(desc.color_spec.fourcc()).unwrap();
    let code = FpsCode::from_fps(desc.fps);
    let rate = ((desc.interlacing as u32) << 29)
        | (((code.fps_pt as u32) & 0x3ff) << 19)
        | (((code.fpsd as u32) & 0xf) << 15)
        | ((code.fd as u32) << 14)
        | ((code.fi as u32) << 13);
    buf.write_u32::<BigEndian>(rate).unwrap();
    buf
}

/// Serialize a FEC payload header.
pub fn write_fec_header(
    fec: &FecDesc,
    substream: u16,
    buffer_number: u32,
    data_pos: u32,
    buffer_length: u32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FEC_HDR_LEN);
    write_main_header(&mut buf, substream, buffer_number, data_pos, buffer_length);
    buf.write_u32::<BigEndian>(
        ((fec.k as u32) << 19) | (((fec.m as u32) & 0x1fff) << 6) | ((fec.c as u32) & 0x3f),
    )
    .unwrap();
    buf.write_u32::<BigEndian>(fec.seed).unwrap();
    buf
}

/// Serialize the crypto word.
pub fn write_crypto_header(mode: CipherMode) -> [u8; CRYPTO_HDR_LEN] {
    [mode as u8, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_header_round_trip() {
        let buf = write_video_header(
            &VideoDesc::new(1920, 1080, 25.0, Codec::Uyvy),
            3,
            0x2a_1234,
            4096,
            65536,
        );
        let main = MainHeader::parse(&buf).unwrap();
        assert_eq!(main.substream, 3);
        assert_eq!(main.buffer_number, 0x2a_1234);
        assert_eq!(main.data_pos, 4096);
        assert_eq!(main.buffer_length, 65536);
    }

    #[test]
    fn test_video_desc_round_trip() {
        let mut desc = VideoDesc::new(1920, 1080, 29.97, Codec::Uyvy);
        desc.interlacing = Interlacing::InterlacedMerged;
        // substream 3 marks a four-tile frame
        let buf = write_video_header(&desc, 3, 1, 0, 0);
        let parsed = parse_video_desc(&buf).unwrap();
        assert_eq!(parsed.width, 1920);
        assert_eq!(parsed.height, 1080);
        assert_eq!(parsed.color_spec, Codec::Uyvy);
        assert_eq!(parsed.interlacing, Interlacing::InterlacedMerged);
        assert_eq!(parsed.tile_count, 4);
        assert!((parsed.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_unknown_fourcc_rejected() {
        let mut buf = write_video_header(&VideoDesc::new(64, 64, 25.0, Codec::Rgb), 0, 1, 0, 0);
        buf[16..20].copy_from_slice(b"ZZZZ");
        assert!(matches!(
            parse_video_desc(&buf),
            Err(ProtocolError::UnknownCodec(_))
        ));
    }

    #[test]
    fn test_fec_params_round_trip() {
        let fec = FecDesc::new(FecKind::Ldgm, 10, 12, 6, 0xdead_beef);
        let buf = write_fec_header(&fec, 0, 7, 0, 1000);
        let parsed = parse_fec_params(&buf, FecKind::Ldgm).unwrap();
        assert_eq!(parsed, fec);
    }

    #[test]
    fn test_payload_type_classification() {
        assert!(!PayloadType::Video.is_encrypted());
        assert!(!PayloadType::Video.has_fec());
        assert!(PayloadType::EncryptedVideoLdgm.is_encrypted());
        assert_eq!(
            PayloadType::EncryptedVideoLdgm.fec_kind(),
            Some(FecKind::Ldgm)
        );
        assert_eq!(PayloadType::VideoRs.fec_kind(), Some(FecKind::ReedSolomon));
        assert_eq!(PayloadType::from_u8(96), None);
    }
}
