//! # Per-Packet Decryption
//!
//! AES-128 packet protection. The packet body is a 16-byte IV followed by
//! ciphertext (ECB ignores the IV); the recovered plaintext carries the
//! payload plus a trailing CRC32 computed over the associated data (the media
//! header) and the payload. A CRC mismatch yields an empty result, which
//! callers treat as "drop this packet" rather than "drop the buffer".

use aes::cipher::{
    block_padding::Pkcs7, AsyncStreamCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
    StreamCipher,
};
use aes::Aes128;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;

/// Block-cipher mode carried in the crypto header word.
///
/// Wire value 0 means "none" and is invalid inside an encrypted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CipherMode {
    Ecb = 1,
    Ctr = 2,
    Cfb = 3,
    Cbc = 4,
}

impl CipherMode {
    pub fn from_wire(value: u8) -> Option<CipherMode> {
        match value {
            1 => Some(CipherMode::Ecb),
            2 => Some(CipherMode::Ctr),
            3 => Some(CipherMode::Cfb),
            4 => Some(CipherMode::Cbc),
            _ => None,
        }
    }
}

/// Length of the IV prefixed to every encrypted packet body.
pub const IV_LEN: usize = 16;

/// Packet-level AES-128 encrypt/decrypt state.
#[derive(Clone)]
pub struct PacketCrypto {
    key: [u8; 16],
}

impl PacketCrypto {
    /// Derive a key from arbitrary-length key material by folding it into
    /// 16 bytes. Empty material is rejected.
    pub fn new(key_material: &[u8]) -> Option<PacketCrypto> {
        if key_material.is_empty() {
            return None;
        }
        let mut key = [0u8; 16];
        for (i, byte) in key_material.iter().enumerate() {
            key[i % 16] ^= byte;
        }
        Some(PacketCrypto { key })
    }

    fn checksum(aad: &[u8], payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(aad);
        hasher.update(payload);
        hasher.finalize()
    }

    /// Encrypt `payload` into a packet body (IV || ciphertext).
    pub fn encrypt(&self, payload: &[u8], aad: &[u8], mode: CipherMode, iv: [u8; 16]) -> Vec<u8> {
        let mut plaintext = Vec::with_capacity(payload.len() + 4);
        plaintext.extend_from_slice(payload);
        plaintext.extend_from_slice(&Self::checksum(aad, payload).to_le_bytes());

        let ciphertext = match mode {
            CipherMode::Cbc => Aes128CbcEnc::new(&self.key.into(), &iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(&plaintext),
            CipherMode::Ecb => {
                Aes128EcbEnc::new(&self.key.into()).encrypt_padded_vec_mut::<Pkcs7>(&plaintext)
            }
            CipherMode::Ctr => {
                let mut buf = plaintext;
                Aes128Ctr::new(&self.key.into(), &iv.into()).apply_keystream(&mut buf);
                buf
            }
            CipherMode::Cfb => {
                let mut buf = plaintext;
                Aes128CfbEnc::new(&self.key.into(), &iv.into()).encrypt(&mut buf);
                buf
            }
        };

        let mut body = Vec::with_capacity(IV_LEN + ciphertext.len());
        body.extend_from_slice(&iv);
        body.extend_from_slice(&ciphertext);
        body
    }

    /// Decrypt a packet body and verify its checksum.
    ///
    /// Returns `None` on malformed input, padding failure or CRC mismatch;
    /// the packet is then dropped without affecting the rest of the buffer.
    pub fn decrypt(&self, body: &[u8], aad: &[u8], mode: CipherMode) -> Option<Vec<u8>> {
        if body.len() < IV_LEN {
            return None;
        }
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&body[..IV_LEN]);
        let ciphertext = &body[IV_LEN..];

        let plaintext = match mode {
            CipherMode::Cbc => Aes128CbcDec::new(&self.key.into(), &iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .ok()?,
            CipherMode::Ecb => Aes128EcbDec::new(&self.key.into())
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .ok()?,
            CipherMode::Ctr => {
                let mut buf = ciphertext.to_vec();
                Aes128Ctr::new(&self.key.into(), &iv.into()).apply_keystream(&mut buf);
                buf
            }
            CipherMode::Cfb => {
                let mut buf = ciphertext.to_vec();
                Aes128CfbDec::new(&self.key.into(), &iv.into()).decrypt(&mut buf);
                buf
            }
        };

        if plaintext.len() < 4 {
            return None;
        }
        let (payload, crc_bytes) = plaintext.split_at(plaintext.len() - 4);
        let crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc != Self::checksum(aad, payload) {
            return None;
        }
        Some(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [CipherMode; 4] = [
        CipherMode::Ecb,
        CipherMode::Ctr,
        CipherMode::Cfb,
        CipherMode::Cbc,
    ];

    #[test]
    fn test_round_trip_all_modes() {
        let crypto = PacketCrypto::new(b"correct horse battery staple").unwrap();
        let aad = b"header-bytes";
        let payload = b"the quick brown fox jumps over the lazy dog";
        for mode in MODES {
            let body = crypto.encrypt(payload, aad, mode, [7u8; 16]);
            let out = crypto.decrypt(&body, aad, mode).unwrap();
            assert_eq!(out, payload, "{mode:?}");
        }
    }

    #[test]
    fn test_wrong_key_fails_crc() {
        let sender = PacketCrypto::new(b"right key").unwrap();
        let receiver = PacketCrypto::new(b"wrong key").unwrap();
        for mode in MODES {
            let body = sender.encrypt(b"secret", b"aad", mode, [1u8; 16]);
            assert!(receiver.decrypt(&body, b"aad", mode).is_none(), "{mode:?}");
        }
    }

    #[test]
    fn test_tampered_aad_fails() {
        let crypto = PacketCrypto::new(b"key").unwrap();
        let body = crypto.encrypt(b"payload", b"aad-one", CipherMode::Ctr, [2u8; 16]);
        assert!(crypto.decrypt(&body, b"aad-two", CipherMode::Ctr).is_none());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(PacketCrypto::new(b"").is_none());
    }
}
