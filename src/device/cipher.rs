//! AES key derivation and frame decryption.
//!
//! The headset encrypts every 32-byte frame as two independent AES-128 ECB
//! blocks. The key is derived from the last four characters of the device
//! serial number interleaved with fixed filler bytes.

use crate::device::types::{RawFrame, FRAME_LEN};
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::{Aes128, Block};

/// AES block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// Derived AES-128 key.
pub type CipherKey = [u8; 16];

/// Errors raised while setting up the frame cipher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("serial number '{0}' is too short, at least 4 bytes are required")]
    SerialTooShort(String),
}

/// Derive the 16-byte AES key from a headset serial number.
pub fn derive_key(serial: &str) -> Result<CipherKey, CipherError> {
    let sn = serial.as_bytes();
    if sn.len() < 4 {
        return Err(CipherError::SerialTooShort(serial.to_string()));
    }
    let n = sn.len();
    let (s1, s2, s3, s4) = (sn[n - 1], sn[n - 2], sn[n - 3], sn[n - 4]);

    Ok([
        s1, 0x00, s2, b'T', s3, 0x10, s4, b'B', s1, 0x00, s2, b'H', s3, 0x00, s4, b'P',
    ])
}

/// Decrypts headset frames block by block.
#[derive(Clone)]
pub struct FrameCipher {
    aes: Aes128,
}

impl FrameCipher {
    /// Build a cipher from an already derived key.
    pub fn new(key: &CipherKey) -> Self {
        Self {
            aes: Aes128::new(&(*key).into()),
        }
    }

    /// Derive the key from `serial` and build the cipher.
    pub fn from_serial(serial: &str) -> Result<Self, CipherError> {
        Ok(Self::new(&derive_key(serial)?))
    }

    /// Decrypt both halves of a frame independently.
    pub fn decrypt_frame(&self, frame: &RawFrame) -> [u8; FRAME_LEN] {
        let mut plain = [0u8; FRAME_LEN];
        for (src, dst) in frame
            .chunks_exact(BLOCK_LEN)
            .zip(plain.chunks_exact_mut(BLOCK_LEN))
        {
            let mut block = Block::clone_from_slice(src);
            self.aes.decrypt_block(&mut block);
            dst.copy_from_slice(&block);
        }
        plain
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher").finish_non_exhaustive()
    }
}
