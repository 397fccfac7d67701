//! Cipher stage: header derivation, padding and AES-128-ECB encryption.
//!
//! The device expects the padded image encrypted block by block with no IV
//! and no authentication tag. Integrity rests on the CRC-32 in the metadata
//! header, which covers the plaintext and is never checked against the
//! ciphertext, so corruption in transit is not detected at this layer.

use std::fmt;

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use thiserror::Error;

use crate::payload::FirmwareImage;
use crate::protocol::constants::{CIPHER_BLOCK_SIZE, PAD_BYTE};
use crate::protocol::header::MetadataHeader;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("Invalid key hex: {0}")]
    InvalidKeyHex(String),
    #[error("Input length {0} is not a multiple of the 16-byte block size")]
    UnalignedInput(usize),
}

/// 128-bit symmetric key, owned by the caller and passed into each run.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 16]);

impl EncryptionKey {
    pub const SIZE: usize = 16;

    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; 16] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    /// Parse a key from 32 hex digits.
    pub fn from_hex(s: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(s.trim()).map_err(|e| CipherError::InvalidKeyHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Metadata header for an image: version 0, unpadded length and CRC-32.
pub fn compute_header(image: &FirmwareImage) -> MetadataHeader {
    MetadataHeader::new(image.length(), image.crc32())
}

/// Right-pad with 0xFF to the next 16-byte boundary. Aligned input is returned as is.
pub fn pad(image: &[u8]) -> Vec<u8> {
    let padded_len = image.len().div_ceil(CIPHER_BLOCK_SIZE) * CIPHER_BLOCK_SIZE;
    let mut out = Vec::with_capacity(padded_len);
    out.extend_from_slice(image);
    out.resize(padded_len, PAD_BYTE);
    out
}

/// Encrypt block-aligned data with AES-128 in ECB mode.
pub fn encrypt(padded: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CipherError> {
    if padded.len() % CIPHER_BLOCK_SIZE != 0 {
        return Err(CipherError::UnalignedInput(padded.len()));
    }
    let mut output = padded.to_vec();
    encrypt_in_place(&mut output, key);
    Ok(output)
}

/// Inverse of [`encrypt`]. The device never sends ciphertext back; this is
/// used to check an encrypted image offline.
pub fn decrypt(ciphertext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CipherError> {
    if ciphertext.len() % CIPHER_BLOCK_SIZE != 0 {
        return Err(CipherError::UnalignedInput(ciphertext.len()));
    }

    let cipher = Aes128::new(key.as_bytes().into());
    let mut output = ciphertext.to_vec();
    for block in output.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
        cipher.decrypt_block(block.into());
    }
    Ok(output)
}

/// Pad then encrypt an image, ready for chunking.
pub fn encrypt_image(image: &FirmwareImage, key: &EncryptionKey) -> Vec<u8> {
    let mut data = pad(image.raw_data());
    encrypt_in_place(&mut data, key);
    data
}

fn encrypt_in_place(data: &mut [u8], key: &EncryptionKey) {
    let cipher = Aes128::new(key.as_bytes().into());
    for block in data.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
        cipher.encrypt_block(block.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn test_pad_aligned_is_identity() {
        for len in [0usize, 16, 32, 240, 4096] {
            let data = vec![0x5A; len];
            assert_eq!(pad(&data), data);
        }
    }

    #[test]
    fn test_pad_lengths() {
        for len in 0..100usize {
            let data = vec![0u8; len];
            let padded = pad(&data);
            assert_eq!(padded.len() % 16, 0);
            assert!(padded.len() - len < 16);
            assert!(padded[len..].iter().all(|&b| b == PAD_BYTE));
            assert_eq!(&padded[..len], &data[..]);
        }
    }

    #[test]
    fn test_fips197_vector() {
        // FIPS-197 appendix C.1
        let key = EncryptionKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        let plain = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let enc = encrypt(&plain, &key).unwrap();
        assert_eq!(hex::encode(enc), "69c4e0d86a7b0430d8cdb78070b4c55a");
    }

    #[test]
    fn test_ecb_blocks_are_independent() {
        let key = EncryptionKey::new(KEY);
        let enc = encrypt(&[0xAB; 32], &key).unwrap();
        assert_eq!(enc[..16], enc[16..]);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = EncryptionKey::new(KEY);
        let padded = pad(b"firmware image bytes that span blocks");
        let enc = encrypt(&padded, &key).unwrap();
        assert_eq!(enc.len(), padded.len());
        assert_ne!(enc, padded);
        assert_eq!(decrypt(&enc, &key).unwrap(), padded);
    }

    #[test]
    fn test_unaligned_input_rejected() {
        let key = EncryptionKey::new(KEY);
        assert_eq!(
            encrypt(&[0u8; 17], &key).unwrap_err(),
            CipherError::UnalignedInput(17)
        );
    }

    #[test]
    fn test_key_validation() {
        assert_eq!(
            EncryptionKey::from_slice(&[0u8; 15]).unwrap_err(),
            CipherError::InvalidKeyLength(15)
        );
        assert!(EncryptionKey::from_slice(&[0u8; 16]).is_ok());
        assert!(matches!(
            EncryptionKey::from_hex("zz"),
            Err(CipherError::InvalidKeyHex(_))
        ));
        assert_eq!(
            EncryptionKey::from_hex("00112233").unwrap_err(),
            CipherError::InvalidKeyLength(4)
        );
        assert_eq!(format!("{:?}", EncryptionKey::new(KEY)), "EncryptionKey(..)");
    }

    #[test]
    fn test_compute_header_known_vectors() {
        let empty = FirmwareImage::from_bytes(Vec::new()).unwrap();
        assert_eq!(compute_header(&empty), MetadataHeader::new(0, 0));

        let image = FirmwareImage::from_bytes(b"123456789".to_vec()).unwrap();
        let header = compute_header(&image);
        assert_eq!(header.version, 0);
        assert_eq!(header.length, 9);
        assert_eq!(header.crc32, 0xCBF43926);
    }

    #[test]
    fn test_header_describes_unpadded_image() {
        let image = FirmwareImage::from_bytes(vec![1u8; 20]).unwrap();
        let header = compute_header(&image);
        assert_eq!(header.length, 20);
        assert_eq!(encrypt_image(&image, &EncryptionKey::new(KEY)).len(), 32);
    }
}
