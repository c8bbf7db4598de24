use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

use crate::error::{KiraraError, KiraraResult};

const BLOCK_SIZE: usize = 16;

/// AES-128 key of a playlist, shared by every segment of one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aes128Key {
    pub key: [u8; 16],
    /// Explicit IV from `#EXT-X-KEY`. When absent, the IV is derived from the segment index.
    pub iv: Option<[u8; 16]>,
}

impl Aes128Key {
    pub fn from_bytes(key: Vec<u8>, iv: Option<[u8; 16]>) -> KiraraResult<Self> {
        Ok(Self {
            key: key.try_into().map_err(KiraraError::InvalidAes128Key)?,
            iv,
        })
    }

    /// Key given by the user as a hex string, e.g. `--key 000102...0f`.
    pub fn from_hex(key: &str, iv: Option<[u8; 16]>) -> KiraraResult<Self> {
        let key = key.trim();
        let key = key
            .strip_prefix("0x")
            .or_else(|| key.strip_prefix("0X"))
            .unwrap_or(key);
        Self::from_bytes(hex::decode(key)?, iv)
    }

    pub fn iv_for(&self, sequence: u32) -> [u8; 16] {
        self.iv.unwrap_or_else(|| default_iv(sequence))
    }

    pub fn decrypt(&self, sequence: u32, data: &[u8]) -> KiraraResult<Vec<u8>> {
        decrypt(data, &self.key, &self.iv_for(sequence))
    }
}

/// Decrypt an AES-128-CBC segment and strip its PKCS#7 padding.
pub fn decrypt(data: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> KiraraResult<Vec<u8>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(KiraraError::InvalidCiphertextLength(data.len()));
    }

    let decryptor = cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into());
    Ok(decryptor.decrypt_padded_vec_mut::<Pkcs7>(data)?)
}

/// IV used when `#EXT-X-KEY` has no `IV` attribute: the sequence number as a
/// big-endian integer in the last 4 bytes.
pub fn default_iv(sequence: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[12..].copy_from_slice(&sequence.to_be_bytes());
    iv
}
