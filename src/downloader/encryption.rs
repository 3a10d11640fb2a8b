use aes::cipher::{generic_array::GenericArray, BlockDecryptMut, KeyIvInit};
use log::warn;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const BLOCK_SIZE: usize = 16;

/// AES-128-CBC segment decrypter.
///
/// Built once per key reference and applied per segment. Decryption is
/// deliberately tolerant: anything that cannot be decrypted (wrong key
/// size, non block-aligned ciphertext) or unpadded (non-standard encoders)
/// falls back to returning the bytes it has, because a corrupted-but-present
/// segment beats a missing one.
pub struct Decrypter {
    key: [u8; 16],
    iv: Option<[u8; 16]>,
}

impl Decrypter {
    /// Returns `None` when `key` is not exactly 16 bytes, which happens when
    /// a key server responds with garbage; the cache passes such responses
    /// through untouched.
    pub fn new(key: &[u8], iv: Option<[u8; 16]>) -> Option<Self> {
        Some(Self {
            key: <[u8; 16]>::try_from(key).ok()?,
            iv,
        })
    }

    /// Decrypts one segment. When the playlist carried no explicit iv, the
    /// segment index encoded as a 16-byte big-endian integer is used, per
    /// the hls specification.
    pub fn decrypt(&self, mut data: Vec<u8>, index: u64) -> Vec<u8> {
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            warn!(
                "segment {} ciphertext is not block aligned ({} bytes), keeping it as is",
                index,
                data.len()
            );
            return data;
        }

        let iv = self.iv.unwrap_or((index as u128).to_be_bytes());
        let mut cipher = Aes128CbcDec::new(&self.key.into(), &iv.into());

        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        strip_pkcs7(&mut data);
        data
    }
}

/// Removes pkcs#7 padding in place. Invalid padding leaves the buffer
/// untouched instead of failing the segment.
fn strip_pkcs7(data: &mut Vec<u8>) {
    let Some(&pad) = data.last() else { return };
    let pad = pad as usize;

    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return;
    }

    if data[data.len() - pad..].iter().all(|&x| x as usize == pad) {
        data.truncate(data.len() - pad);
    }
}
