//! AES primitives for CENC.
//!
//! AES-CTR is built directly on the AES block cipher because CENC dictates
//! counter behavior the stock CTR mode cannot express: only the low 64 bits
//! of the counter block increment, a persistent block offset carries partial
//! keystream blocks across calls, and the IV update between samples depends
//! on the IV size. AES-CBC wraps the `cbc` crate with PKCS#7 padding.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use rand::RngCore;

use crate::error::{Error, Result};

/// AES block size and CENC key size, in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

// CENC allows 64-bit or 128-bit per-sample IVs.
fn is_iv_size_valid(iv_size: usize) -> bool {
    iv_size == 8 || iv_size == 16
}

fn is_key_size_valid_for_aes(key_size: usize) -> bool {
    key_size == 16 || key_size == 24 || key_size == 32
}

/// Increment an 8-byte big-endian counter by one. Returns true on overflow.
fn increment64(counter: &mut [u8]) -> bool {
    debug_assert_eq!(counter.len(), 8);
    for byte in counter.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            return false;
        }
    }
    true
}

/// AES-CTR stream encryptor with CENC counter semantics.
///
/// The 16-byte counter block is the IV left-padded with zeros when the IV is
/// 8 bytes. Bytes 8..16 of the counter form a 64-bit big-endian integer that
/// increments once per keystream block.
pub struct AesCtrEncryptor {
    cipher: Aes128,
    iv: Vec<u8>,
    counter: [u8; AES_BLOCK_SIZE],
    encrypted_counter: [u8; AES_BLOCK_SIZE],
    block_offset: usize,
    counter_overflow: bool,
}

impl AesCtrEncryptor {
    /// Create an encryptor from a 16-byte CENC key and an 8- or 16-byte IV.
    pub fn with_iv(key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != AES_BLOCK_SIZE {
            return Err(Error::muxer(format!(
                "invalid key size {} for CENC, expected 16",
                key.len()
            )));
        }
        let cipher = Aes128::new_from_slice(key)
            .map_err(|_| Error::muxer("failed to initialize AES key"))?;
        let mut encryptor = Self {
            cipher,
            iv: Vec::new(),
            counter: [0u8; AES_BLOCK_SIZE],
            encrypted_counter: [0u8; AES_BLOCK_SIZE],
            block_offset: 0,
            counter_overflow: false,
        };
        encryptor.set_iv(iv)?;
        Ok(encryptor)
    }

    /// Create an encryptor with a randomly generated IV of `iv_size` bytes.
    pub fn with_random_iv(key: &[u8], iv_size: usize) -> Result<Self> {
        if !is_iv_size_valid(iv_size) {
            return Err(Error::muxer(format!("invalid IV size: {iv_size}")));
        }
        let mut iv = vec![0u8; iv_size];
        rand::thread_rng().fill_bytes(&mut iv);
        Self::with_iv(key, &iv)
    }

    /// Encrypt `data` in place. The block offset persists across calls, so
    /// `encrypt(a); encrypt(b)` equals one `encrypt(a ‖ b)`.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            if self.block_offset == 0 {
                let mut block = GenericArray::clone_from_slice(&self.counter);
                self.cipher.encrypt_block(&mut block);
                self.encrypted_counter.copy_from_slice(&block);
                // Bytes 8..16 of the counter block are a 64-bit big-endian
                // integer incremented once per block of sample data.
                if increment64(&mut self.counter[8..]) {
                    self.counter_overflow = true;
                }
            }
            *byte ^= self.encrypted_counter[self.block_offset];
            self.block_offset = (self.block_offset + 1) % AES_BLOCK_SIZE;
        }
    }

    /// For AES-CTR, decryption is identical to encryption.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.encrypt(data);
    }

    /// Advance the IV for the next sample and reset the block offset.
    ///
    /// With an 8-byte IV the new IV is the old IV plus one (64-bit). With a
    /// 16-byte IV the new IV is the current counter, carrying any low-64-bit
    /// overflow into the high 64 bits exactly once.
    pub fn update_iv(&mut self) {
        self.block_offset = 0;
        if self.iv.len() == 8 {
            increment64(&mut self.iv);
            self.counter[..8].copy_from_slice(&self.iv);
            self.counter[8..].fill(0);
        } else {
            if self.counter_overflow {
                increment64(&mut self.counter[..8]);
            }
            self.iv.copy_from_slice(&self.counter);
        }
        self.counter_overflow = false;
    }

    /// Replace the IV and reset the block offset.
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        if !is_iv_size_valid(iv.len()) {
            return Err(Error::muxer(format!("invalid IV size: {}", iv.len())));
        }
        self.iv = iv.to_vec();
        self.counter.fill(0);
        self.counter[..iv.len()].copy_from_slice(iv);
        self.block_offset = 0;
        self.counter_overflow = false;
        Ok(())
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn block_offset(&self) -> usize {
        self.block_offset
    }
}

fn check_cbc_params(key: &[u8], iv: &[u8]) -> Result<()> {
    if !is_key_size_valid_for_aes(key.len()) {
        return Err(Error::muxer(format!("invalid AES key size: {}", key.len())));
    }
    if iv.len() != AES_BLOCK_SIZE {
        return Err(Error::muxer(format!("invalid IV size: {}", iv.len())));
    }
    Ok(())
}

/// AES-CBC encryptor with PKCS#5/7 padding. The IV chains across calls.
pub struct AesCbcEncryptor {
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl AesCbcEncryptor {
    /// Key must be 16, 24 or 32 bytes; IV must be 16 bytes.
    pub fn with_iv(key: &[u8], iv: &[u8]) -> Result<Self> {
        check_cbc_params(key, iv)?;
        Ok(Self {
            key: key.to_vec(),
            iv: iv.to_vec(),
        })
    }

    /// Encrypt `plaintext`, padding it to a whole number of blocks.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let ciphertext = match self.key.len() {
            16 => cbc::Encryptor::<Aes128>::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            24 => cbc::Encryptor::<Aes192>::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            _ => cbc::Encryptor::<Aes256>::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };
        self.iv
            .copy_from_slice(&ciphertext[ciphertext.len() - AES_BLOCK_SIZE..]);
        ciphertext
    }

    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        if iv.len() != AES_BLOCK_SIZE {
            return Err(Error::muxer(format!("invalid IV size: {}", iv.len())));
        }
        self.iv = iv.to_vec();
        Ok(())
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

/// AES-CBC decryptor that validates and strips PKCS#5/7 padding.
pub struct AesCbcDecryptor {
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl AesCbcDecryptor {
    /// Key must be 16, 24 or 32 bytes; IV must be 16 bytes.
    pub fn with_iv(key: &[u8], iv: &[u8]) -> Result<Self> {
        check_cbc_params(key, iv)?;
        Ok(Self {
            key: key.to_vec(),
            iv: iv.to_vec(),
        })
    }

    /// Decrypt `ciphertext` and strip the padding. Fails if the ciphertext
    /// length is not a multiple of the block size or the padding is invalid.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
            return Err(Error::muxer(format!(
                "expecting ciphertext size to be a multiple of {}, got {}",
                AES_BLOCK_SIZE,
                ciphertext.len()
            )));
        }
        let next_iv = ciphertext[ciphertext.len() - AES_BLOCK_SIZE..].to_vec();
        let plaintext = match self.key.len() {
            16 => cbc::Decryptor::<Aes128>::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            24 => cbc::Decryptor::<Aes192>::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            _ => cbc::Decryptor::<Aes256>::new_from_slices(&self.key, &self.iv)
                .expect("lengths validated at construction")
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        }
        .map_err(|_| Error::muxer("invalid PKCS#5 padding in ciphertext"))?;
        self.iv = next_iv;
        Ok(plaintext)
    }

    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        if iv.len() != AES_BLOCK_SIZE {
            return Err(Error::muxer(format!("invalid IV size: {}", iv.len())));
        }
        self.iv = iv.to_vec();
        Ok(())
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // NIST SP 800-38A test key.
    const KEY: [u8; 16] = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f,
        0x3c,
    ];

    #[test]
    fn ctr_nist_vector() {
        // SP 800-38A F.5.1 CTR-AES128.Encrypt, first block.
        let iv = [
            0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd,
            0xfe, 0xff,
        ];
        let mut data = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a,
        ];
        let mut encryptor = AesCtrEncryptor::with_iv(&KEY, &iv).unwrap();
        encryptor.encrypt(&mut data);
        assert_eq!(
            data,
            [
                0x87, 0x4d, 0x61, 0x91, 0xb6, 0x20, 0xe3, 0x26, 0x1b, 0xef, 0x68, 0x64, 0x99,
                0x0d, 0xb6, 0xce,
            ]
        );
    }

    #[test]
    fn ctr_rejects_bad_sizes() {
        assert!(AesCtrEncryptor::with_iv(&KEY[..8], &[0u8; 8]).is_err());
        assert!(AesCtrEncryptor::with_iv(&KEY, &[0u8; 7]).is_err());
        assert!(AesCtrEncryptor::with_random_iv(&KEY, 12).is_err());
    }

    #[test]
    fn ctr_keystream_continuity() {
        // encrypt(P) == encrypt(P[..n]) ‖ encrypt(P[n..]) for every split
        // point, as long as the block offset is preserved across calls.
        let iv = [1u8; 8];
        let plaintext: Vec<u8> = (0u8..61).collect();

        let mut whole = plaintext.clone();
        AesCtrEncryptor::with_iv(&KEY, &iv).unwrap().encrypt(&mut whole);

        for split in 0..=plaintext.len() {
            let mut encryptor = AesCtrEncryptor::with_iv(&KEY, &iv).unwrap();
            let mut pieces = plaintext.clone();
            let (a, b) = pieces.split_at_mut(split);
            encryptor.encrypt(a);
            encryptor.encrypt(b);
            assert_eq!(pieces, whole, "split at {split}");
        }
    }

    #[test]
    fn ctr_roundtrip() {
        let iv = [7u8; 16];
        let original: Vec<u8> = (0u8..100).collect();
        let mut data = original.clone();
        AesCtrEncryptor::with_iv(&KEY, &iv).unwrap().encrypt(&mut data);
        assert_ne!(data, original);
        AesCtrEncryptor::with_iv(&KEY, &iv).unwrap().decrypt(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn ctr_update_iv_64bit() {
        let iv = [0, 0, 0, 0, 0, 0, 0, 0xFF];
        let mut encryptor = AesCtrEncryptor::with_iv(&KEY, &iv).unwrap();
        let mut data = [0u8; 40]; // several blocks
        encryptor.encrypt(&mut data);
        encryptor.update_iv();
        // New IV is the old IV plus one regardless of block count.
        assert_eq!(encryptor.iv(), &[0, 0, 0, 0, 0, 0, 0x01, 0x00]);
        assert_eq!(encryptor.block_offset(), 0);
    }

    #[test]
    fn ctr_update_iv_128bit_adds_block_count() {
        let iv = [0u8; 16];
        let mut encryptor = AesCtrEncryptor::with_iv(&KEY, &iv).unwrap();
        let mut data = [0u8; 48]; // exactly 3 blocks
        encryptor.encrypt(&mut data);
        encryptor.update_iv();
        let mut expected = [0u8; 16];
        expected[15] = 3;
        assert_eq!(encryptor.iv(), &expected);
    }

    #[test]
    fn ctr_update_iv_128bit_carries_overflow_once() {
        let mut iv = [0u8; 16];
        iv[8..].fill(0xFF); // low 64 bits at maximum
        let mut encryptor = AesCtrEncryptor::with_iv(&KEY, &iv).unwrap();
        let mut data = [0u8; 16]; // one block: low half wraps to zero
        encryptor.encrypt(&mut data);
        encryptor.update_iv();
        let mut expected = [0u8; 16];
        expected[7] = 1; // carry into the high 64 bits
        assert_eq!(encryptor.iv(), &expected);

        // A second update without overflow must not carry again.
        let mut data = [0u8; 16];
        encryptor.encrypt(&mut data);
        encryptor.update_iv();
        let mut expected2 = [0u8; 16];
        expected2[7] = 1;
        expected2[15] = 1;
        assert_eq!(encryptor.iv(), &expected2);
    }

    #[test]
    fn ctr_update_iv_zero_length_sample() {
        let iv = [0u8; 16];
        let mut encryptor = AesCtrEncryptor::with_iv(&KEY, &iv).unwrap();
        encryptor.encrypt(&mut []);
        encryptor.update_iv();
        assert_eq!(encryptor.iv(), &[0u8; 16]);
    }

    #[test]
    fn cbc_nist_vector_first_block() {
        // SP 800-38A F.2.1 CBC-AES128.Encrypt, first block.
        let iv: Vec<u8> = (0u8..16).collect();
        let plaintext = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a,
        ];
        let mut encryptor = AesCbcEncryptor::with_iv(&KEY, &iv).unwrap();
        let ciphertext = encryptor.encrypt(&plaintext);
        // Full-block input gains one whole padding block.
        assert_eq!(ciphertext.len(), 32);
        assert_eq!(
            &ciphertext[..16],
            &[
                0x76, 0x49, 0xab, 0xac, 0x81, 0x19, 0xb2, 0x46, 0xce, 0xe9, 0x8e, 0x9b, 0x12,
                0xe9, 0x19, 0x7d,
            ]
        );
    }

    #[test]
    fn cbc_roundtrip_all_lengths() {
        let iv = [9u8; 16];
        for len in 0..49 {
            let plaintext: Vec<u8> = (0..len as u8).collect();
            let ciphertext = AesCbcEncryptor::with_iv(&KEY, &iv).unwrap().encrypt(&plaintext);
            assert_eq!(ciphertext.len() % 16, 0);
            let decrypted = AesCbcDecryptor::with_iv(&KEY, &iv)
                .unwrap()
                .decrypt(&ciphertext)
                .unwrap();
            assert_eq!(decrypted, plaintext, "length {len}");
        }
    }

    #[test]
    fn cbc_roundtrip_192_and_256_keys() {
        let iv = [3u8; 16];
        let plaintext = b"dashpack cbc roundtrip";
        for key_len in [24usize, 32] {
            let key: Vec<u8> = (0..key_len as u8).collect();
            let ciphertext = AesCbcEncryptor::with_iv(&key, &iv).unwrap().encrypt(plaintext);
            let decrypted = AesCbcDecryptor::with_iv(&key, &iv)
                .unwrap()
                .decrypt(&ciphertext)
                .unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn cbc_rejects_invalid_input() {
        let iv = [0u8; 16];
        let mut decryptor = AesCbcDecryptor::with_iv(&KEY, &iv).unwrap();
        // Not a multiple of the block size.
        assert!(decryptor.decrypt(&[0u8; 15]).is_err());

        // Truncating a two-block ciphertext leaves the first plaintext block
        // as the final one; its last byte (0x2a = 42 > 16) is not valid
        // padding.
        let plaintext = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a,
        ];
        let ciphertext = AesCbcEncryptor::with_iv(&KEY, &iv).unwrap().encrypt(&plaintext);
        let mut decryptor = AesCbcDecryptor::with_iv(&KEY, &iv).unwrap();
        assert!(decryptor.decrypt(&ciphertext[..16]).is_err());

        // Bad key/IV sizes.
        assert!(AesCbcEncryptor::with_iv(&KEY[..10], &iv).is_err());
        assert!(AesCbcEncryptor::with_iv(&KEY, &iv[..8]).is_err());
    }
}
