use byteorder::{BigEndian, ByteOrder};
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};

use crate::common::errors::HlsError;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const AES_BLOCK_SIZE: usize = 16;

/// IV used when `#EXT-X-KEY` carries none: the media sequence number as a
/// 128-bit big-endian integer (eight zero bytes, then the `u64`).
pub fn derive_iv(sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    BigEndian::write_u64(&mut iv[..8], 0);
    BigEndian::write_u64(&mut iv[8..], sequence);
    iv
}

/// AES-128-CBC without padding removal. `data` must be block aligned.
pub fn decrypt_aes128_cbc(mut data: Vec<u8>, key: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, HlsError> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(HlsError::Decryption(format!(
            "ciphertext length {} is not a multiple of {}",
            data.len(),
            AES_BLOCK_SIZE
        )));
    }

    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|_| HlsError::Decryption(format!("invalid key length {}", key.len())))?;

    let len = cipher
        .decrypt_padded_mut::<NoPadding>(&mut data)
        .map_err(|e| HlsError::Decryption(e.to_string()))?
        .len();
    data.truncate(len);
    Ok(data)
}

#[cfg(test)]
pub(crate) fn encrypt_aes128_cbc(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    use cbc::cipher::BlockEncryptMut;

    let mut buf = plain.to_vec();
    let len = buf.len();
    cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
        .expect("16-byte key and iv")
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .expect("block-aligned plaintext");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn derived_iv_is_zero_high_sequence_low() {
        let iv = derive_iv(0x0102_0304_0506_0708);
        assert_eq!(&iv[..8], &[0u8; 8]);
        assert_eq!(&iv[8..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(derive_iv(0), [0u8; 16]);
    }

    #[test]
    fn decrypt_inverts_encrypt_for_aligned_lengths() {
        let iv = derive_iv(7);
        for blocks in [1usize, 2, 5, 64] {
            let plain: Vec<u8> = (0..blocks * AES_BLOCK_SIZE).map(|i| (i * 31 % 251) as u8).collect();
            let cipher = encrypt_aes128_cbc(&plain, &KEY, &iv);
            assert_ne!(cipher, plain);
            assert_eq!(decrypt_aes128_cbc(cipher, &KEY, &iv).unwrap(), plain);
        }
        assert!(decrypt_aes128_cbc(Vec::new(), &KEY, &iv).unwrap().is_empty());
    }

    #[test]
    fn wrong_iv_garbles_only_first_block() {
        let plain = [0x55u8; 32];
        let cipher = encrypt_aes128_cbc(&plain, &KEY, &derive_iv(1));
        let out = decrypt_aes128_cbc(cipher, &KEY, &derive_iv(2)).unwrap();
        assert_ne!(&out[..16], &plain[..16]);
        assert_eq!(&out[16..], &plain[16..]);
    }

    #[test]
    fn misaligned_or_bad_key_is_a_decryption_failure() {
        let iv = derive_iv(0);
        assert!(matches!(
            decrypt_aes128_cbc(vec![0u8; 15], &KEY, &iv),
            Err(HlsError::Decryption(_))
        ));
        assert!(matches!(
            decrypt_aes128_cbc(vec![0u8; 16], b"short", &iv),
            Err(HlsError::Decryption(_))
        ));
    }
}
