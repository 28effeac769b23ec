use base64::{
  Engine,
  alphabet,
  engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use tracing::warn;

use crate::common::errors::ResolveError;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const CRYPTO_KEY: &[u8; 16] = b"gy1t#b@jl(b$wtme";
const CRYPTO_IV: &[u8; 16] = b"xC4dmVJAq14BfntX";
pub const HLS_BASE_URL: &str = "https://vodhlsgaana-ebw.akamaized.net/";

/// Lenient decoder: padding optional, trailing bits ignored.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
  &alphabet::STANDARD,
  GeneralPurposeConfig::new()
    .with_decode_allow_trailing_bits(true)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Turns the `stream_path` returned by the stream-url API into an HLS URL.
///
/// The first character is a digit `n`; the ciphertext starts `n + 16`
/// characters in. Characters outside the base64 alphabet are ignored.
pub fn decrypt_stream_path(encrypted_data: &str) -> Result<String, ResolveError> {
  let offset = encrypted_data
    .chars()
    .next()
    .and_then(|c| c.to_digit(10))
    .ok_or_else(|| ResolveError::StreamPath("missing offset digit".to_string()))?
    as usize;

  let skip = offset + 16;
  let ciphertext_b64: String = encrypted_data
    .get(skip..)
    .ok_or_else(|| {
      ResolveError::StreamPath(format!(
        "encrypted data too short (len={}, skip={})",
        encrypted_data.len(),
        skip
      ))
    })?
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
    .collect();

  let mut buf = LENIENT_BASE64
    .decode(&ciphertext_b64)
    .map_err(|e| ResolveError::StreamPath(format!("base64 decode failed: {}", e)))?;

  if buf.is_empty() || buf.len() % 16 != 0 {
    return Err(ResolveError::StreamPath(format!(
      "invalid ciphertext length: {}",
      buf.len()
    )));
  }

  let decrypted = Aes128CbcDec::new(CRYPTO_KEY.into(), CRYPTO_IV.into())
    .decrypt_padded_mut::<NoPadding>(&mut buf)
    .map_err(|e| ResolveError::StreamPath(format!("AES decryption failed: {}", e)))?;

  let raw_text: String = decrypted
    .iter()
    .filter(|b| (32..=126).contains(*b))
    .map(|&b| b as char)
    .collect();

  match raw_text.find("hls/") {
    Some(idx) => Ok(format!("{}{}", HLS_BASE_URL, raw_text[idx..].trim_end())),
    None => {
      warn!("Gaana: no hls/ path found in decrypted stream path");
      Err(ResolveError::StreamPath("no hls/ path in decrypted text".to_string()))
    }
  }
}
