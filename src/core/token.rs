//! Shared-secret token.
//!
//! A miIO token is 16 raw bytes shared between client and device. It keys the
//! payload cipher and doubles as the checksum key of every non-hello frame.
//!
//! ## Key derivation
//! ```text
//! key = MD5(token)
//! iv  = MD5(key || token)
//! ```
//! Payloads are AES-128-CBC with PKCS#7 padding under that key and IV.

use crate::error::{constants, MiioError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Length of a well-formed token in bytes
pub const TOKEN_LEN: usize = 16;

const AES_BLOCK: usize = 16;

/// Raw token bytes. Equality and hashing are by content.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token {
    bytes: Vec<u8>,
}

impl Token {
    /// Create a token from raw bytes. Any length is accepted.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Parse a hex string (either case).
    pub fn from_hex(text: &str) -> Result<Self> {
        hex::decode(text.trim())
            .map(Self::new)
            .map_err(|e| MiioError::InvalidParameters(format!("{}: {e}", constants::ERR_INVALID_HEX)))
    }

    /// Parse a hex string, falling back to `len` zero bytes if it does not parse.
    pub fn from_hex_or_zeroed(text: &str, len: usize) -> Self {
        Self::from_hex(text).unwrap_or_else(|_| Self::new(vec![0u8; len]))
    }

    /// The all-`0xFF` token carried by hello requests.
    pub fn unknown() -> Self {
        Self::new(vec![0xFF; TOKEN_LEN])
    }

    /// A fresh random token, e.g. for provisioning a simulated device.
    pub fn random() -> Self {
        Self::new(rand::random::<[u8; TOKEN_LEN]>().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the token has the length required for encryption.
    pub fn is_valid_length(&self) -> bool {
        self.bytes.len() == TOKEN_LEN
    }

    /// All-`0xFF` and all-zero tokens both mean "token not known yet".
    pub fn is_sentinel(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0xFF) || self.bytes.iter().all(|&b| b == 0x00)
    }

    /// The token as it is laid into the 16-byte header field.
    ///
    /// Short tokens are zero-padded, long ones truncated.
    pub fn header_field(&self) -> [u8; TOKEN_LEN] {
        let mut field = [0u8; TOKEN_LEN];
        let n = self.bytes.len().min(TOKEN_LEN);
        field[..n].copy_from_slice(&self.bytes[..n]);
        field
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    fn key_iv(&self) -> ([u8; 16], [u8; 16]) {
        let key = md5::compute(&self.bytes).0;
        let mut ctx = md5::Context::new();
        ctx.consume(key);
        ctx.consume(&self.bytes);
        let iv = ctx.compute().0;
        (key, iv)
    }

    /// AES-128-CBC encrypt with PKCS#7 padding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let (key, iv) = self.key_iv();
        Aes128CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// AES-128-CBC decrypt and strip PKCS#7 padding.
    ///
    /// Bad lengths and bad padding surface as [`MiioError::Crypto`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK != 0 {
            return Err(MiioError::Crypto(format!(
                "{}: ciphertext length {} is not a positive multiple of {AES_BLOCK}",
                constants::ERR_DECRYPTION_FAILED,
                ciphertext.len()
            )));
        }
        let (key, iv) = self.key_iv();
        Aes128CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| MiioError::Crypto(constants::ERR_DECRYPTION_FAILED.into()))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// Never print the secret in debug output.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl FromStr for Token {
    type Err = MiioError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl From<[u8; TOKEN_LEN]> for Token {
    fn from(bytes: [u8; TOKEN_LEN]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Token::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Token {
        Token::from_hex("000102030405060708090A0B0C0D0E0F").unwrap()
    }

    #[test]
    fn test_hex_is_lowercase() {
        assert_eq!(sample().to_string(), "000102030405060708090a0b0c0d0e0f");
        assert!(sample().is_valid_length());
    }

    #[test]
    fn test_zero_fill_fallback() {
        let token = Token::from_hex_or_zeroed("not hex", 16);
        assert_eq!(token.as_bytes(), &[0u8; 16]);
        assert!(token.is_sentinel());

        let short = Token::from_hex_or_zeroed("zz", 4);
        assert_eq!(short.as_bytes().len(), 4);
        assert!(!short.is_valid_length());
    }

    #[test]
    fn test_key_derivation_matches_md5_chain() {
        let token = sample();
        let (key, iv) = token.key_iv();
        let expected_key = md5::compute(token.as_bytes()).0;
        assert_eq!(key, expected_key);

        let mut chained = expected_key.to_vec();
        chained.extend_from_slice(token.as_bytes());
        let expected_iv = md5::compute(&chained).0;
        assert_eq!(iv, expected_iv);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let token = sample();
        let ciphertext = token.encrypt(b"{\"id\":1}\0");
        assert_eq!(ciphertext.len() % 16, 0);
        assert_eq!(token.decrypt(&ciphertext).unwrap(), b"{\"id\":1}\0");
    }

    #[test]
    fn test_decrypt_rejects_bad_length() {
        let token = sample();
        assert!(matches!(token.decrypt(&[1, 2, 3]), Err(MiioError::Crypto(_))));
        assert!(matches!(token.decrypt(&[]), Err(MiioError::Crypto(_))));
    }

    #[test]
    fn test_decrypt_with_wrong_token_does_not_panic() {
        let ciphertext = sample().encrypt(b"hello world");
        let other = Token::new(vec![0x42; 16]);
        // Either garbage or a padding error, never a panic
        let _ = other.decrypt(&ciphertext);
    }

    #[test]
    fn test_sentinels() {
        assert!(Token::unknown().is_sentinel());
        assert!(Token::new(vec![0u8; 16]).is_sentinel());
        assert!(!sample().is_sentinel());
    }

    #[test]
    fn test_random_tokens_are_usable() {
        let a = Token::random();
        let b = Token::random();
        assert!(a.is_valid_length());
        assert_ne!(a, b);
        assert_eq!(a.decrypt(&a.encrypt(b"{}")).unwrap(), b"{}");
    }

    #[test]
    fn test_header_field_pads_short_tokens() {
        let token = Token::new(vec![1, 2, 3]);
        let field = token.header_field();
        assert_eq!(&field[..3], &[1, 2, 3]);
        assert_eq!(&field[3..], &[0u8; 13]);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, "\"000102030405060708090a0b0c0d0e0f\"");
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }
}
