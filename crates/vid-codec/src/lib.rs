//! Reversible obfuscation between public video ids and opaque ids.
//!
//! A public id is 11 characters of the URL-safe base64 alphabet; an opaque
//! id is 12. The transform XORs the public id's bits, right-aligned in a
//! 72-bit field, with a subkey derived from the shared [`SecretKey`].
//!
//! The 11th character of a public id only carries 4 significant bits (the
//! base64 decoder drops the last 2). Ids whose last character has those
//! bits clear are *canonical* and round-trip exactly; any other id is
//! accepted by [`IdCodec::encode`] and comes back from [`IdCodec::decode`]
//! in its canonical form.

mod error;
mod key;

pub use error::CodecError;
pub use key::{SECRET_KEY_LEN, SecretKey};

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use sha2::{Digest, Sha256};

/// Length of a public video id.
pub const PUBLIC_ID_LEN: usize = 11;

/// Length of an opaque id.
pub const OPAQUE_ID_LEN: usize = 12;

/// Width of the obfuscated field: 72 bits.
const FIELD_LEN: usize = 9;

/// Bits of the leading field byte that survive the 66-bit mask on decode.
const LEADING_BYTE_MASK: u8 = 0b0000_0011;

const SUBKEY_SALT: &[u8] = b"yt-11-to-12-salt-v1";

/// URL-safe alphabet without padding; the unused trailing bits of an
/// 11-character id are ignored instead of rejected.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Codec bound to one secret key.
///
/// The subkey is derived once at construction, so encoding and decoding
/// are pure functions of the input afterwards.
#[derive(Clone)]
pub struct IdCodec {
    subkey: [u8; FIELD_LEN],
}

impl IdCodec {
    pub fn new(key: &SecretKey) -> Self {
        let digest = Sha256::new()
            .chain_update(key.as_bytes())
            .chain_update(SUBKEY_SALT)
            .finalize();

        let mut subkey = [0u8; FIELD_LEN];
        subkey.copy_from_slice(&digest[..FIELD_LEN]);
        Self { subkey }
    }

    /// Turn an 11-character public id into its 12-character opaque form.
    pub fn encode(&self, public_id: &str) -> Result<String, CodecError> {
        validate(public_id, PUBLIC_ID_LEN)?;

        let decoded = URL_SAFE_LENIENT
            .decode(public_id)
            .map_err(|e| CodecError::malformed(e.to_string()))?;
        if decoded.len() > FIELD_LEN {
            return Err(CodecError::malformed(format!(
                "decoded {} bytes, field holds {FIELD_LEN}",
                decoded.len()
            )));
        }

        let mut field = [0u8; FIELD_LEN];
        field[FIELD_LEN - decoded.len()..].copy_from_slice(&decoded);
        self.apply_subkey(&mut field);

        Ok(URL_SAFE_LENIENT.encode(field))
    }

    /// Recover the 11-character public id from a 12-character opaque id.
    pub fn decode(&self, opaque_id: &str) -> Result<String, CodecError> {
        validate(opaque_id, OPAQUE_ID_LEN)?;

        let decoded = URL_SAFE_LENIENT
            .decode(opaque_id)
            .map_err(|e| CodecError::malformed(e.to_string()))?;
        let mut field: [u8; FIELD_LEN] = decoded.as_slice().try_into().map_err(|_| {
            CodecError::malformed(format!(
                "decoded {} bytes, expected {FIELD_LEN}",
                decoded.len()
            ))
        })?;

        self.apply_subkey(&mut field);
        field[0] &= LEADING_BYTE_MASK;

        let mut public_id = if field[0] == 0 {
            // 64 significant bits: exactly 11 characters.
            URL_SAFE_LENIENT.encode(&field[1..])
        } else {
            // Bits 64-65 set: not produced by `encode`; keep the top 66 bits.
            URL_SAFE_LENIENT.encode(field)
        };
        public_id.truncate(PUBLIC_ID_LEN);
        Ok(public_id)
    }

    fn apply_subkey(&self, field: &mut [u8; FIELD_LEN]) {
        for (byte, key) in field.iter_mut().zip(self.subkey) {
            *byte ^= key;
        }
    }
}

impl std::fmt::Debug for IdCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdCodec").finish_non_exhaustive()
    }
}

/// Encode `public_id` under `key`.
pub fn encode(public_id: &str, key: &SecretKey) -> Result<String, CodecError> {
    IdCodec::new(key).encode(public_id)
}

/// Decode `opaque_id` under `key`.
pub fn decode(opaque_id: &str, key: &SecretKey) -> Result<String, CodecError> {
    IdCodec::new(key).decode(opaque_id)
}

/// Whether `public_id` survives an encode/decode round trip unchanged.
pub fn is_canonical(public_id: &str) -> bool {
    validate(public_id, PUBLIC_ID_LEN).is_ok()
        && public_id
            .bytes()
            .last()
            .and_then(sextet)
            .is_some_and(|value| value & 0b11 == 0)
}

fn validate(id: &str, expected: usize) -> Result<(), CodecError> {
    if id.len() != expected {
        return Err(CodecError::length(expected, id.len()));
    }

    match id.chars().enumerate().find(|(_, c)| !is_url_safe(*c)) {
        Some((position, character)) => Err(CodecError::Alphabet {
            character,
            position,
        }),
        None => Ok(()),
    }
}

fn is_url_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn sextet(byte: u8) -> Option<u8> {
    match byte {
        b'A'..=b'Z' => Some(byte - b'A'),
        b'a'..=b'z' => Some(byte - b'a' + 26),
        b'0'..=b'9' => Some(byte - b'0' + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}
