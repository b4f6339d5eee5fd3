use std::fmt;

use crate::CodecError;

/// Required length of the shared secret, in bytes.
pub const SECRET_KEY_LEN: usize = 16;

/// Operator-provided secret shared with whoever issues opaque ids.
///
/// The length is checked once, when the key is constructed; every codec
/// operation afterwards can assume a well-formed key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    pub fn new(bytes: impl AsRef<[u8]>) -> Result<Self, CodecError> {
        let bytes = bytes.as_ref();
        let key: [u8; SECRET_KEY_LEN] =
            bytes.try_into().map_err(|_| CodecError::KeyLength {
                expected: SECRET_KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl TryFrom<&str> for SecretKey {
    type Error = CodecError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_sixteen_bytes() {
        let key = SecretKey::new("ABCDEFGHIJKLMNOP").unwrap();
        assert_eq!(key.as_bytes(), b"ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn rejects_other_lengths() {
        for len in [0usize, 15, 17, 32] {
            let err = SecretKey::new(vec![b'k'; len]).unwrap_err();
            assert_eq!(
                err,
                CodecError::KeyLength {
                    expected: SECRET_KEY_LEN,
                    actual: len
                }
            );
            assert!(!err.is_input_error());
        }
    }

    #[test]
    fn length_is_counted_in_bytes() {
        // 8 two-byte characters make 16 bytes.
        assert!(SecretKey::try_from("éééééééé").is_ok());
        assert!(SecretKey::try_from("ééééééééé").is_err());
    }

    #[test]
    fn debug_does_not_print_the_key() {
        let key = SecretKey::new("ABCDEFGHIJKLMNOP").unwrap();
        assert!(!format!("{key:?}").contains("ABCD"));
    }
}
