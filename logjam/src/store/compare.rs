use crate::errors::{ErrorKind, LogjamError, LogjamResult};
use std::fmt::{Display, Formatter};

const NUMERIC: u8 = 0x00;
const OPAQUE: u8 = 0x01;

/// Key ordering of a byte-store.
///
/// Byte-stores compare keys lexicographically. For the numeric modes the
/// keys are rewritten into an order-preserving form before they reach the
/// backend: a key of exactly the mode's width is stored as `0x00` followed by
/// its big-endian value with the sign bit flipped, anything else as `0x01`
/// followed by the raw bytes. Numeric keys therefore sort by value and
/// before every key of another width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareMode {
    #[default]
    Lex,
    Int32,
    Int64,
}

impl CompareMode {
    /// Reads the `compare` setting of a configuration entry: `lex`, `int32`,
    /// and anything else is `int64`.
    pub fn from_config(value: &str) -> CompareMode {
        match value {
            "lex" => CompareMode::Lex,
            "int32" => CompareMode::Int32,
            _ => CompareMode::Int64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompareMode::Lex => "lex",
            CompareMode::Int32 => "int32",
            CompareMode::Int64 => "int64",
        }
    }

    pub(crate) fn encode_key(&self, key: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(key.len() + 1);
        match (self, key.len()) {
            (CompareMode::Lex, _) => encoded.extend_from_slice(key),
            (CompareMode::Int32, 4) => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(key);
                let flipped = (i32::from_ne_bytes(raw) as u32) ^ 0x8000_0000;
                encoded.push(NUMERIC);
                encoded.extend_from_slice(&flipped.to_be_bytes());
            }
            (CompareMode::Int64, 8) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(key);
                let flipped = (i64::from_ne_bytes(raw) as u64) ^ 0x8000_0000_0000_0000;
                encoded.push(NUMERIC);
                encoded.extend_from_slice(&flipped.to_be_bytes());
            }
            _ => {
                encoded.push(OPAQUE);
                encoded.extend_from_slice(key);
            }
        }
        encoded
    }

    pub(crate) fn decode_key(&self, encoded: &[u8]) -> LogjamResult<Vec<u8>> {
        if *self == CompareMode::Lex {
            return Ok(encoded.to_vec());
        }

        match (encoded.first(), self) {
            (Some(&OPAQUE), _) => Ok(encoded[1..].to_vec()),
            (Some(&NUMERIC), CompareMode::Int32) if encoded.len() == 5 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&encoded[1..]);
                let value = (u32::from_be_bytes(raw) ^ 0x8000_0000) as i32;
                Ok(value.to_ne_bytes().to_vec())
            }
            (Some(&NUMERIC), CompareMode::Int64) if encoded.len() == 9 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&encoded[1..]);
                let value = (u64::from_be_bytes(raw) ^ 0x8000_0000_0000_0000) as i64;
                Ok(value.to_ne_bytes().to_vec())
            }
            _ => {
                log::error!("Malformed {} key of {} bytes", self, encoded.len());
                Err(LogjamError::new(
                    &format!("Malformed {} key of {} bytes", self, encoded.len()),
                    ErrorKind::BackendError,
                ))
            }
        }
    }
}

impl Display for CompareMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
