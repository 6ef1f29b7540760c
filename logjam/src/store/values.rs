use crate::errors::{ErrorKind, LogjamError, LogjamResult};

/// Packs the values of one key into a single blob: each value is written as
/// a little-endian `u32` length followed by its bytes.
///
/// Engines that store one blob per key use this to keep duplicate values.
pub fn encode_values(values: &[Vec<u8>]) -> Vec<u8> {
    let total = values.iter().map(|v| 4 + v.len()).sum();
    let mut blob = Vec::with_capacity(total);
    for value in values {
        blob.extend_from_slice(&(value.len() as u32).to_le_bytes());
        blob.extend_from_slice(value);
    }
    blob
}

/// Reverses [encode_values].
pub fn decode_values(blob: &[u8]) -> LogjamResult<Vec<Vec<u8>>> {
    let mut values = Vec::new();
    let mut position = 0;
    while position < blob.len() {
        if blob.len() - position < 4 {
            return Err(corrupt(blob.len(), position));
        }
        let mut length = [0u8; 4];
        length.copy_from_slice(&blob[position..position + 4]);
        let length = u32::from_le_bytes(length) as usize;
        position += 4;

        if blob.len() - position < length {
            return Err(corrupt(blob.len(), position));
        }
        values.push(blob[position..position + length].to_vec());
        position += length;
    }
    Ok(values)
}

/// Native-order bytes of a record key, as stored in every store and index.
#[inline]
pub fn encode_record_key(key: u64) -> [u8; 8] {
    key.to_ne_bytes()
}

/// Reads a record key written by [encode_record_key].
pub fn decode_record_key(bytes: &[u8]) -> LogjamResult<u64> {
    if bytes.len() != 8 {
        log::error!("Record key must be 8 bytes, found {}", bytes.len());
        return Err(LogjamError::new(
            &format!("Record key must be 8 bytes, found {}", bytes.len()),
            ErrorKind::BackendError,
        ));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_ne_bytes(raw))
}

fn corrupt(size: usize, position: usize) -> LogjamError {
    log::error!("Corrupt value blob of {} bytes at offset {}", size, position);
    LogjamError::new(
        &format!("Corrupt value blob of {} bytes at offset {}", size, position),
        ErrorKind::BackendError,
    )
}
