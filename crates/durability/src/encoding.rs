//! WAL record framing with CRC32 checksums
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: size of type + payload + crc (NOT including length itself)
//! - **type**: record type tag (1 = WriteBatch)
//! - **payload**: serialized `WriteBatch` bytes
//! - **crc32**: CRC32 over \[type\]\[payload\]

use crc32fast::Hasher;

/// Record carrying one serialized write batch
pub const RECORD_TYPE_WRITE_BATCH: u8 = 1;

/// Bytes of framing around a payload: length(4) + type(1) + crc(4)
pub const RECORD_OVERHEAD: usize = 9;

/// Minimum value of the length field: type(1) + crc(4)
const MIN_RECORD_LEN: usize = 5;

/// Errors decoding a framed record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Buffer ends inside the record (torn write)
    #[error("offset {offset}: incomplete record, have {have} bytes, need {needed}")]
    Incomplete {
        /// File offset of the record
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },

    /// Length field below the minimum record size
    #[error("offset {offset}: invalid record length {len}")]
    InvalidLength {
        /// File offset of the record
        offset: u64,
        /// Declared length
        len: usize,
    },

    /// Stored checksum does not match the record contents
    #[error("offset {offset}: CRC mismatch: expected {expected:08x}, got {computed:08x}")]
    ChecksumMismatch {
        /// File offset of the record
        offset: u64,
        /// CRC stored in the record
        expected: u32,
        /// CRC computed over the record
        computed: u32,
    },
}

/// A decoded record borrowed from the input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedRecord<'a> {
    /// Record type tag
    pub record_type: u8,
    /// Payload bytes
    pub payload: &'a [u8],
    /// Bytes consumed from the buffer, framing included
    pub consumed: usize,
}

fn checksum(record_type: u8, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[record_type]);
    hasher.update(payload);
    hasher.finalize()
}

/// Frame `payload` as a record ready for appending
pub fn encode_record(record_type: u8, payload: &[u8]) -> Vec<u8> {
    let total_len = 1 + payload.len() + 4;
    let mut buf = Vec::with_capacity(4 + total_len);
    buf.extend_from_slice(&(total_len as u32).to_le_bytes());
    buf.push(record_type);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&checksum(record_type, payload).to_le_bytes());
    buf
}

/// Decode the record at the start of `buf`
///
/// `offset` is the file position of `buf[0]` and only used for errors.
pub fn decode_record(buf: &[u8], offset: u64) -> Result<DecodedRecord<'_>, DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::Incomplete {
            offset,
            have: buf.len(),
            needed: 4,
        });
    }
    let total_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if total_len < MIN_RECORD_LEN {
        return Err(DecodeError::InvalidLength {
            offset,
            len: total_len,
        });
    }
    if buf.len() < 4 + total_len {
        return Err(DecodeError::Incomplete {
            offset,
            have: buf.len(),
            needed: 4 + total_len,
        });
    }

    let record_type = buf[4];
    let payload = &buf[5..4 + total_len - 4];
    let crc_start = 4 + total_len - 4;
    let expected = u32::from_le_bytes([
        buf[crc_start],
        buf[crc_start + 1],
        buf[crc_start + 2],
        buf[crc_start + 3],
    ]);
    let computed = checksum(record_type, payload);
    if expected != computed {
        return Err(DecodeError::ChecksumMismatch {
            offset,
            expected,
            computed,
        });
    }

    Ok(DecodedRecord {
        record_type,
        payload,
        consumed: 4 + total_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_format() {
        let encoded = encode_record(RECORD_TYPE_WRITE_BATCH, b"abc");
        assert_eq!(encoded.len(), RECORD_OVERHEAD + 3);
        assert_eq!(u32::from_le_bytes(encoded[0..4].try_into().unwrap()), 8);
        assert_eq!(encoded[4], RECORD_TYPE_WRITE_BATCH);
        assert_eq!(&encoded[5..8], b"abc");
    }

    #[test]
    fn test_decode_consumes_exactly_one_record() {
        let mut buf = encode_record(RECORD_TYPE_WRITE_BATCH, b"first");
        buf.extend_from_slice(&encode_record(RECORD_TYPE_WRITE_BATCH, b"second"));

        let first = decode_record(&buf, 0).unwrap();
        assert_eq!(first.payload, b"first");
        let second = decode_record(&buf[first.consumed..], first.consumed as u64).unwrap();
        assert_eq!(second.payload, b"second");
        assert_eq!(first.consumed + second.consumed, buf.len());
    }

    #[test]
    fn test_crc_detects_corruption() {
        let mut encoded = encode_record(RECORD_TYPE_WRITE_BATCH, b"payload");
        encoded[6] ^= 0xFF;
        assert!(matches!(
            decode_record(&encoded, 100),
            Err(DecodeError::ChecksumMismatch { offset: 100, .. })
        ));
    }

    #[test]
    fn test_truncated_record_is_incomplete() {
        let encoded = encode_record(RECORD_TYPE_WRITE_BATCH, b"payload");
        for cut in [0, 3, 4, encoded.len() - 1] {
            assert!(matches!(
                decode_record(&encoded[..cut], 0),
                Err(DecodeError::Incomplete { .. })
            ));
        }
    }

    #[test]
    fn test_length_below_minimum() {
        let buf = [2u8, 0, 0, 0, 1, 0, 0, 0, 0];
        assert_eq!(
            decode_record(&buf, 7),
            Err(DecodeError::InvalidLength { offset: 7, len: 2 })
        );
    }
}
