//! Cache entry and its on-store envelope.
//!
//! Layout: `[format_version][flags][payload]`. The payload is the JSON
//! encoding of [`CacheEntry`], zstd-compressed when [`FLAG_COMPRESSED`] is
//! set. Readers never guess: an unknown version or flag bit is corrupt.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Current envelope version.
pub const FORMAT_VERSION: u8 = 1;

/// Flag bit: payload is zstd-compressed.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

const KNOWN_FLAGS: u8 = FLAG_COMPRESSED;
const HEADER_LEN: usize = 2;

/// A cached embedding with the metadata needed to validate it on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub embedding: Vec<f32>,
    pub model: String,
    pub text_fingerprint: String,
    pub options_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    /// True once `created_at + ttl_seconds` has passed. A zero TTL never
    /// expires on this check.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.ttl_seconds == 0 {
            return false;
        }
        let ttl = ChronoDuration::seconds(self.ttl_seconds.min(i64::MAX as u64) as i64);
        self.created_at + ttl < now
    }
}

/// Encodes and decodes entry envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    compression_threshold: usize,
    compression_level: i32,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(1024, 3)
    }
}

impl EnvelopeCodec {
    pub fn new(compression_threshold: usize, compression_level: i32) -> Self {
        Self {
            compression_threshold,
            compression_level,
        }
    }

    /// Serialize an entry, compressing payloads above the threshold.
    pub fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        let payload = serde_json::to_vec(entry).map_err(|e| CacheError::Encode(e.to_string()))?;

        let (flags, body) = if payload.len() > self.compression_threshold {
            let compressed = zstd::encode_all(payload.as_slice(), self.compression_level)
                .map_err(|e| CacheError::Encode(format!("compression failed: {}", e)))?;
            (FLAG_COMPRESSED, compressed)
        } else {
            (0, payload)
        };

        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.push(FORMAT_VERSION);
        bytes.push(flags);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parse envelope bytes back into an entry.
    pub fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::Decode("envelope too short".to_string()));
        }
        let (version, flags, body) = (bytes[0], bytes[1], &bytes[HEADER_LEN..]);

        if version != FORMAT_VERSION {
            return Err(CacheError::Decode(format!(
                "unsupported format version {}",
                version
            )));
        }
        if flags & !KNOWN_FLAGS != 0 {
            return Err(CacheError::Decode(format!("unknown flags {:#04x}", flags)));
        }

        let payload = if flags & FLAG_COMPRESSED != 0 {
            zstd::decode_all(body)
                .map_err(|e| CacheError::Decode(format!("decompression failed: {}", e)))?
        } else {
            body.to_vec()
        };

        serde_json::from_slice(&payload).map_err(|e| CacheError::Decode(e.to_string()))
    }

    /// Whether encoded bytes carry the compressed flag.
    pub fn is_compressed(bytes: &[u8]) -> bool {
        bytes.len() >= HEADER_LEN && bytes[1] & FLAG_COMPRESSED != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dim: usize) -> CacheEntry {
        CacheEntry {
            embedding: (0..dim).map(|i| i as f32 * 0.5).collect(),
            model: "nomic-embed-text".to_string(),
            text_fingerprint: "abc".to_string(),
            options_fingerprint: "def".to_string(),
            created_at: Utc::now(),
            ttl_seconds: 60,
        }
    }

    #[test]
    fn test_small_entry_stays_uncompressed() {
        let codec = EnvelopeCodec::default();
        let original = entry(4);
        let bytes = codec.encode(&original).unwrap();

        assert_eq!(bytes[0], FORMAT_VERSION);
        assert!(!EnvelopeCodec::is_compressed(&bytes));
        assert_eq!(codec.decode(&bytes).unwrap(), original);
    }

    #[test]
    fn test_large_entry_is_compressed_and_round_trips() {
        let codec = EnvelopeCodec::default();
        let original = entry(768);
        let bytes = codec.encode(&original).unwrap();

        assert!(EnvelopeCodec::is_compressed(&bytes));
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.embedding, original.embedding);
        assert_eq!(decoded.model, original.model);
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let codec = EnvelopeCodec::default();
        let mut bytes = codec.encode(&entry(4)).unwrap();
        bytes[0] = 9;
        assert!(matches!(codec.decode(&bytes), Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_unknown_flag_is_corrupt() {
        let codec = EnvelopeCodec::default();
        let mut bytes = codec.encode(&entry(4)).unwrap();
        bytes[1] = 0b10;
        assert!(matches!(codec.decode(&bytes), Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let codec = EnvelopeCodec::default();
        assert!(codec.decode(&[]).is_err());
        assert!(codec.decode(&[FORMAT_VERSION, 0, b'{']).is_err());
        assert!(codec.decode(&[FORMAT_VERSION, FLAG_COMPRESSED, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_expiry() {
        let mut e = entry(1);
        let now = Utc::now();
        e.created_at = now - ChronoDuration::seconds(120);
        assert!(e.is_expired(now));

        e.created_at = now - ChronoDuration::seconds(30);
        assert!(!e.is_expired(now));

        e.ttl_seconds = 0;
        e.created_at = now - ChronoDuration::days(365);
        assert!(!e.is_expired(now));
    }
}
