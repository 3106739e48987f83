//! Cache key and fingerprint derivation.
//!
//! Keys have the form `<prefix>:<model>:<digest>` where `digest` is the
//! first 16 hex chars of SHA-256 over the JSON array
//! `[text, model, canonical_options]`. The JSON framing keeps
//! `("a:b", "c")` and `("a", "b:c")` apart.
//!
//! Fingerprints use BLAKE3 so a key-digest collision cannot also forge a
//! matching fingerprint.

use serde_json::Value;
use sha2::{Digest, Sha256};

use recall_types::EmbeddingOptions;

/// Hex chars of the SHA-256 digest kept in the key.
const KEY_DIGEST_LEN: usize = 16;

/// Derives cache keys and fingerprints. Pure; no I/O.
#[derive(Debug, Clone)]
pub struct CacheKeyCodec {
    prefix: String,
}

impl Default for CacheKeyCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl CacheKeyCodec {
    pub const DEFAULT_PREFIX: &'static str = "emb";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix every key of this codec starts with (`"emb:"`).
    pub fn scan_prefix(&self) -> String {
        format!("{}:", self.prefix)
    }

    /// Cache key for an embedding request.
    pub fn key(&self, text: &str, model: &str, options: &EmbeddingOptions) -> String {
        let framed = Value::Array(vec![
            Value::from(text),
            Value::from(model),
            Value::from(options.canonical_json()),
        ])
        .to_string();

        let digest = format!("{:x}", Sha256::digest(framed.as_bytes()));
        format!("{}:{}:{}", self.prefix, model, &digest[..KEY_DIGEST_LEN])
    }

    /// BLAKE3 hex fingerprint of the exact input text.
    pub fn fingerprint(text: &str) -> String {
        blake3::hash(text.as_bytes()).to_hex().to_string()
    }

    /// BLAKE3 hex fingerprint of the canonical options.
    pub fn options_fingerprint(options: &EmbeddingOptions) -> String {
        blake3::hash(options.canonical_json().as_bytes())
            .to_hex()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_deterministic() {
        let codec = CacheKeyCodec::default();
        let options = EmbeddingOptions::new().with_num_ctx(2048);
        assert_eq!(
            codec.key("hello", "nomic-embed-text", &options),
            codec.key("hello", "nomic-embed-text", &options)
        );
    }

    /// Keys written by one process must be found by the next, so the exact
    /// bytes are pinned here.
    #[test]
    fn test_key_is_stable_across_releases() {
        let codec = CacheKeyCodec::default();
        assert_eq!(
            codec.key("hello", "nomic-embed-text", &EmbeddingOptions::default()),
            "emb:nomic-embed-text:a5a6560a7fd6e967"
        );
        assert_eq!(
            codec.key(
                "hello",
                "nomic-embed-text",
                &EmbeddingOptions::new().with_num_ctx(2048)
            ),
            "emb:nomic-embed-text:9d975c07ce268f0e"
        );
    }

    #[test]
    fn test_key_format() {
        let key = CacheKeyCodec::default().key("hello", "all-minilm", &EmbeddingOptions::default());
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "emb");
        assert_eq!(parts[1], "all-minilm");
        assert_eq!(parts[2].len(), 16);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_varies_with_each_input() {
        let codec = CacheKeyCodec::default();
        let base = codec.key("hello", "all-minilm", &EmbeddingOptions::default());

        assert_ne!(base, codec.key("hello!", "all-minilm", &EmbeddingOptions::default()));
        assert_ne!(base, codec.key("hello", "bge-m3", &EmbeddingOptions::default()));
        assert_ne!(
            base,
            codec.key("hello", "all-minilm", &EmbeddingOptions::new().with_dimensions(128))
        );
    }

    #[test]
    fn test_framing_is_unambiguous() {
        let codec = CacheKeyCodec::default();
        let options = EmbeddingOptions::default();
        assert_ne!(codec.key("a:b", "c", &options), codec.key("a", "b:c", &options));
    }

    #[test]
    fn test_option_order_does_not_matter() {
        let codec = CacheKeyCodec::default();
        let first = EmbeddingOptions::new()
            .with_extra("seed", json!(1))
            .with_extra("temperature", json!({"b": 2, "a": 1}));
        let second = EmbeddingOptions::new()
            .with_extra("temperature", json!({"a": 1, "b": 2}))
            .with_extra("seed", json!(1));
        assert_eq!(
            codec.key("x", "all-minilm", &first),
            codec.key("x", "all-minilm", &second)
        );
    }

    #[test]
    fn test_custom_prefix() {
        let codec = CacheKeyCodec::new("test");
        assert!(codec
            .key("x", "all-minilm", &EmbeddingOptions::default())
            .starts_with("test:all-minilm:"));
        assert_eq!(codec.scan_prefix(), "test:");
    }

    #[test]
    fn test_fingerprints() {
        let fp = CacheKeyCodec::fingerprint("hello");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, CacheKeyCodec::fingerprint("hello"));
        assert_ne!(fp, CacheKeyCodec::fingerprint("hello "));

        assert_eq!(
            CacheKeyCodec::options_fingerprint(&EmbeddingOptions::default()),
            CacheKeyCodec::options_fingerprint(&EmbeddingOptions::new())
        );
    }
}
