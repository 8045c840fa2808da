use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Longest idempotency key stored verbatim; longer keys are hashed.
const MAX_RAW_KEY_LEN: usize = 64;

pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// First 16 hex chars of the SHA-256 of `data`.
pub fn short_hash(data: &str) -> String {
    let mut digest = calculate_sha256(data.as_bytes());
    digest.truncate(16);
    digest
}

pub fn generate_image_id() -> String {
    Uuid::new_v4().to_string()
}

/// Ids that are safe to use as a single document path segment.
pub fn is_valid_segment(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | ':'))
        && id != "."
        && id != ".."
}

/// Client-supplied key identifying one logical debit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.len() <= MAX_RAW_KEY_LEN && is_valid_segment(trimmed) {
            Some(Self(trimmed.to_string()))
        } else {
            Some(Self(format!("h:{}", short_hash(trimmed))))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_calculation() {
        let hash = calculate_sha256(b"Hello, World!");
        assert_eq!(
            hash,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_short_hash_is_stable_prefix() {
        let full = calculate_sha256(b"device-1");
        let short = short_hash("device-1");
        assert_eq!(short.len(), 16);
        assert!(full.starts_with(&short));
        assert_eq!(short, short_hash("device-1"));
        assert_ne!(short, short_hash("device-2"));
    }

    #[test]
    fn test_image_ids_are_unique_segments() {
        let a = generate_image_id();
        let b = generate_image_id();
        assert_ne!(a, b);
        assert!(is_valid_segment(&a));
    }

    #[test]
    fn test_segment_validation() {
        assert!(is_valid_segment("user_123"));
        assert!(!is_valid_segment(""));
        assert!(!is_valid_segment("a/b"));
        assert!(!is_valid_segment(".."));
        assert!(!is_valid_segment(&"x".repeat(129)));
    }

    #[test]
    fn test_idempotency_key_normalization() {
        assert_eq!(IdempotencyKey::parse("  gen-42 ").unwrap().as_str(), "gen-42");
        assert!(IdempotencyKey::parse("   ").is_none());

        let long = IdempotencyKey::parse(&"k".repeat(200)).unwrap();
        assert!(long.as_str().starts_with("h:"));
        assert_eq!(long, IdempotencyKey::parse(&"k".repeat(200)).unwrap());

        let spaced = IdempotencyKey::parse("has spaces inside").unwrap();
        assert!(spaced.as_str().starts_with("h:"));
    }
}
