// src/pipeline/hash.rs

//! Content digests for change detection.

use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::utils::normalize_whitespace;

/// Normalize text before hashing: every whitespace run becomes one space.
pub fn normalize(content: &str) -> String {
    normalize_whitespace(content)
}

/// SHA-256 of the normalized content, lowercase hex.
///
/// Fails on content that is empty after normalization, so an empty page is
/// never mistaken for a valid snapshot.
pub fn content_hash(content: &str) -> Result<String> {
    let normalized = normalize(content);
    if normalized.is_empty() {
        return Err(AppError::Hash(
            "no content left to hash after normalization".to_string(),
        ));
    }
    let digest = Sha256::digest(normalized.as_bytes());
    Ok(hex::encode(digest))
}

/// First eight characters of a digest, for log lines.
pub fn short(digest: &str) -> &str {
    digest.get(..8).unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = content_hash("Hello world").unwrap();
        let b = content_hash("Hello world").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_whitespace_does_not_change_hash() {
        assert_eq!(
            content_hash("a\n\n b").unwrap(),
            content_hash("  a b ").unwrap()
        );
        assert_eq!(normalize("a\n\n b"), "a b");
    }

    #[test]
    fn test_different_content_different_hash() {
        assert_ne!(content_hash("price: 10").unwrap(), content_hash("price: 11").unwrap());
    }

    #[test]
    fn test_known_vector() {
        // sha256("abc")
        assert_eq!(
            content_hash(" abc ").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_content_fails() {
        assert!(matches!(content_hash(""), Err(AppError::Hash(_))));
        assert!(matches!(content_hash(" \n\t "), Err(AppError::Hash(_))));
    }

    #[test]
    fn test_short_digest() {
        assert_eq!(short("0123456789abcdef"), "01234567");
        assert_eq!(short("abc"), "abc");
    }
}
