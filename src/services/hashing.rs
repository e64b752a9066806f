//! Content digests and integrity manifests for uploaded media.
//!
//! SHA-256 is the source of truth for integrity checks and deduplication.
//! MD5 is computed only for legacy consumers and is never trusted on its own.

use crate::models::manifest::{DerivativeHashes, DerivativeSizes, PhotoManifest};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Md5,
}

/// Borrowed renditions derived from an original upload.
#[derive(Clone, Copy, Debug)]
pub struct Derivatives<'a> {
    pub thumb: &'a [u8],
    pub gallery: &'a [u8],
    pub pdf: &'a [u8],
}

/// Lowercase hex digest of `bytes`.
pub fn calculate_digest(bytes: &[u8], algorithm: DigestAlgorithm) -> String {
    match algorithm {
        DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        DigestAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    calculate_digest(bytes, DigestAlgorithm::Sha256)
}

/// Hash every rendition independently and stamp the manifest.
pub fn create_manifest(
    photo_id: impl Into<String>,
    original: &[u8],
    derivatives: &Derivatives<'_>,
    metadata: serde_json::Value,
) -> PhotoManifest {
    PhotoManifest {
        photo_id: photo_id.into(),
        original_hash: sha256_hex(original),
        derivative_hashes: DerivativeHashes {
            thumb: sha256_hex(derivatives.thumb),
            gallery: sha256_hex(derivatives.gallery),
            pdf: sha256_hex(derivatives.pdf),
        },
        sizes: DerivativeSizes {
            original: original.len() as u64,
            thumb: derivatives.thumb.len() as u64,
            gallery: derivatives.gallery.len() as u64,
            pdf: derivatives.pdf.len() as u64,
        },
        created_at: Utc::now(),
        metadata,
    }
}

/// Recompute the SHA-256 of `bytes` and compare it with `expected`.
///
/// The comparison is exact: an uppercase digest does not match.
pub fn verify_integrity(bytes: &[u8], expected: &str) -> bool {
    sha256_hex(bytes) == expected
}

pub fn is_duplicate(digest_a: &str, digest_b: &str) -> bool {
    digest_a == digest_b
}
